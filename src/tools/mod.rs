//! 任务工具：调用/结果类型、schema 声明与分发器

pub mod call;
pub mod dispatcher;
pub mod schema;

pub use call::{
    progress_label, TaskSummary, TaskToolCall, ToolResult, ADD_TASK_NOTE, ARCHIVE_TASKS,
    CREATE_TASK, SEARCH_TASKS, UPDATE_TASK_STATUS,
};
pub use dispatcher::{ToolContext, ToolDispatcher};
pub use schema::tool_declarations;
