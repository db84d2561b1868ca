//! 工具调用与结果的封闭类型
//!
//! 模型给出的 (name, arguments JSON) 先解析为 TaskToolCall（按工具名区分的枚举），
//! 分发器对枚举做穷尽匹配；结果同样是封闭枚举，序列化后作为 tool 消息回填。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::Task;

pub const SEARCH_TASKS: &str = "search_tasks";
pub const CREATE_TASK: &str = "create_task";
pub const UPDATE_TASK_STATUS: &str = "update_task_status";
pub const ARCHIVE_TASKS: &str = "archive_tasks";
pub const ADD_TASK_NOTE: &str = "add_task_note";

/// search_tasks 参数
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct SearchTasksArgs {
    /// Text to match against task titles or assignees. Use "all" to list every open task.
    pub query: String,
}

/// create_task 参数
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskArgs {
    /// Short imperative title.
    pub title: String,
    /// One of Work, Personal, Idea, Health.
    #[serde(default)]
    pub category: Option<String>,
    /// One of P1, P2, P3.
    #[serde(default)]
    pub priority: Option<String>,
    /// Due date as YYYY-MM-DD.
    #[serde(default)]
    pub due_date: Option<String>,
    /// One-sentence summary.
    #[serde(default)]
    pub summary: String,
    /// Person responsible, if mentioned.
    #[serde(default)]
    pub assignee: Option<String>,
}

/// update_task_status 参数
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct UpdateTaskStatusArgs {
    /// Task id returned by search_tasks or create_task.
    pub id: String,
    /// One of Todo, In Progress, Done.
    pub status: String,
}

/// archive_tasks 参数
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveTasksArgs {
    /// Every open task whose title or assignee matches this term is archived.
    pub search_term: String,
}

/// add_task_note 参数
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct AddTaskNoteArgs {
    /// Task id returned by search_tasks or create_task.
    pub id: String,
    /// Text appended to the task's notes.
    pub note: String,
}

/// 按工具名区分的调用
#[derive(Debug, Clone, PartialEq)]
pub enum TaskToolCall {
    SearchTasks(SearchTasksArgs),
    CreateTask(CreateTaskArgs),
    UpdateTaskStatus(UpdateTaskStatusArgs),
    ArchiveTasks(ArchiveTasksArgs),
    AddTaskNote(AddTaskNoteArgs),
}

fn args<T: serde::de::DeserializeOwned>(name: &str, value: Value) -> Result<T, ToolResult> {
    serde_json::from_value(value)
        .map_err(|e| ToolResult::error(format!("Invalid arguments for {}: {}", name, e)))
}

impl TaskToolCall {
    /// 由名称与参数 JSON 构造；未知工具或参数不合法时返回 Error 结果（不抛异常）
    pub fn parse(name: &str, arguments: Value) -> Result<Self, ToolResult> {
        match name {
            SEARCH_TASKS => args(name, arguments).map(TaskToolCall::SearchTasks),
            CREATE_TASK => args(name, arguments).map(TaskToolCall::CreateTask),
            UPDATE_TASK_STATUS => args(name, arguments).map(TaskToolCall::UpdateTaskStatus),
            ARCHIVE_TASKS => args(name, arguments).map(TaskToolCall::ArchiveTasks),
            ADD_TASK_NOTE => args(name, arguments).map(TaskToolCall::AddTaskNote),
            other => Err(ToolResult::error(format!("Unknown tool: {}", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaskToolCall::SearchTasks(_) => SEARCH_TASKS,
            TaskToolCall::CreateTask(_) => CREATE_TASK,
            TaskToolCall::UpdateTaskStatus(_) => UPDATE_TASK_STATUS,
            TaskToolCall::ArchiveTasks(_) => ARCHIVE_TASKS,
            TaskToolCall::AddTaskNote(_) => ADD_TASK_NOTE,
        }
    }
}

/// 进度提示里展示的工具说明
pub fn progress_label(tool: &str) -> &'static str {
    match tool {
        SEARCH_TASKS => "🔍 Searching tasks…",
        CREATE_TASK => "📝 Creating task…",
        UPDATE_TASK_STATUS => "🔄 Updating task status…",
        ARCHIVE_TASKS => "🗑️ Archiving tasks…",
        ADD_TASK_NOTE => "🗒️ Adding a note…",
        _ => "⚙️ Working…",
    }
}

/// 工具结果中的任务摘要
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub id: String,
    pub title: String,
    pub status: String,
    pub priority: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl From<&Task> for TaskSummary {
    fn from(t: &Task) -> Self {
        Self {
            id: t.id.clone(),
            title: t.title.clone(),
            status: t.status.as_str().to_string(),
            priority: t.priority.as_str().to_string(),
            due_date: t.due_date.map(|d| d.to_string()),
            assignee: t.assignee.clone(),
            url: t.url.clone(),
        }
    }
}

/// 工具结果（序列化形态即回填给模型的 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolResult {
    Tasks { tasks: Vec<TaskSummary> },
    Created { id: String, url: String },
    Updated { success: bool },
    Archived { success: bool, archived: usize },
    NoteAdded { success: bool },
    Error { error: String },
}

impl ToolResult {
    pub fn error(msg: impl Into<String>) -> Self {
        ToolResult::Error { error: msg.into() }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolResult::Error { .. })
    }

    /// 序列化为 tool 消息内容
    pub fn to_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_known_tools() {
        let call = TaskToolCall::parse(CREATE_TASK, json!({ "title": "Buy milk", "dueDate": "2025-01-11" }))
            .unwrap();
        match call {
            TaskToolCall::CreateTask(a) => {
                assert_eq!(a.title, "Buy milk");
                assert_eq!(a.due_date.as_deref(), Some("2025-01-11"));
                assert_eq!(a.summary, "");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            TaskToolCall::parse(ARCHIVE_TASKS, json!({ "searchTerm": "View" }))
                .unwrap()
                .name(),
            ARCHIVE_TASKS
        );
    }

    #[test]
    fn test_unknown_tool_is_error_result() {
        let err = TaskToolCall::parse("drop_database", json!({})).unwrap_err();
        assert!(err.to_content().contains("Unknown tool"));
    }

    #[test]
    fn test_missing_argument_is_error_result() {
        let err = TaskToolCall::parse(UPDATE_TASK_STATUS, json!({ "id": "1" })).unwrap_err();
        assert!(err.is_error());
    }

    #[test]
    fn test_result_wire_shapes() {
        assert_eq!(
            ToolResult::Archived { success: true, archived: 3 }.to_content(),
            r#"{"success":true,"archived":3}"#
        );
        assert_eq!(ToolResult::error("boom").to_content(), r#"{"error":"boom"}"#);
    }
}
