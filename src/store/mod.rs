//! 记录存储层：任务类型、TaskStore trait、Notion 与内存实现

pub mod memory;
pub mod notion;
pub mod task;
pub mod traits;

pub use memory::InMemoryTaskStore;
pub use notion::NotionStore;
pub use task::{
    best_fuzzy_match, bullet_list, title_similarity, Category, CreatedTask, NewTask, Priority, Task, TaskFilter,
    TaskStatus,
};
pub use traits::{StoreError, TaskStore, SEARCH_ALL};
