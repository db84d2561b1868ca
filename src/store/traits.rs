//! 记录存储抽象
//!
//! 编排层只依赖 TaskStore trait；Notion 与内存实现都在此 trait 之后，测试可注入内存实现。

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::store::task::{best_fuzzy_match, CreatedTask, NewTask, Task, TaskFilter, TaskStatus};

/// search 的哨兵词：返回所有未完成记录
pub const SEARCH_ALL: &str = "all";

/// 存储错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Store config error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Http(e.to_string())
    }
}

/// 任务记录存储
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, task: &NewTask) -> Result<CreatedTask, StoreError>;

    async fn query(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Task>, StoreError>;

    async fn find_by_thread_key(&self, key: &str) -> Result<Option<Task>, StoreError>;

    async fn update_status(&self, id: &str, status: TaskStatus) -> Result<(), StoreError>;

    async fn append_note(&self, id: &str, note: &str) -> Result<(), StoreError>;

    async fn update_due_date(&self, id: &str, date: NaiveDate) -> Result<(), StoreError>;

    /// 记录最新的上下文签名（线程回复处理后沿用）
    async fn update_signature(&self, id: &str, signature: &str) -> Result<(), StoreError>;

    /// 软删除（归档），不做物理删除
    async fn archive(&self, id: &str) -> Result<(), StoreError>;

    /// 按标题模糊查找：先按子串过滤，未命中再在所有未完成记录里按相似度挑选
    async fn find_by_fuzzy_title(&self, text: &str) -> Result<Option<Task>, StoreError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let direct = self.query(&TaskFilter::text(text)).await?;
        if let Some(t) = best_fuzzy_match(text, &direct) {
            return Ok(Some(t.clone()));
        }
        let open = self.query(&TaskFilter::open()).await?;
        Ok(best_fuzzy_match(text, &open).cloned())
    }

    /// 搜索：term 为 "all" 时返回全部未完成记录，否则按标题/负责人包含匹配
    async fn search(&self, term: &str) -> Result<Vec<Task>, StoreError> {
        let term = term.trim();
        if term.is_empty() || term.eq_ignore_ascii_case(SEARCH_ALL) {
            self.query(&TaskFilter::open()).await
        } else {
            self.query(&TaskFilter::text(term)).await
        }
    }

    /// 归档候选：与 search 相同的匹配规则，但只取未完成记录
    async fn search_open(&self, term: &str) -> Result<Vec<Task>, StoreError> {
        let term = term.trim();
        if term.is_empty() || term.eq_ignore_ascii_case(SEARCH_ALL) {
            return self.query(&TaskFilter::open()).await;
        }
        let filter = TaskFilter {
            open_only: true,
            ..TaskFilter::text(term)
        };
        self.query(&filter).await
    }
}
