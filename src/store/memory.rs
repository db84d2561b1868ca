//! 内存任务存储：未配置 Notion 时的离线实现，也是测试用的替身

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::store::task::{CreatedTask, NewTask, Task, TaskFilter, TaskStatus};
use crate::store::traits::{StoreError, TaskStore};

#[derive(Debug, Clone)]
struct StoredTask {
    task: Task,
    archived: bool,
    notes: Vec<String>,
}

/// 内存实现：Vec + RwLock，按插入顺序返回
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<Vec<StoredTask>>>,
    /// 设置后按 task-1、task-2… 分配 id，否则用 UUID
    sequence: Option<Arc<AtomicUsize>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 可预测的 id，脚本化对话可以直接引用刚创建的记录
    pub fn with_sequential_ids(mut self) -> Self {
        self.sequence = Some(Arc::new(AtomicUsize::new(0)));
        self
    }

    fn next_id(&self) -> String {
        match &self.sequence {
            Some(n) => format!("task-{}", n.fetch_add(1, Ordering::SeqCst) + 1),
            None => uuid::Uuid::new_v4().to_string(),
        }
    }

    /// 直接放入一条记录（测试准备数据用）
    pub fn insert(&self, task: Task) {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        tasks.push(StoredTask {
            task,
            archived: false,
            notes: Vec::new(),
        });
    }

    /// 某条记录的备注（含已归档）
    pub fn notes(&self, id: &str) -> Vec<String> {
        let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        tasks
            .iter()
            .find(|s| s.task.id == id)
            .map(|s| s.notes.clone())
            .unwrap_or_default()
    }

    pub fn is_archived(&self, id: &str) -> bool {
        let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        tasks.iter().any(|s| s.task.id == id && s.archived)
    }

    /// 未归档记录数
    pub fn live_count(&self) -> usize {
        let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        tasks.iter().filter(|s| !s.archived).count()
    }

    fn with_live<F>(&self, id: &str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut StoredTask),
    {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        let stored = tasks
            .iter_mut()
            .find(|s| s.task.id == id && !s.archived)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        f(stored);
        Ok(())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, new: &NewTask) -> Result<CreatedTask, StoreError> {
        let id = self.next_id();
        let url = format!("memory://tasks/{}", id);
        self.insert(Task {
            id: id.clone(),
            title: new.title.clone(),
            summary: new.summary.clone(),
            category: new.category,
            priority: new.priority,
            due_date: new.due_date,
            status: TaskStatus::Todo,
            assignee: new.assignee.clone(),
            context_signature: new.context_signature.clone(),
            thread_key: new.thread_key.clone(),
            url: Some(url.clone()),
        });
        Ok(CreatedTask { id, url })
    }

    async fn query(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        Ok(tasks
            .iter()
            .filter(|s| !s.archived && filter.matches(&s.task))
            .map(|s| s.task.clone())
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        Ok(tasks
            .iter()
            .find(|s| s.task.id == id && !s.archived)
            .map(|s| s.task.clone()))
    }

    async fn find_by_thread_key(&self, key: &str) -> Result<Option<Task>, StoreError> {
        let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        Ok(tasks
            .iter()
            .find(|s| !s.archived && s.task.thread_key.as_deref() == Some(key))
            .map(|s| s.task.clone()))
    }

    async fn update_status(&self, id: &str, status: TaskStatus) -> Result<(), StoreError> {
        self.with_live(id, |s| s.task.status = status)
    }

    async fn append_note(&self, id: &str, note: &str) -> Result<(), StoreError> {
        self.with_live(id, |s| s.notes.push(note.to_string()))
    }

    async fn update_due_date(&self, id: &str, date: NaiveDate) -> Result<(), StoreError> {
        self.with_live(id, |s| s.task.due_date = Some(date))
    }

    async fn update_signature(&self, id: &str, signature: &str) -> Result<(), StoreError> {
        self.with_live(id, |s| s.task.context_signature = Some(signature.to_string()))
    }

    async fn archive(&self, id: &str) -> Result<(), StoreError> {
        self.with_live(id, |s| s.archived = true)
    }
}
