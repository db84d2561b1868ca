//! 工具分发器
//!
//! 把模型给出的工具调用映射到 TaskStore 操作；对每次调用施加超时并输出结构化审计日志（JSON）。
//! 任何失败都变成 ToolResult::Error 返回，由智能体循环回填给模型，分发器本身不向上报错。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::Clock;
use crate::llm::ToolDeclaration;
use crate::parser::normalize_due_date;
use crate::store::{Category, NewTask, Priority, TaskStatus, TaskStore};
use crate::tools::call::{
    AddTaskNoteArgs, ArchiveTasksArgs, CreateTaskArgs, TaskSummary, TaskToolCall, ToolResult,
    UpdateTaskStatusArgs,
};
use crate::tools::schema::tool_declarations;

/// 单条入站消息的上下文：create_task 创建的记录会关联到该线程
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub thread_key: Option<String>,
    pub signature: Option<String>,
}

impl ToolContext {
    pub fn for_thread(thread_key: impl Into<String>) -> Self {
        Self {
            thread_key: Some(thread_key.into()),
            signature: None,
        }
    }
}

/// 工具分发器
pub struct ToolDispatcher {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>, timeout_secs: u64) -> Self {
        Self {
            store,
            clock,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        tool_declarations()
    }

    /// 按名称与原始参数分发：未知工具返回 {"error": "Unknown tool: ..."}
    pub async fn dispatch_raw(&self, ctx: &ToolContext, name: &str, args: Value) -> ToolResult {
        let preview = truncate_preview(args.to_string());
        match TaskToolCall::parse(name, args) {
            Ok(call) => self.dispatch(ctx, call).await,
            Err(result) => {
                audit(name, "rejected", 0, &preview);
                result
            }
        }
    }

    /// 执行一次强类型调用（带超时与审计日志）
    pub async fn dispatch(&self, ctx: &ToolContext, call: TaskToolCall) -> ToolResult {
        let start = Instant::now();
        let name = call.name();
        let preview = truncate_preview(format!("{:?}", call));
        let result = match timeout(self.timeout, self.run(ctx, call)).await {
            Ok(r) => r,
            Err(_) => ToolResult::error(format!("Tool {} timed out", name)),
        };
        let outcome = if result.is_error() { "error" } else { "ok" };
        audit(name, outcome, start.elapsed().as_millis() as u64, &preview);
        result
    }

    async fn run(&self, ctx: &ToolContext, call: TaskToolCall) -> ToolResult {
        match call {
            TaskToolCall::SearchTasks(a) => self.search(&a.query).await,
            TaskToolCall::CreateTask(a) => self.create(ctx, a).await,
            TaskToolCall::UpdateTaskStatus(a) => self.update_status(a).await,
            TaskToolCall::ArchiveTasks(a) => self.archive(a).await,
            TaskToolCall::AddTaskNote(a) => self.add_note(a).await,
        }
    }

    async fn search(&self, query: &str) -> ToolResult {
        match self.store.search(query).await {
            Ok(tasks) => ToolResult::Tasks {
                tasks: tasks.iter().map(TaskSummary::from).collect(),
            },
            Err(e) => ToolResult::error(e.to_string()),
        }
    }

    async fn create(&self, ctx: &ToolContext, a: CreateTaskArgs) -> ToolResult {
        if a.title.trim().is_empty() {
            return ToolResult::error("title must not be empty");
        }
        let today = self.clock.today();
        let summary = if a.summary.trim().is_empty() {
            a.title.clone()
        } else {
            a.summary
        };
        let new_task = NewTask {
            title: a.title.trim().to_string(),
            summary,
            category: a
                .category
                .as_deref()
                .and_then(Category::parse_loose)
                .unwrap_or_default(),
            priority: a
                .priority
                .as_deref()
                .and_then(Priority::parse_loose)
                .unwrap_or_default(),
            due_date: a.due_date.as_deref().and_then(|d| normalize_due_date(d, today)),
            assignee: a.assignee.filter(|s| !s.trim().is_empty()),
            context_signature: ctx.signature.clone(),
            thread_key: ctx.thread_key.clone(),
        };
        match self.store.create(&new_task).await {
            Ok(created) => ToolResult::Created {
                id: created.id,
                url: created.url,
            },
            Err(e) => ToolResult::error(e.to_string()),
        }
    }

    async fn update_status(&self, a: UpdateTaskStatusArgs) -> ToolResult {
        let Some(status) = TaskStatus::parse_loose(&a.status) else {
            return ToolResult::error(format!(
                "Invalid status '{}': expected Todo, In Progress or Done",
                a.status
            ));
        };
        match self.store.update_status(&a.id, status).await {
            Ok(()) => ToolResult::Updated { success: true },
            Err(e) => ToolResult::error(e.to_string()),
        }
    }

    /// 搜索未完成记录再逐条归档；部分失败时报告已归档数量并带上第一条错误
    async fn archive(&self, a: ArchiveTasksArgs) -> ToolResult {
        if a.search_term.trim().is_empty() {
            return ToolResult::error("searchTerm must not be empty");
        }
        let matches = match self.store.search_open(&a.search_term).await {
            Ok(t) => t,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        let mut archived = 0;
        for task in &matches {
            if let Err(e) = self.store.archive(&task.id).await {
                tracing::warn!(task_id = %task.id, "archive failed: {}", e);
                return ToolResult::error(format!(
                    "Archived {} of {} tasks before failing: {}",
                    archived,
                    matches.len(),
                    e
                ));
            }
            archived += 1;
        }
        ToolResult::Archived {
            success: true,
            archived,
        }
    }

    async fn add_note(&self, a: AddTaskNoteArgs) -> ToolResult {
        match self.store.append_note(&a.id, &a.note).await {
            Ok(()) => ToolResult::NoteAdded { success: true },
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

fn audit(tool: &str, outcome: &str, duration_ms: u64, args_preview: &str) {
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": tool,
        "ok": outcome == "ok",
        "outcome": outcome,
        "duration_ms": duration_ms,
        "args_preview": args_preview,
    });
    tracing::info!(audit = %audit.to_string(), "tool");
}

fn truncate_preview(s: String) -> String {
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FixedClock;
    use crate::store::{InMemoryTaskStore, TaskFilter};
    use chrono::NaiveDate;
    use serde_json::json;

    fn setup() -> (ToolDispatcher, Arc<InMemoryTaskStore>) {
        let store = Arc::new(InMemoryTaskStore::new());
        let clock = Arc::new(FixedClock::on_date(
            chrono_tz::Asia::Shanghai,
            NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
        ));
        (ToolDispatcher::new(store.clone(), clock, 5), store)
    }

    #[tokio::test]
    async fn test_create_then_update_uses_returned_id() {
        let (d, store) = setup();
        let ctx = ToolContext::for_thread("1700000000.000100");
        let created = d
            .dispatch_raw(
                &ctx,
                "create_task",
                json!({ "title": "Buy milk", "dueDate": "tomorrow", "priority": "p1" }),
            )
            .await;
        let ToolResult::Created { id, url } = created else {
            panic!("unexpected {:?}", created);
        };
        assert!(url.starts_with("memory://"));

        let task = store.get(&id).await.unwrap().unwrap();
        assert_eq!(task.due_date, NaiveDate::from_ymd_opt(2025, 1, 11));
        assert_eq!(task.priority, Priority::P1);
        assert_eq!(task.summary, "Buy milk");
        assert_eq!(task.thread_key.as_deref(), Some("1700000000.000100"));

        let updated = d
            .dispatch_raw(&ctx, "update_task_status", json!({ "id": id, "status": "done" }))
            .await;
        assert_eq!(updated, ToolResult::Updated { success: true });
        assert_eq!(store.get(&id).await.unwrap().unwrap().status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn test_archive_reports_count() {
        let (d, store) = setup();
        for title in ["View homepage", "View settings", "View login", "Other"] {
            store.create(&NewTask::new(title)).await.unwrap();
        }
        let result = d
            .dispatch_raw(&ToolContext::default(), "archive_tasks", json!({ "searchTerm": "View" }))
            .await;
        assert_eq!(result, ToolResult::Archived { success: true, archived: 3 });
        assert_eq!(store.live_count(), 1);
    }

    #[tokio::test]
    async fn test_archive_leaves_done_tasks_alone() {
        let (d, store) = setup();
        let done = store.create(&NewTask::new("View homepage")).await.unwrap();
        store.update_status(&done.id, TaskStatus::Done).await.unwrap();
        store.create(&NewTask::new("View settings")).await.unwrap();
        let result = d
            .dispatch_raw(&ToolContext::default(), "archive_tasks", json!({ "searchTerm": "View" }))
            .await;
        assert_eq!(result, ToolResult::Archived { success: true, archived: 1 });
        assert!(!store.is_archived(&done.id));
        assert_eq!(store.get(&done.id).await.unwrap().unwrap().status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn test_search_all_lists_open_tasks() {
        let (d, store) = setup();
        let done = store.create(&NewTask::new("Finished")).await.unwrap();
        store.update_status(&done.id, TaskStatus::Done).await.unwrap();
        store.create(&NewTask::new("Still open")).await.unwrap();

        let result = d
            .dispatch_raw(&ToolContext::default(), "search_tasks", json!({ "query": "all" }))
            .await;
        let ToolResult::Tasks { tasks } = result else {
            panic!("unexpected {:?}", result);
        };
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Still open");
    }

    #[tokio::test]
    async fn test_failures_become_error_results() {
        let (d, _) = setup();
        let ctx = ToolContext::default();
        assert!(d.dispatch_raw(&ctx, "rm_rf", json!({})).await.is_error());
        assert!(d
            .dispatch_raw(&ctx, "update_task_status", json!({ "id": "missing", "status": "Done" }))
            .await
            .is_error());
        assert!(d
            .dispatch_raw(&ctx, "update_task_status", json!({ "id": "x", "status": "Blocked" }))
            .await
            .is_error());
        assert!(d
            .dispatch_raw(&ctx, "add_task_note", json!({ "id": "missing", "note": "hi" }))
            .await
            .is_error());
    }

    #[tokio::test]
    async fn test_add_note() {
        let (d, store) = setup();
        let created = store.create(&NewTask::new("Report")).await.unwrap();
        let result = d
            .dispatch_raw(
                &ToolContext::default(),
                "add_task_note",
                json!({ "id": created.id, "note": "draft sent" }),
            )
            .await;
        assert_eq!(result, ToolResult::NoteAdded { success: true });
        assert_eq!(store.notes(&created.id), vec!["draft sent".to_string()]);
        assert_eq!(store.query(&TaskFilter::open()).await.unwrap().len(), 1);
    }
}
