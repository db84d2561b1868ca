//! 捕获编排器：单条入站消息的顶层路由
//!
//! 线程回复 -> 分类器 + 应用；新消息 -> 智能体循环（或提取模式）。
//! 所有进度都编辑到同一条状态消息；任何错误在这里被捕获并转成一条失败提示，不会让进程退出。

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::capture::apply::apply_decision;
use crate::capture::classifier::{TaskSnapshot, ThreadUpdateClassifier};
use crate::capture::extraction_flow::ExtractionFlow;
use crate::capture::status::{StatusMessage, THINKING};
use crate::config::{AgentMode, AppConfig};
use crate::core::{fallback_signature, Clock, TaskLocks, TaskbeeError};
use crate::integrations::{ChatGateway, InboundMessage};
use crate::llm::{LlmClient, ThinkingLevel};
use crate::react::{AgenticLoop, LoopEvent, DEFAULT_MAX_ITERATIONS};
use crate::store::TaskStore;
use crate::tools::{progress_label, ToolContext, ToolDispatcher};

/// 编排器可调参数
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub mode: AgentMode,
    pub max_iterations: usize,
    pub tool_timeout_secs: u64,
    pub extraction_effort: ThinkingLevel,
    pub classification_effort: ThinkingLevel,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            mode: AgentMode::Agentic,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tool_timeout_secs: 30,
            extraction_effort: ThinkingLevel::Low,
            classification_effort: ThinkingLevel::Minimal,
        }
    }
}

impl From<&AppConfig> for OrchestratorSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            mode: cfg.agent.mode,
            max_iterations: cfg.agent.max_iterations,
            tool_timeout_secs: cfg.agent.tool_timeout_secs,
            extraction_effort: cfg.llm.extraction_effort,
            classification_effort: cfg.llm.classification_effort,
        }
    }
}

/// 处理一条消息走的路径
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    ThreadReply,
    Agentic,
    Extraction,
    Ignored,
}

pub struct CaptureOrchestrator {
    store: Arc<dyn TaskStore>,
    gateway: Arc<dyn ChatGateway>,
    clock: Arc<dyn Clock>,
    classifier: Arc<ThreadUpdateClassifier>,
    agentic: AgenticLoop,
    extraction: ExtractionFlow,
    locks: TaskLocks,
    mode: AgentMode,
}

impl CaptureOrchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        store: Arc<dyn TaskStore>,
        gateway: Arc<dyn ChatGateway>,
        clock: Arc<dyn Clock>,
        settings: OrchestratorSettings,
    ) -> Self {
        let classifier = Arc::new(
            ThreadUpdateClassifier::new(llm.clone(), clock.clone())
                .with_effort(settings.classification_effort),
        );
        let dispatcher = Arc::new(ToolDispatcher::new(
            store.clone(),
            clock.clone(),
            settings.tool_timeout_secs,
        ));
        let agentic = AgenticLoop::new(llm.clone(), dispatcher, clock.clone())
            .with_max_iterations(settings.max_iterations);
        let extraction = ExtractionFlow::new(
            store.clone(),
            llm,
            clock.clone(),
            classifier.clone(),
            settings.extraction_effort,
        );
        Self {
            store,
            gateway,
            clock,
            classifier,
            agentic,
            extraction,
            locks: TaskLocks::new(),
            mode: settings.mode,
        }
    }

    pub fn route_for(&self, msg: &InboundMessage) -> Route {
        if msg.text.trim().is_empty() {
            Route::Ignored
        } else if msg.is_thread_reply() {
            Route::ThreadReply
        } else {
            match self.mode {
                AgentMode::Agentic => Route::Agentic,
                AgentMode::Extraction => Route::Extraction,
            }
        }
    }

    /// 处理一条入站消息；不返回错误，失败已转成用户可见的提示
    pub async fn handle(&self, msg: &InboundMessage) -> Route {
        let route = self.accept(msg);
        if route == Route::Ignored {
            return route;
        }
        let status = self.open_status(msg).await;
        self.process(msg, route, &status).await;
        route
    }

    /// 后台处理：处理过程 panic 时把同一条状态消息改成失败提示
    pub fn spawn_handle(self: &Arc<Self>, msg: InboundMessage) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let route = this.accept(&msg);
            if route == Route::Ignored {
                return;
            }
            let status = Arc::new(this.open_status(&msg).await);
            let worker = Arc::clone(&this);
            let progress = Arc::clone(&status);
            let inbound = msg.clone();
            let joined =
                tokio::spawn(async move { worker.process(&inbound, route, &progress).await })
                    .await;
            if let Err(e) = joined {
                tracing::error!(channel = %msg.channel, "message handler aborted: {}", e);
                status.update(ABORTED).await;
            }
        })
    }

    fn accept(&self, msg: &InboundMessage) -> Route {
        let route = self.route_for(msg);
        if route == Route::Ignored {
            tracing::debug!(channel = %msg.channel, "empty message ignored");
        } else {
            tracing::info!(
                channel = %msg.channel,
                user = %msg.user,
                route = ?route,
                "message accepted"
            );
        }
        route
    }

    async fn open_status(&self, msg: &InboundMessage) -> StatusMessage {
        StatusMessage::open(
            self.gateway.clone(),
            &msg.channel,
            Some(msg.thread_root()),
            THINKING,
        )
        .await
    }

    async fn process(&self, msg: &InboundMessage, route: Route, status: &StatusMessage) {
        let result = match route {
            Route::ThreadReply => self.handle_thread_reply(msg, status).await,
            Route::Agentic => self.handle_agentic(msg, status).await,
            Route::Extraction => self.extraction.run(msg, status).await,
            Route::Ignored => return,
        };

        let final_text = match result {
            Ok(text) => text,
            Err(TaskbeeError::LookupMiss(m)) => {
                tracing::warn!(channel = %msg.channel, "lookup miss: {}", m);
                format!("⚠️ {}", m)
            }
            Err(e) => {
                tracing::error!(channel = %msg.channel, route = ?route, "message handling failed: {}", e);
                failure_message(&e)
            }
        };
        status.update(&final_text).await;
    }

    async fn handle_thread_reply(
        &self,
        msg: &InboundMessage,
        status: &StatusMessage,
    ) -> Result<String, TaskbeeError> {
        let key = msg.thread_root();
        let _guard = self.locks.acquire(key).await;
        let task = self.store.find_by_thread_key(key).await?.ok_or_else(|| {
            TaskbeeError::LookupMiss("I couldn't find a task linked to this thread.".to_string())
        })?;
        status.update(&format!("🤔 Updating *{}*…", task.title)).await;
        let decision = self
            .classifier
            .classify(
                task.context_signature.as_deref(),
                &msg.text,
                &TaskSnapshot::from(&task),
            )
            .await;
        apply_decision(self.store.as_ref(), &task, &decision, &msg.text).await
    }

    async fn handle_agentic(
        &self,
        msg: &InboundMessage,
        status: &StatusMessage,
    ) -> Result<String, TaskbeeError> {
        let ctx = ToolContext {
            thread_key: Some(msg.thread_root().to_string()),
            signature: Some(fallback_signature(
                &msg.text,
                Some(self.clock.now().timestamp_millis()),
            )),
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let run = async {
            let outcome = self.agentic.run(&msg.text, &ctx, Some(&tx)).await;
            drop(tx);
            outcome
        };
        let relay = async {
            while let Some(ev) = rx.recv().await {
                if let LoopEvent::ToolCall { tool, .. } = ev {
                    status.update(progress_label(&tool)).await;
                }
            }
        };
        let (outcome, ()) = tokio::join!(run, relay);
        Ok(outcome?.reply)
    }
}

const ABORTED: &str = "❌ Sorry, something went wrong while handling your message.";

fn failure_message(e: &TaskbeeError) -> String {
    format!("{} ({})", ABORTED, e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FixedClock;
    use crate::integrations::RecordingGateway;
    use crate::llm::{AssistantTurn, LlmError, ScriptedLlmClient, ToolCallRequest};
    use crate::llm::{Completion, Message, ThinkingLevel, ToolDeclaration};
    use crate::store::{CreatedTask, InMemoryTaskStore, NewTask, StoreError, Task, TaskFilter, TaskStatus};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::on_date(
            chrono_tz::Asia::Shanghai,
            NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
        ))
    }

    /// 工具对话时直接 panic 的 LLM
    struct PanickingLlm;

    #[async_trait]
    impl LlmClient for PanickingLlm {
        async fn complete(
            &self,
            _messages: &[Message],
            _effort: ThinkingLevel,
        ) -> Result<Completion, LlmError> {
            panic!("completion exploded")
        }

        async fn converse(
            &self,
            _messages: &[Message],
            _tools: &[ToolDeclaration],
        ) -> Result<AssistantTurn, LlmError> {
            panic!("conversation exploded")
        }
    }

    /// 统计「读到线程任务」到「写回备注」之间同时在途的处理数
    struct InFlightStore {
        inner: InMemoryTaskStore,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl InFlightStore {
        fn new() -> Self {
            Self {
                inner: InMemoryTaskStore::new(),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TaskStore for InFlightStore {
        async fn create(&self, task: &NewTask) -> Result<CreatedTask, StoreError> {
            self.inner.create(task).await
        }

        async fn query(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
            self.inner.query(filter).await
        }

        async fn get(&self, id: &str) -> Result<Option<Task>, StoreError> {
            self.inner.get(id).await
        }

        async fn find_by_thread_key(&self, key: &str) -> Result<Option<Task>, StoreError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let found = self.inner.find_by_thread_key(key).await;
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            found
        }

        async fn update_status(&self, id: &str, status: TaskStatus) -> Result<(), StoreError> {
            self.inner.update_status(id, status).await
        }

        async fn append_note(&self, id: &str, note: &str) -> Result<(), StoreError> {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            let result = self.inner.append_note(id, note).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn update_due_date(&self, id: &str, date: NaiveDate) -> Result<(), StoreError> {
            self.inner.update_due_date(id, date).await
        }

        async fn update_signature(&self, id: &str, signature: &str) -> Result<(), StoreError> {
            self.inner.update_signature(id, signature).await
        }

        async fn archive(&self, id: &str) -> Result<(), StoreError> {
            self.inner.archive(id).await
        }
    }

    struct Fixture {
        orchestrator: Arc<CaptureOrchestrator>,
        store: Arc<InMemoryTaskStore>,
        gateway: Arc<RecordingGateway>,
    }

    fn fixture(llm: ScriptedLlmClient, mode: AgentMode) -> Fixture {
        let store = Arc::new(InMemoryTaskStore::new());
        let gateway = Arc::new(RecordingGateway::new());
        let clock = test_clock();
        let settings = OrchestratorSettings {
            mode,
            ..Default::default()
        };
        Fixture {
            orchestrator: Arc::new(CaptureOrchestrator::new(
                Arc::new(llm),
                store.clone(),
                gateway.clone(),
                clock,
                settings,
            )),
            store,
            gateway,
        }
    }

    #[tokio::test]
    async fn test_thread_reply_done_completes_task() {
        let f = fixture(
            ScriptedLlmClient::new().with_completion(r#"{"action":"completed"}"#),
            AgentMode::Agentic,
        );
        let mut new = NewTask::new("Buy milk");
        new.thread_key = Some("100.1".to_string());
        let created = f.store.create(&new).await.unwrap();

        let reply = InboundMessage::new("C1", "U1", "done", "100.5").in_thread("100.1");
        assert_eq!(f.orchestrator.handle(&reply).await, Route::ThreadReply);

        let task = f.store.get(&created.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Done);
        let texts = f.gateway.final_texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("Marked *Buy milk* as Done"));
    }

    #[tokio::test]
    async fn test_thread_without_task_warns() {
        let f = fixture(ScriptedLlmClient::new(), AgentMode::Agentic);
        let reply = InboundMessage::new("C1", "U1", "done", "100.5").in_thread("99.0");
        f.orchestrator.handle(&reply).await;
        let texts = f.gateway.final_texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].starts_with("⚠️"));
    }

    #[tokio::test]
    async fn test_provider_unreachable_yields_one_failure_message() {
        let f = fixture(
            ScriptedLlmClient::new().with_turn_error(LlmError::Unavailable("offline".into())),
            AgentMode::Agentic,
        );
        let msg = InboundMessage::new("C1", "U1", "Buy milk tomorrow", "200.1");
        f.orchestrator.spawn_handle(msg).await.unwrap();
        let texts = f.gateway.final_texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].starts_with("❌"));
    }

    #[tokio::test]
    async fn test_agentic_progress_edits_single_message() {
        let f = fixture(
            ScriptedLlmClient::new()
                .with_turn(AssistantTurn::with_calls(vec![ToolCallRequest {
                    id: "1".to_string(),
                    name: "create_task".to_string(),
                    arguments: json!({ "title": "Buy milk", "dueDate": "2025-01-11" }),
                }]))
                .with_turn(AssistantTurn::final_text("Created *Buy milk* for tomorrow.")),
            AgentMode::Agentic,
        );
        let msg = InboundMessage::new("C1", "U1", "Buy milk tomorrow", "300.1");
        assert_eq!(f.orchestrator.handle(&msg).await, Route::Agentic);

        assert_eq!(f.gateway.sent_count(), 1);
        assert_eq!(
            f.gateway.final_texts(),
            vec!["Created *Buy milk* for tomorrow.".to_string()]
        );
        let edits: Vec<_> = f
            .gateway
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                crate::integrations::GatewayCall::Updated { text, .. } => Some(text),
                _ => None,
            })
            .collect();
        assert!(edits.iter().any(|t| t == progress_label("create_task")));

        let task = f.store.find_by_thread_key("300.1").await.unwrap().unwrap();
        assert!(task.context_signature.is_some());
    }

    #[tokio::test]
    async fn test_empty_message_is_ignored() {
        let f = fixture(ScriptedLlmClient::new(), AgentMode::Agentic);
        let msg = InboundMessage::new("C1", "U1", "   ", "1.0");
        assert_eq!(f.orchestrator.handle(&msg).await, Route::Ignored);
        assert_eq!(f.gateway.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_extraction_mode_routes_to_parser() {
        let f = fixture(
            ScriptedLlmClient::new().with_completion(r#"{"title":"Buy milk","intent":"new_task"}"#),
            AgentMode::Extraction,
        );
        let msg = InboundMessage::new("C1", "U1", "Buy milk", "400.1");
        assert_eq!(f.orchestrator.handle(&msg).await, Route::Extraction);
        assert_eq!(f.store.live_count(), 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_rewrites_status_message() {
        let gateway = Arc::new(RecordingGateway::new());
        let orchestrator = Arc::new(CaptureOrchestrator::new(
            Arc::new(PanickingLlm),
            Arc::new(InMemoryTaskStore::new()),
            gateway.clone(),
            test_clock(),
            OrchestratorSettings::default(),
        ));
        let msg = InboundMessage::new("C1", "U1", "Buy milk tomorrow", "250.1");
        orchestrator.spawn_handle(msg).await.unwrap();

        assert_eq!(gateway.sent_count(), 1);
        let texts = gateway.final_texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].starts_with("❌"));
    }

    #[tokio::test]
    async fn test_concurrent_replies_to_same_thread_apply_in_turn() {
        let store = Arc::new(InFlightStore::new());
        let gateway = Arc::new(RecordingGateway::new());
        let orchestrator = Arc::new(CaptureOrchestrator::new(
            Arc::new(
                ScriptedLlmClient::new()
                    .with_completion(r#"{"action":"detail","note":"first"}"#)
                    .with_completion(r#"{"action":"detail","note":"second"}"#),
            ),
            store.clone(),
            gateway.clone(),
            test_clock(),
            OrchestratorSettings::default(),
        ));
        let mut new = NewTask::new("Report");
        new.thread_key = Some("500.1".to_string());
        let created = store.create(&new).await.unwrap();

        let a = orchestrator
            .spawn_handle(InboundMessage::new("C1", "U1", "a", "500.2").in_thread("500.1"));
        let b = orchestrator
            .spawn_handle(InboundMessage::new("C1", "U1", "b", "500.3").in_thread("500.1"));
        a.await.unwrap();
        b.await.unwrap();

        assert_eq!(store.peak.load(Ordering::SeqCst), 1);
        assert_eq!(store.inner.notes(&created.id), vec!["first".to_string(), "second".to_string()]);
        assert_eq!(gateway.final_texts().len(), 2);
    }
}
