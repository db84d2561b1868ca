//! 端到端场景：脚本化 LLM + 内存存储 + 记录型网关，从入站消息走到最终回复

use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::json;
use taskbee::capture::{CaptureOrchestrator, OrchestratorSettings, Route};
use taskbee::config::AgentMode;
use taskbee::core::FixedClock;
use taskbee::integrations::{InboundMessage, RecordingGateway};
use taskbee::llm::{AssistantTurn, LlmError, Role, ScriptedLlmClient, ToolCallRequest};
use taskbee::store::{InMemoryTaskStore, NewTask, TaskStatus, TaskStore};

struct Harness {
    orchestrator: Arc<CaptureOrchestrator>,
    llm: Arc<ScriptedLlmClient>,
    store: Arc<InMemoryTaskStore>,
    gateway: Arc<RecordingGateway>,
}

fn harness(llm: ScriptedLlmClient, mode: AgentMode) -> Harness {
    let llm = Arc::new(llm);
    let store = Arc::new(InMemoryTaskStore::new());
    let gateway = Arc::new(RecordingGateway::new());
    let clock = Arc::new(FixedClock::on_date(
        chrono_tz::Asia::Shanghai,
        NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
    ));
    let orchestrator = Arc::new(CaptureOrchestrator::new(
        llm.clone(),
        store.clone(),
        gateway.clone(),
        clock,
        OrchestratorSettings {
            mode,
            ..Default::default()
        },
    ));
    Harness {
        orchestrator,
        llm,
        store,
        gateway,
    }
}

fn call(id: &str, name: &str, args: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest {
        id: id.to_string(),
        name: name.to_string(),
        arguments: args,
    }
}

fn tool_outputs(llm: &ScriptedLlmClient, turn: usize) -> Vec<String> {
    llm.converse_messages(turn)
        .into_iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.content)
        .collect()
}

#[tokio::test]
async fn buy_milk_tomorrow_creates_task_due_next_day() {
    let h = harness(
        ScriptedLlmClient::new()
            .with_turn(AssistantTurn::with_calls(vec![call(
                "c1",
                "create_task",
                json!({"title": "Buy milk", "dueDate": "tomorrow"}),
            )]))
            .with_turn(AssistantTurn::final_text("✅ Added *Buy milk* for tomorrow.")),
        AgentMode::Agentic,
    );
    let msg = InboundMessage::new("C1", "U1", "Buy milk tomorrow", "100.1");
    assert_eq!(h.orchestrator.handle(&msg).await, Route::Agentic);

    let task = h.store.find_by_thread_key("100.1").await.unwrap().unwrap();
    assert_eq!(task.title, "Buy milk");
    assert_eq!(task.due_date, NaiveDate::from_ymd_opt(2025, 1, 11));
    assert!(task.context_signature.is_some());
    assert_eq!(h.gateway.final_texts(), vec!["✅ Added *Buy milk* for tomorrow.".to_string()]);
}

#[tokio::test]
async fn buy_milk_tomorrow_in_extraction_mode() {
    let h = harness(
        ScriptedLlmClient::new().with_completion(
            r#"{"tasks":[{"title":"Buy milk","intent":"new_task","dueDate":"tomorrow"}]}"#,
        ),
        AgentMode::Extraction,
    );
    let msg = InboundMessage::new("C1", "U1", "Buy milk tomorrow", "100.2");
    assert_eq!(h.orchestrator.handle(&msg).await, Route::Extraction);

    let task = h.store.find_by_thread_key("100.2").await.unwrap().unwrap();
    assert_eq!(task.due_date, NaiveDate::from_ymd_opt(2025, 1, 11));
    assert!(h.gateway.final_texts()[0].contains("due 2025-01-11"));
}

#[tokio::test]
async fn delete_all_view_tasks_archives_every_match() {
    let h = harness(
        ScriptedLlmClient::new()
            .with_turn(AssistantTurn::with_calls(vec![call(
                "c1",
                "archive_tasks",
                json!({"searchTerm": "View"}),
            )]))
            .with_turn(AssistantTurn::final_text("🗑️ Archived 3 tasks.")),
        AgentMode::Agentic,
    );
    for title in ["View header", "View footer", "Fix View colors", "Water plants"] {
        h.store.create(&NewTask::new(title)).await.unwrap();
    }

    h.orchestrator
        .handle(&InboundMessage::new("C1", "U1", "delete all tasks for View", "200.1"))
        .await;

    assert_eq!(h.store.live_count(), 1);
    let outputs = tool_outputs(&h.llm, 1);
    assert_eq!(outputs.len(), 1);
    let result: serde_json::Value = serde_json::from_str(&outputs[0]).unwrap();
    assert_eq!(result, json!({"success": true, "archived": 3}));
}

#[tokio::test]
async fn done_reply_in_thread_marks_task_done() {
    let h = harness(
        ScriptedLlmClient::new().with_completion(r#"{"action":"completed"}"#),
        AgentMode::Agentic,
    );
    let mut new = NewTask::new("Buy milk");
    new.thread_key = Some("300.1".to_string());
    let created = h.store.create(&new).await.unwrap();

    let reply = InboundMessage::new("C1", "U1", "done", "300.5").in_thread("300.1");
    assert_eq!(h.orchestrator.handle(&reply).await, Route::ThreadReply);

    let task = h.store.get(&created.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    assert!(h.gateway.final_texts()[0].contains("Done"));
    assert_eq!(h.llm.converse_count(), 0);
}

#[tokio::test]
async fn list_all_tasks_returns_every_open_record() {
    let h = harness(
        ScriptedLlmClient::new()
            .with_turn(AssistantTurn::with_calls(vec![call(
                "c1",
                "search_tasks",
                json!({"query": "all"}),
            )]))
            .with_turn(AssistantTurn::final_text("Here are your tasks.")),
        AgentMode::Agentic,
    );
    let mut assigned = NewTask::new("Review budget");
    assigned.assignee = Some("Zoe".to_string());
    h.store.create(&assigned).await.unwrap();
    h.store.create(&NewTask::new("Book flights")).await.unwrap();
    let finished = h.store.create(&NewTask::new("Old chore")).await.unwrap();
    h.store.update_status(&finished.id, TaskStatus::Done).await.unwrap();

    h.orchestrator
        .handle(&InboundMessage::new("C1", "U1", "list all tasks", "400.1"))
        .await;

    let outputs = tool_outputs(&h.llm, 1);
    let result: serde_json::Value = serde_json::from_str(&outputs[0]).unwrap();
    let titles: Vec<&str> = result["tasks"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["title"].as_str())
        .collect();
    assert_eq!(titles.len(), 2);
    assert!(titles.contains(&"Review budget") && titles.contains(&"Book flights"));
}

#[tokio::test]
async fn provider_outage_sends_one_failure_message() {
    let h = harness(
        ScriptedLlmClient::new()
            .with_turn_error(LlmError::Unavailable("connection refused".into()))
            .with_turn(AssistantTurn::final_text("ok")),
        AgentMode::Agentic,
    );
    let handle = h
        .orchestrator
        .spawn_handle(InboundMessage::new("C1", "U1", "Buy milk tomorrow", "500.1"));
    handle.await.unwrap();

    let texts = h.gateway.final_texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].starts_with("❌"));
    assert_eq!(h.store.live_count(), 0);

    // 之后的消息照常处理
    h.orchestrator
        .handle(&InboundMessage::new("C1", "U1", "hi", "500.2"))
        .await;
    assert_eq!(h.gateway.final_texts()[1], "ok");
}
