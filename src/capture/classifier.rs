//! 线程回复分类器
//!
//! 给定原任务快照与一条线程回复，判断回复意味着什么（完成 / 开始 / 补充 / 改期 / 删除 / 无变化）。
//! 分类器只做判断，不改存储；模型输出不可解析或模型不可达时退回本地关键词规则，永不报错。

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::core::{describe_now, fallback_signature, Clock};
use crate::llm::{LlmClient, Message, ThinkingLevel};
use crate::parser::{decode_with, normalize_due_date, resolve_relative_date};
use crate::store::{Task, TaskStatus};

/// 回复对应的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateAction {
    Completed,
    InProgress,
    Detail,
    Rescheduled,
    Deleted,
    Unchanged,
}

impl UpdateAction {
    pub fn parse_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "completed" | "complete" | "done" => Some(UpdateAction::Completed),
            "in_progress" | "progress" | "started" => Some(UpdateAction::InProgress),
            "detail" | "details" | "note" => Some(UpdateAction::Detail),
            "rescheduled" | "reschedule" | "postponed" => Some(UpdateAction::Rescheduled),
            "deleted" | "delete" | "archived" | "cancelled" => Some(UpdateAction::Deleted),
            "unchanged" | "none" | "noop" => Some(UpdateAction::Unchanged),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateAction::Completed => "completed",
            UpdateAction::InProgress => "in_progress",
            UpdateAction::Detail => "detail",
            UpdateAction::Rescheduled => "rescheduled",
            UpdateAction::Deleted => "deleted",
            UpdateAction::Unchanged => "unchanged",
        }
    }
}

/// 原任务快照（发给模型的上下文）
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSnapshot {
    pub title: String,
    pub summary: String,
    pub status: TaskStatus,
    pub due_date: Option<NaiveDate>,
}

impl From<&Task> for TaskSnapshot {
    fn from(t: &Task) -> Self {
        Self {
            title: t.title.clone(),
            summary: t.summary.clone(),
            status: t.status,
            due_date: t.due_date,
        }
    }
}

/// 动作附带的数据
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdates {
    /// detail：追加到备注的文本
    pub note: Option<String>,
    /// rescheduled：新的截止日期
    pub due_date: Option<NaiveDate>,
}

/// 分类结果
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadDecision {
    pub action: UpdateAction,
    pub updates: TaskUpdates,
    pub signature: String,
    /// 是否走了本地关键词规则
    pub degraded: bool,
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    action: String,
    #[serde(default)]
    note: Option<String>,
    #[serde(default, alias = "dueDate", alias = "newDueDate")]
    due_date: Option<String>,
    #[serde(default, alias = "contextSignature")]
    signature: Option<String>,
}

const COMPLETED_KEYWORDS: &[&str] = &[
    "done", "finished", "completed", "complete", "closed", "shipped", "resolved", "✅",
    "完成", "搞定", "做完", "好了", "结束了",
];
const PROGRESS_KEYWORDS: &[&str] = &[
    "started", "starting", "working on", "in progress", "on it", "wip", "begun",
    "开始", "进行中", "在做", "正在",
];
const RESCHEDULE_KEYWORDS: &[&str] = &[
    "postpone", "reschedule", "push to", "move to", "delay", "later", "tomorrow", "next week",
    "推迟", "延期", "改到", "挪到", "明天", "下周",
];

const CLASSIFY_RULES: &str = r#"You classify a chat reply posted under an existing task.

Return ONLY JSON: {"action": "...", "note": "...", "dueDate": "YYYY-MM-DD"}

action must be one of:
- completed: the task is finished (done, finished, completed, shipped, 完成, 搞定, 做完, 好了)
- in_progress: work has started (started, working on, on it, in progress, 开始, 进行中, 在做)
- rescheduled: the due date moves (postpone, push to, move to, delay, 推迟, 延期, 改到). Set dueDate.
- deleted: the task should be dropped (delete, remove, cancel, never mind, 删除, 取消, 不用了, 不做了)
- unchanged: acknowledgement with no information (ok, thanks, 👍, 收到, 谢谢)
- detail: anything else that adds information. Put the information in note.

Resolve relative dates against the current time below."#;

/// 线程回复分类器
pub struct ThreadUpdateClassifier {
    llm: Arc<dyn LlmClient>,
    clock: Arc<dyn Clock>,
    effort: ThinkingLevel,
}

impl ThreadUpdateClassifier {
    pub fn new(llm: Arc<dyn LlmClient>, clock: Arc<dyn Clock>) -> Self {
        Self {
            llm,
            clock,
            effort: ThinkingLevel::Minimal,
        }
    }

    pub fn with_effort(mut self, effort: ThinkingLevel) -> Self {
        self.effort = effort;
        self
    }

    fn prompt(&self, reply: &str, snapshot: &TaskSnapshot) -> Vec<Message> {
        let due = snapshot
            .due_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "none".to_string());
        let context = format!(
            "Task title: {}\nTask summary: {}\nTask status: {}\nTask due date: {}\n\nReply: {}",
            snapshot.title, snapshot.summary, snapshot.status, due, reply
        );
        vec![
            Message::system(format!(
                "{}\n\nCurrent time: {}",
                CLASSIFY_RULES,
                describe_now(&self.clock.now())
            )),
            Message::user(context),
        ]
    }

    /// 分类一条回复；签名优先取模型返回，其次沿用原签名，原签名也没有时才本地派生
    pub async fn classify(
        &self,
        original_signature: Option<&str>,
        reply: &str,
        snapshot: &TaskSnapshot,
    ) -> ThreadDecision {
        let carried = || {
            original_signature
                .filter(|s| !s.trim().is_empty())
                .map(String::from)
                .unwrap_or_else(|| fallback_signature(reply, None))
        };

        let completion = match self.llm.complete(&self.prompt(reply, snapshot), self.effort).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Classifier provider failed ({}), using keyword rules", e);
                return self.keyword_decision(reply, carried());
            }
        };

        let Some((raw, strategy)) = decode_with::<RawDecision>(&completion.text) else {
            tracing::warn!("Classifier output not decodable, using keyword rules");
            return self.keyword_decision(reply, completion.signature.unwrap_or_else(carried));
        };
        let Some(action) = UpdateAction::parse_loose(&raw.action) else {
            tracing::warn!(action = %raw.action, "Classifier returned unknown action, using keyword rules");
            return self.keyword_decision(reply, completion.signature.unwrap_or_else(carried));
        };

        let today = self.clock.today();
        let mut updates = TaskUpdates {
            note: raw.note.filter(|n| !n.trim().is_empty()),
            due_date: raw
                .due_date
                .as_deref()
                .and_then(|d| normalize_due_date(d, today)),
        };
        if action == UpdateAction::Detail && updates.note.is_none() {
            updates.note = Some(reply.trim().to_string());
        }
        if action == UpdateAction::Rescheduled && updates.due_date.is_none() {
            updates.due_date = resolve_relative_date(reply, today);
        }
        tracing::info!(action = action.as_str(), strategy, "thread reply classified");

        ThreadDecision {
            action,
            updates,
            signature: completion
                .signature
                .or(raw.signature.filter(|s| !s.trim().is_empty()))
                .unwrap_or_else(carried),
            degraded: false,
        }
    }

    fn keyword_decision(&self, reply: &str, signature: String) -> ThreadDecision {
        let (action, updates) = keyword_rules(reply, self.clock.today());
        ThreadDecision {
            action,
            updates,
            signature,
            degraded: true,
        }
    }
}

fn contains_any(haystack: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| haystack.contains(k))
}

/// 本地关键词规则：完成 > 开始 > 改期（需能解析出日期）> 补充
pub fn keyword_rules(reply: &str, today: NaiveDate) -> (UpdateAction, TaskUpdates) {
    let lower = reply.to_lowercase();
    if contains_any(&lower, COMPLETED_KEYWORDS) {
        return (UpdateAction::Completed, TaskUpdates::default());
    }
    if contains_any(&lower, PROGRESS_KEYWORDS) {
        return (UpdateAction::InProgress, TaskUpdates::default());
    }
    if contains_any(&lower, RESCHEDULE_KEYWORDS) {
        if let Some(date) = resolve_relative_date(reply, today) {
            return (
                UpdateAction::Rescheduled,
                TaskUpdates {
                    note: None,
                    due_date: Some(date),
                },
            );
        }
    }
    (
        UpdateAction::Detail,
        TaskUpdates {
            note: Some(reply.trim().to_string()),
            due_date: None,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FixedClock;
    use crate::llm::{LlmError, ScriptedLlmClient};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()
    }

    fn classifier(llm: ScriptedLlmClient) -> (ThreadUpdateClassifier, Arc<ScriptedLlmClient>) {
        let llm = Arc::new(llm);
        let clock = Arc::new(FixedClock::on_date(chrono_tz::Asia::Shanghai, today()));
        (ThreadUpdateClassifier::new(llm.clone(), clock), llm)
    }

    fn snapshot() -> TaskSnapshot {
        TaskSnapshot {
            title: "Buy milk".to_string(),
            summary: "Pick up milk".to_string(),
            status: TaskStatus::Todo,
            due_date: None,
        }
    }

    #[tokio::test]
    async fn test_done_is_completed() {
        let (c, llm) = classifier(ScriptedLlmClient::new().with_completion(r#"{"action":"completed"}"#));
        let d = c.classify(Some("sig-0"), "done", &snapshot()).await;
        assert_eq!(d.action, UpdateAction::Completed);
        assert_eq!(d.signature, "sig-0");
        assert!(!d.degraded);

        let sent = llm.complete_messages(0);
        assert!(sent[0].content.contains("2025-01-10"));
        assert!(sent[1].content.contains("Task status: Todo"));
    }

    #[tokio::test]
    async fn test_reschedule_resolves_date() {
        let (c, _) = classifier(ScriptedLlmClient::new().with_completion(
            "```json\n{\"action\":\"rescheduled\",\"dueDate\":\"next monday\"}\n```",
        ));
        let d = c.classify(None, "push to next monday", &snapshot()).await;
        assert_eq!(d.action, UpdateAction::Rescheduled);
        assert_eq!(d.updates.due_date, NaiveDate::from_ymd_opt(2025, 1, 13));
    }

    #[tokio::test]
    async fn test_detail_defaults_note_to_reply() {
        let (c, _) = classifier(ScriptedLlmClient::new().with_completion(r#"{"action":"detail"}"#));
        let d = c.classify(Some("s"), "get the oat one", &snapshot()).await;
        assert_eq!(d.action, UpdateAction::Detail);
        assert_eq!(d.updates.note.as_deref(), Some("get the oat one"));
    }

    #[tokio::test]
    async fn test_signature_carried_when_provider_omits() {
        for output in [
            r#"{"action":"in_progress"}"#,
            "not json at all",
            r#"{"action":"teleported"}"#,
        ] {
            let (c, _) = classifier(ScriptedLlmClient::new().with_completion(output));
            let d = c.classify(Some("orig-sig"), "started on it", &snapshot()).await;
            assert_eq!(d.signature, "orig-sig", "output {:?}", output);
        }
        let (c, _) = classifier(
            ScriptedLlmClient::new().with_completion_error(LlmError::Unavailable("down".into())),
        );
        let d = c.classify(Some("orig-sig"), "done", &snapshot()).await;
        assert_eq!(d.signature, "orig-sig");
    }

    #[tokio::test]
    async fn test_provider_signature_replaces_original() {
        let (c, _) = classifier(
            ScriptedLlmClient::new().with_signed_completion(r#"{"action":"completed"}"#, "new-sig"),
        );
        let d = c.classify(Some("orig-sig"), "done", &snapshot()).await;
        assert_eq!(d.signature, "new-sig");
    }

    #[tokio::test]
    async fn test_fallback_never_fails() {
        let (c, _) = classifier(ScriptedLlmClient::new().with_completion(""));
        let d = c.classify(None, "完成了", &snapshot()).await;
        assert!(d.degraded);
        assert_eq!(d.action, UpdateAction::Completed);
        assert!(d.signature.starts_with("local-"));
    }

    #[test]
    fn test_keyword_rules() {
        assert_eq!(keyword_rules("Done!", today()).0, UpdateAction::Completed);
        assert_eq!(keyword_rules("working on it now", today()).0, UpdateAction::InProgress);
        assert_eq!(keyword_rules("正在做", today()).0, UpdateAction::InProgress);

        let (action, updates) = keyword_rules("postpone to tomorrow", today());
        assert_eq!(action, UpdateAction::Rescheduled);
        assert_eq!(updates.due_date, NaiveDate::from_ymd_opt(2025, 1, 11));

        let (action, updates) = keyword_rules("the shop closes at 8", today());
        assert_eq!(action, UpdateAction::Detail);
        assert_eq!(updates.note.as_deref(), Some("the shop closes at 8"));
    }
}
