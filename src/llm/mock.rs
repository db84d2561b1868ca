//! Mock LLM 客户端（无需 API）
//!
//! - MockLlmClient：离线运行用。complete 返回非 JSON 文本（走解析兜底），converse 回显最后一条 user 消息。
//! - ScriptedLlmClient：测试用。按脚本依次返回 complete / converse 的结果，并记录每次收到的消息。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::message::{Message, Role};
use crate::llm::traits::{
    AssistantTurn, Completion, LlmClient, LlmError, ThinkingLevel, ToolDeclaration,
};

fn last_user(messages: &[Message]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| matches!(m.role, Role::User))
        .map(|m| m.content.as_str())
        .unwrap_or("(no input)")
}

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        _messages: &[Message],
        _effort: ThinkingLevel,
    ) -> Result<Completion, LlmError> {
        Ok(Completion::text("(mock) no structured output"))
    }

    async fn converse(
        &self,
        messages: &[Message],
        _tools: &[ToolDeclaration],
    ) -> Result<AssistantTurn, LlmError> {
        Ok(AssistantTurn::final_text(format!(
            "Echo from Mock: {}",
            last_user(messages)
        )))
    }
}

/// 脚本化客户端：队列耗尽后 complete / converse 返回 Unavailable；
/// 设置了 repeat_turn 时 converse 永远返回该轮（用于验证循环上限）
#[derive(Default)]
pub struct ScriptedLlmClient {
    completions: Mutex<VecDeque<Result<Completion, LlmError>>>,
    turns: Mutex<VecDeque<Result<AssistantTurn, LlmError>>>,
    repeat_turn: Option<AssistantTurn>,
    complete_calls: Mutex<Vec<Vec<Message>>>,
    converse_calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_completion(self, text: impl Into<String>) -> Self {
        self.push_completion(Ok(Completion::text(text)));
        self
    }

    pub fn with_signed_completion(self, text: impl Into<String>, signature: impl Into<String>) -> Self {
        self.push_completion(Ok(Completion {
            text: text.into(),
            signature: Some(signature.into()),
        }));
        self
    }

    pub fn with_completion_error(self, err: LlmError) -> Self {
        self.push_completion(Err(err));
        self
    }

    pub fn with_turn(self, turn: AssistantTurn) -> Self {
        self.lock_turns().push_back(Ok(turn));
        self
    }

    pub fn with_turn_error(self, err: LlmError) -> Self {
        self.lock_turns().push_back(Err(err));
        self
    }

    pub fn repeating(mut self, turn: AssistantTurn) -> Self {
        self.repeat_turn = Some(turn);
        self
    }

    fn push_completion(&self, item: Result<Completion, LlmError>) {
        self.completions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(item);
    }

    fn lock_turns(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<AssistantTurn, LlmError>>> {
        self.turns.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// converse 被调用的次数
    pub fn converse_count(&self) -> usize {
        self.converse_calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn complete_count(&self) -> usize {
        self.complete_calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// 第 n 次 converse 收到的完整消息
    pub fn converse_messages(&self, n: usize) -> Vec<Message> {
        self.converse_calls
            .lock()
            .ok()
            .and_then(|c| c.get(n).cloned())
            .unwrap_or_default()
    }

    /// 第 n 次 complete 收到的完整消息
    pub fn complete_messages(&self, n: usize) -> Vec<Message> {
        self.complete_calls
            .lock()
            .ok()
            .and_then(|c| c.get(n).cloned())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        _effort: ThinkingLevel,
    ) -> Result<Completion, LlmError> {
        self.complete_calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());
        self.completions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Unavailable("script exhausted".to_string())))
    }

    async fn converse(
        &self,
        messages: &[Message],
        _tools: &[ToolDeclaration],
    ) -> Result<AssistantTurn, LlmError> {
        self.converse_calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());
        if let Some(next) = self.lock_turns().pop_front() {
            return next;
        }
        match &self.repeat_turn {
            Some(t) => Ok(t.clone()),
            None => Err(LlmError::Unavailable("script exhausted".to_string())),
        }
    }
}
