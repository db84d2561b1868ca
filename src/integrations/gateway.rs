//! 聊天网关抽象：发送消息、原地编辑消息、入站消息结构

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 网关错误
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Chat API error: {0}")]
    Api(String),

    #[error("Gateway config error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Http(e.to_string())
    }
}

/// 入站消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub channel: String,
    pub user: String,
    pub text: String,
    /// 平台消息 id（Slack 为 ts）
    pub message_id: String,
    /// 作为线程回复时，线程根消息的标识
    #[serde(default)]
    pub thread_key: Option<String>,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        user: impl Into<String>,
        text: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            user: user.into(),
            text: text.into(),
            message_id: message_id.into(),
            thread_key: None,
        }
    }

    pub fn in_thread(mut self, thread_key: impl Into<String>) -> Self {
        self.thread_key = Some(thread_key.into());
        self
    }

    /// 是否为已有线程里的回复（线程根消息自身不算）
    pub fn is_thread_reply(&self) -> bool {
        self.thread_key
            .as_deref()
            .map(|k| !k.is_empty() && k != self.message_id)
            .unwrap_or(false)
    }

    /// 本条消息所在线程的根：回复取 thread_key，新消息取自身 id
    pub fn thread_root(&self) -> &str {
        if self.is_thread_reply() {
            self.thread_key.as_deref().unwrap_or(&self.message_id)
        } else {
            &self.message_id
        }
    }
}

/// 聊天网关
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// 发送一条消息，返回其 id；thread_key 为 Some 时发到该线程
    async fn send_message(
        &self,
        channel: &str,
        text: &str,
        thread_key: Option<&str>,
    ) -> Result<String, GatewayError>;

    /// 原地编辑已发送的消息
    async fn update_message(
        &self,
        channel: &str,
        message_id: &str,
        text: &str,
    ) -> Result<(), GatewayError>;
}
