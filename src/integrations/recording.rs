//! 记录型网关：不连任何平台，只把发送与编辑记下来（离线运行与测试用）

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::integrations::gateway::{ChatGateway, GatewayError};

/// 一次网关调用
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    Sent {
        channel: String,
        text: String,
        thread_key: Option<String>,
        message_id: String,
    },
    Updated {
        channel: String,
        message_id: String,
        text: String,
    },
}

#[derive(Default)]
pub struct RecordingGateway {
    calls: Mutex<Vec<GatewayCall>>,
    next_id: AtomicUsize,
    fail_sends: AtomicBool,
    fail_updates: AtomicBool,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后的 send_message 全部失败
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// 之后的 update_message 全部失败
    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// 发送过的消息条数
    pub fn sent_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, GatewayCall::Sent { .. }))
            .count()
    }

    /// 某条消息当前显示的文本（发送后又被编辑则取最后一次编辑）
    pub fn current_text(&self, message_id: &str) -> Option<String> {
        self.calls().iter().rev().find_map(|c| match c {
            GatewayCall::Updated { message_id: id, text, .. } if id == message_id => {
                Some(text.clone())
            }
            GatewayCall::Sent { message_id: id, text, .. } if id == message_id => {
                Some(text.clone())
            }
            _ => None,
        })
    }

    /// 所有发送过的消息的当前文本，按发送顺序
    pub fn final_texts(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| match c {
                GatewayCall::Sent { message_id, .. } => self.current_text(message_id),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: GatewayCall) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }
}

#[async_trait]
impl ChatGateway for RecordingGateway {
    async fn send_message(
        &self,
        channel: &str,
        text: &str,
        thread_key: Option<&str>,
    ) -> Result<String, GatewayError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(GatewayError::Http("send disabled".to_string()));
        }
        let message_id = format!("msg-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.record(GatewayCall::Sent {
            channel: channel.to_string(),
            text: text.to_string(),
            thread_key: thread_key.map(String::from),
            message_id: message_id.clone(),
        });
        Ok(message_id)
    }

    async fn update_message(
        &self,
        channel: &str,
        message_id: &str,
        text: &str,
    ) -> Result<(), GatewayError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(GatewayError::Http("update disabled".to_string()));
        }
        self.record(GatewayCall::Updated {
            channel: channel.to_string(),
            message_id: message_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}
