//! 单条状态消息：处理过程中的所有进度都编辑到同一条外发消息上
//!
//! 编辑是尽力而为的：失败只记日志。首次发送失败时，后续 update 会再尝试发送一次。

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::integrations::ChatGateway;

pub const THINKING: &str = "⏳ Thinking…";

pub struct StatusMessage {
    gateway: Arc<dyn ChatGateway>,
    channel: String,
    thread_key: Option<String>,
    message_id: Mutex<Option<String>>,
}

impl StatusMessage {
    /// 发出初始状态；发送失败不报错，留待下一次 update 重试
    pub async fn open(
        gateway: Arc<dyn ChatGateway>,
        channel: &str,
        thread_key: Option<&str>,
        text: &str,
    ) -> Self {
        let status = Self {
            gateway,
            channel: channel.to_string(),
            thread_key: thread_key.map(String::from),
            message_id: Mutex::new(None),
        };
        status.update(text).await;
        status
    }

    pub async fn update(&self, text: &str) {
        let mut id = self.message_id.lock().await;
        match id.as_deref() {
            Some(message_id) => {
                if let Err(e) = self
                    .gateway
                    .update_message(&self.channel, message_id, text)
                    .await
                {
                    tracing::warn!(channel = %self.channel, "status update failed: {}", e);
                }
            }
            None => match self
                .gateway
                .send_message(&self.channel, text, self.thread_key.as_deref())
                .await
            {
                Ok(new_id) => *id = Some(new_id),
                Err(e) => tracing::warn!(channel = %self.channel, "status send failed: {}", e),
            },
        }
    }

    pub async fn message_id(&self) -> Option<String> {
        self.message_id.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::RecordingGateway;

    #[tokio::test]
    async fn test_updates_edit_one_message() {
        let g = Arc::new(RecordingGateway::new());
        let status = StatusMessage::open(g.clone(), "C1", Some("1.0"), THINKING).await;
        status.update("🔍 Searching tasks…").await;
        status.update("✅ Done").await;
        assert_eq!(g.sent_count(), 1);
        let id = status.message_id().await.unwrap();
        assert_eq!(g.current_text(&id).as_deref(), Some("✅ Done"));
    }

    #[tokio::test]
    async fn test_failed_open_retries_on_update() {
        let g = Arc::new(RecordingGateway::new());
        g.fail_sends(true);
        let status = StatusMessage::open(g.clone(), "C1", None, THINKING).await;
        assert!(status.message_id().await.is_none());
        g.fail_sends(false);
        status.update("✅ Done").await;
        assert_eq!(g.final_texts(), vec!["✅ Done".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_edit_is_not_fatal() {
        let g = Arc::new(RecordingGateway::new());
        let status = StatusMessage::open(g.clone(), "C1", None, THINKING).await;
        g.fail_updates(true);
        status.update("never shown").await;
        assert_eq!(g.final_texts(), vec![THINKING.to_string()]);
    }
}
