//! 外部集成：聊天网关抽象、Slack（需 slack feature 与公网 Webhook 域名）、记录型网关

pub mod gateway;
pub mod recording;

#[cfg(feature = "slack")]
pub mod slack;

pub use gateway::{ChatGateway, GatewayError, InboundMessage};
pub use recording::{GatewayCall, RecordingGateway};
