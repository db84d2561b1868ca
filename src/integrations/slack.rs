//! Slack 集成
//!
//! - SlackGateway：Web API 客户端（chat.postMessage / chat.update），实现 ChatGateway
//! - create_router：Events API Webhook（签名校验、url_verification、事件去重），消息交给编排器后台处理
//!
//! Slack 要求 Webhook 在 3 秒内返回 200，否则判失败并重试；这里解析事件后立即返回，耗时处理在后台执行。

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use hmac::{Hmac, Mac};
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use tokio::sync::RwLock;

use crate::capture::CaptureOrchestrator;
use crate::config::SlackSection;
use crate::integrations::gateway::{ChatGateway, GatewayError, InboundMessage};

/// 去重缓存上限，超过即清空
const MAX_PROCESSED_EVENTS: usize = 10_000;
/// Slack 单条消息文本上限
const MAX_TEXT_CHARS: usize = 3900;

/// Slack Web API 客户端
pub struct SlackGateway {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

impl SlackGateway {
    pub fn new(cfg: &SlackSection, token: String) -> Result<Self, GatewayError> {
        if token.trim().is_empty() {
            return Err(GatewayError::Config("Slack bot token is empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn call(&self, method: &str, body: Value) -> Result<Value, GatewayError> {
        let url = format!("{}/{}", self.api_base, method);
        let resp: Value = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        if resp["ok"].as_bool() != Some(true) {
            let err = resp["error"].as_str().unwrap_or("unknown_error");
            return Err(GatewayError::Api(format!("{}: {}", method, err)));
        }
        Ok(resp)
    }
}

fn clip(text: &str) -> String {
    if text.chars().count() <= MAX_TEXT_CHARS {
        text.to_string()
    } else {
        format!("{}…", text.chars().take(MAX_TEXT_CHARS).collect::<String>())
    }
}

#[async_trait]
impl ChatGateway for SlackGateway {
    async fn send_message(
        &self,
        channel: &str,
        text: &str,
        thread_key: Option<&str>,
    ) -> Result<String, GatewayError> {
        let mut body = json!({ "channel": channel, "text": clip(text) });
        if let Some(ts) = thread_key {
            body["thread_ts"] = json!(ts);
        }
        let resp = self.call("chat.postMessage", body).await?;
        resp["ts"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| GatewayError::Api("chat.postMessage: no ts in response".to_string()))
    }

    async fn update_message(
        &self,
        channel: &str,
        message_id: &str,
        text: &str,
    ) -> Result<(), GatewayError> {
        self.call(
            "chat.update",
            json!({ "channel": channel, "ts": message_id, "text": clip(text) }),
        )
        .await
        .map(|_| ())
    }
}

/// 校验 Slack 请求签名：v0=HMAC-SHA256(secret, "v0:{timestamp}:{body}")，时间戳超出 max_age 秒视为重放
pub fn verify_signature(
    secret: &str,
    timestamp: &str,
    body: &[u8],
    signature: &str,
    now_secs: i64,
    max_age_secs: i64,
) -> bool {
    let Ok(ts) = timestamp.trim().parse::<i64>() else {
        return false;
    };
    if now_secs.abs_diff(ts) > max_age_secs.max(0) as u64 {
        return false;
    }
    let Some(hex_sig) = signature.trim().strip_prefix("v0=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(format!("v0:{}:", ts).as_bytes());
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Events API 请求体
#[derive(Debug, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub challenge: Option<String>,
    pub event_id: Option<String>,
    pub event: Option<SlackEvent>,
}

/// 消息事件
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackEvent {
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub channel: Option<String>,
    pub user: Option<String>,
    pub text: Option<String>,
    pub ts: Option<String>,
    pub thread_ts: Option<String>,
    pub bot_id: Option<String>,
    pub subtype: Option<String>,
}

impl SlackEvent {
    /// 转为入站消息；机器人消息、编辑/删除等带 subtype 的消息返回 None
    pub fn to_inbound(&self) -> Option<InboundMessage> {
        if !matches!(self.type_.as_deref(), Some("message") | Some("app_mention")) {
            return None;
        }
        if self.bot_id.is_some() || self.subtype.is_some() {
            return None;
        }
        let text = strip_mentions(self.text.as_deref()?);
        let mut msg = InboundMessage::new(
            self.channel.clone()?,
            self.user.clone().unwrap_or_default(),
            text,
            self.ts.clone()?,
        );
        msg.thread_key = self.thread_ts.clone();
        Some(msg)
    }
}

static MENTION_RE: OnceLock<Regex> = OnceLock::new();

/// 去掉 <@U123> 形式的提及
fn strip_mentions(s: &str) -> String {
    let re = MENTION_RE.get_or_init(|| Regex::new(r"<@[A-Z0-9]+(?:\|[^>]*)?>\s*").expect("valid regex"));
    re.replace_all(s, "").trim().to_string()
}

/// Webhook 服务状态
pub struct SlackState {
    pub orchestrator: Arc<CaptureOrchestrator>,
    /// 未配置时跳过签名校验（仅用于本地调试）
    pub signing_secret: Option<String>,
    pub max_signature_age_secs: i64,
    processed: RwLock<HashSet<String>>,
}

impl SlackState {
    pub fn new(
        orchestrator: Arc<CaptureOrchestrator>,
        signing_secret: Option<String>,
        max_signature_age_secs: i64,
    ) -> Self {
        if signing_secret.is_none() {
            tracing::warn!("Slack signing secret not set, request signatures are NOT verified");
        }
        Self {
            orchestrator,
            signing_secret,
            max_signature_age_secs,
            processed: RwLock::new(HashSet::new()),
        }
    }

    /// 记录一个事件 key；已处理过返回 false
    pub async fn remember(&self, key: &str) -> bool {
        let mut processed = self.processed.write().await;
        if processed.contains(key) {
            return false;
        }
        if processed.len() >= MAX_PROCESSED_EVENTS {
            processed.clear();
        }
        processed.insert(key.to_string());
        true
    }

    fn verify(&self, headers: &HeaderMap, body: &[u8]) -> bool {
        let Some(secret) = self.signing_secret.as_deref() else {
            return true;
        };
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("");
        verify_signature(
            secret,
            header("x-slack-request-timestamp"),
            body,
            header("x-slack-signature"),
            chrono::Utc::now().timestamp(),
            self.max_signature_age_secs,
        )
    }
}

/// 创建 Slack 路由
pub fn create_router(state: Arc<SlackState>) -> Router {
    Router::new()
        .route("/slack/events", post(events_handler))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}

/// POST /slack/events
async fn events_handler(
    State(state): State<Arc<SlackState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, StatusCode> {
    if !state.verify(&headers, &body) {
        tracing::warn!("Slack webhook: signature check failed");
        return Err(StatusCode::UNAUTHORIZED);
    }
    let envelope: EventEnvelope = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!("Slack webhook: bad payload: {}", e);
        StatusCode::BAD_REQUEST
    })?;

    match envelope.type_.as_deref() {
        Some("url_verification") => {
            let challenge = envelope.challenge.ok_or(StatusCode::BAD_REQUEST)?;
            return Ok(Json(json!({ "challenge": challenge })));
        }
        Some("event_callback") => {}
        other => {
            tracing::info!("Slack webhook: envelope type {:?} ignored", other);
            return Ok(Json(json!({})));
        }
    }

    let Some(msg) = envelope.event.as_ref().and_then(SlackEvent::to_inbound) else {
        return Ok(Json(json!({})));
    };

    // 同一条消息可能同时以 message 与 app_mention 两个事件到达，按消息去重
    let message_key = format!("{}:{}", msg.channel, msg.message_id);
    if let Some(event_id) = envelope.event_id.as_deref() {
        if !state.remember(event_id).await {
            tracing::debug!("Duplicate event ignored: {}", event_id);
            return Ok(Json(json!({})));
        }
    }
    if !state.remember(&message_key).await {
        tracing::debug!("Duplicate message ignored: {}", message_key);
        return Ok(Json(json!({})));
    }

    tracing::info!(
        channel = %msg.channel,
        body_len = msg.text.len(),
        "Slack webhook: accepted message, spawning background task"
    );
    state.orchestrator.spawn_handle(msg);
    Ok(Json(json!({})))
}
