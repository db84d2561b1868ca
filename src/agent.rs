//! 运行时装配
//!
//! 从 AppConfig 构建共享组件：参考时区时钟、LLM 后端、任务存储、聊天网关与编排器。
//! 缺少 Notion / Slack 凭据时分别退回内存存储与记录型网关，便于本地试跑。

use std::sync::Arc;

use anyhow::Context;

use crate::capture::{CaptureOrchestrator, OrchestratorSettings};
use crate::config::AppConfig;
use crate::core::{parse_timezone, Clock, SystemClock};
use crate::integrations::{ChatGateway, RecordingGateway};
use crate::llm::{create_llm_from_config, LlmClient};
use crate::scheduler::DigestScheduler;
use crate::store::{InMemoryTaskStore, NotionStore, TaskStore};

/// 预构建的运行时组件，多个请求共享
pub struct AppComponents {
    pub clock: Arc<dyn Clock>,
    pub llm: Arc<dyn LlmClient>,
    pub store: Arc<dyn TaskStore>,
    pub gateway: Arc<dyn ChatGateway>,
    pub orchestrator: Arc<CaptureOrchestrator>,
}

impl AppComponents {
    /// 定时摘要（未启用时为 None）
    pub fn digest_scheduler(&self, cfg: &AppConfig) -> anyhow::Result<Option<DigestScheduler>> {
        DigestScheduler::from_config(
            &cfg.digest,
            self.store.clone(),
            self.gateway.clone(),
            self.clock.clone(),
        )
        .context("Invalid digest configuration")
    }
}

/// 按配置创建全部组件
pub fn create_app_components(cfg: &AppConfig) -> anyhow::Result<AppComponents> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(parse_timezone(&cfg.app.timezone)));
    let llm = create_llm_from_config(cfg);
    let store = create_store(cfg)?;
    let gateway = create_gateway(cfg)?;
    Ok(assemble(cfg, clock, llm, store, gateway))
}

/// 用给定依赖组装编排器（测试注入脚本化 LLM 与内存存储）
pub fn assemble(
    cfg: &AppConfig,
    clock: Arc<dyn Clock>,
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn TaskStore>,
    gateway: Arc<dyn ChatGateway>,
) -> AppComponents {
    let orchestrator = Arc::new(CaptureOrchestrator::new(
        llm.clone(),
        store.clone(),
        gateway.clone(),
        clock.clone(),
        OrchestratorSettings::from(cfg),
    ));
    AppComponents {
        clock,
        llm,
        store,
        gateway,
        orchestrator,
    }
}

fn create_store(cfg: &AppConfig) -> anyhow::Result<Arc<dyn TaskStore>> {
    match (cfg.notion.token(), cfg.notion.database_id()) {
        (Some(token), Some(database_id)) => {
            let store = NotionStore::new(&cfg.notion, token, database_id)
                .context("Failed to create Notion store")?;
            tracing::info!("Using Notion task store");
            Ok(Arc::new(store))
        }
        _ => {
            tracing::warn!("NOTION_TOKEN / NOTION_DATABASE_ID not set, tasks are kept in memory only");
            Ok(Arc::new(InMemoryTaskStore::new()))
        }
    }
}

#[cfg(feature = "slack")]
fn create_gateway(cfg: &AppConfig) -> anyhow::Result<Arc<dyn ChatGateway>> {
    match cfg.slack.bot_token() {
        Some(token) => {
            let gateway = crate::integrations::slack::SlackGateway::new(&cfg.slack, token)
                .context("Failed to create Slack gateway")?;
            Ok(Arc::new(gateway))
        }
        None => {
            tracing::warn!("SLACK_BOT_TOKEN not set, replies are recorded but not delivered");
            Ok(Arc::new(RecordingGateway::new()))
        }
    }
}

#[cfg(not(feature = "slack"))]
fn create_gateway(_cfg: &AppConfig) -> anyhow::Result<Arc<dyn ChatGateway>> {
    tracing::warn!("Built without the slack feature, replies are recorded but not delivered");
    Ok(Arc::new(RecordingGateway::new()))
}
