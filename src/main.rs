//! Taskbee 服务入口
//!
//! 初始化日志与配置，装配组件，启动 Slack Webhook 服务与定时摘要，Ctrl-C 后优雅退出。
//!
//! 环境变量:
//! - SLACK_BOT_TOKEN / SLACK_SIGNING_SECRET: Slack 应用凭据
//! - NOTION_TOKEN / NOTION_DATABASE_ID: Notion 任务库
//! - DEEPSEEK_API_KEY 或 OPENAI_API_KEY: LLM API Key
//! - TASKBEE__*: 覆盖 config/default.toml 中的任意键

use anyhow::Context;
use taskbee::agent::create_app_components;
use taskbee::config::load_config;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskbee::observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;
    let components = create_app_components(&cfg)?;

    let cancel = CancellationToken::new();
    let scheduler = match components.digest_scheduler(&cfg)? {
        Some(s) => Some(tokio::spawn(s.run(cancel.clone()))),
        None => {
            tracing::info!("digest scheduler disabled");
            None
        }
    };

    serve(&cfg, &components, cancel.clone()).await?;

    cancel.cancel();
    if let Some(handle) = scheduler {
        let _ = handle.await;
    }
    tracing::info!("taskbee stopped");
    Ok(())
}

#[cfg(feature = "slack")]
async fn serve(
    cfg: &taskbee::config::AppConfig,
    components: &taskbee::agent::AppComponents,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    use std::sync::Arc;
    use taskbee::integrations::slack::{create_router, SlackState};

    let state = Arc::new(SlackState::new(
        components.orchestrator.clone(),
        cfg.slack.signing_secret(),
        cfg.slack.max_signature_age_secs,
    ));
    let app = create_router(state);

    let addr: std::net::SocketAddr = cfg
        .app
        .bind_addr
        .parse()
        .with_context(|| format!("Invalid bind address {:?}", cfg.app.bind_addr))?;
    tracing::info!("{} listening on http://{}", cfg.app.name, addr);
    tracing::info!("Slack event URL: http://YOUR_HOST:{}/slack/events", addr.port());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down...");
            cancel.cancel();
        })
        .await?;
    Ok(())
}

#[cfg(not(feature = "slack"))]
async fn serve(
    _cfg: &taskbee::config::AppConfig,
    _components: &taskbee::agent::AppComponents,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    tracing::warn!("Built without the slack feature, no inbound endpoint; press Ctrl-C to exit");
    tokio::signal::ctrl_c().await?;
    cancel.cancel();
    Ok(())
}
