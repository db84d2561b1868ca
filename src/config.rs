//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TASKBEE__*` 覆盖（双下划线表示嵌套，如 `TASKBEE__AGENT__MODE=extraction`）。
//! 密钥类字段为空时再回落到惯用环境变量（SLACK_BOT_TOKEN、NOTION_TOKEN 等）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::llm::ThinkingLevel;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub slack: SlackSection,
    pub notion: NotionSection,
    pub digest: DigestSection,
}

/// [app] 段：应用名、参考时区、监听地址
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// IANA 时区名；相对日期与定时推送都按此时区解释
    pub timezone: String,
    pub bind_addr: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "taskbee".to_string(),
            timezone: "Asia/Shanghai".to_string(),
            bind_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

/// [llm] 段：后端选择、模型与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai；优先级由 API Key 与 provider 共同决定
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// 单次请求超时（秒），交给 HTTP 客户端
    pub timeout_secs: u64,
    /// 结构化提取的思考强度
    pub extraction_effort: ThinkingLevel,
    /// 线程回复分类的思考强度
    pub classification_effort: ThinkingLevel,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: None,
            base_url: None,
            timeout_secs: 60,
            extraction_effort: ThinkingLevel::Low,
            classification_effort: ThinkingLevel::Minimal,
        }
    }
}

/// 新消息的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// 智能体循环（工具调用）
    #[default]
    Agentic,
    /// 多条结构化提取，逐条按意图处理
    Extraction,
}

/// [agent] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub mode: AgentMode,
    /// 智能体循环最多调用提供方的轮数
    pub max_iterations: usize,
    /// 单次工具执行超时（秒）
    pub tool_timeout_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            mode: AgentMode::Agentic,
            max_iterations: 5,
            tool_timeout_secs: 30,
        }
    }
}

/// [slack] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SlackSection {
    pub bot_token: Option<String>,
    pub signing_secret: Option<String>,
    pub api_base: String,
    /// 请求时间戳允许的最大偏差（秒），防重放
    pub max_signature_age_secs: i64,
    pub timeout_secs: u64,
}

impl Default for SlackSection {
    fn default() -> Self {
        Self {
            bot_token: None,
            signing_secret: None,
            api_base: "https://slack.com/api".to_string(),
            max_signature_age_secs: 300,
            timeout_secs: 15,
        }
    }
}

impl SlackSection {
    pub fn bot_token(&self) -> Option<String> {
        non_empty_or_env(&self.bot_token, "SLACK_BOT_TOKEN")
    }

    pub fn signing_secret(&self) -> Option<String> {
        non_empty_or_env(&self.signing_secret, "SLACK_SIGNING_SECRET")
    }
}

/// [notion] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotionSection {
    pub token: Option<String>,
    pub database_id: Option<String>,
    pub base_url: String,
    /// 支持 data source 的新版 API 版本
    pub api_version: String,
    /// 旧版整库查询使用的 API 版本
    pub legacy_api_version: String,
    pub timeout_secs: u64,
}

impl Default for NotionSection {
    fn default() -> Self {
        Self {
            token: None,
            database_id: None,
            base_url: "https://api.notion.com".to_string(),
            api_version: "2025-09-03".to_string(),
            legacy_api_version: "2022-06-28".to_string(),
            timeout_secs: 30,
        }
    }
}

impl NotionSection {
    pub fn token(&self) -> Option<String> {
        non_empty_or_env(&self.token, "NOTION_TOKEN")
    }

    pub fn database_id(&self) -> Option<String> {
        non_empty_or_env(&self.database_id, "NOTION_DATABASE_ID")
    }
}

/// [[digest.jobs]]：推送任务名与时间（HH:MM，参考时区）
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DigestJobConfig {
    pub name: String,
    pub time: String,
}

/// [digest] 段：定时推送
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DigestSection {
    pub enabled: bool,
    /// 推送到的频道 id
    pub channel: Option<String>,
    pub jobs: Vec<DigestJobConfig>,
}

impl Default for DigestSection {
    fn default() -> Self {
        Self {
            enabled: false,
            channel: None,
            jobs: vec![
                DigestJobConfig {
                    name: "morning_digest".to_string(),
                    time: "08:30".to_string(),
                },
                DigestJobConfig {
                    name: "evening_review".to_string(),
                    time: "18:00".to_string(),
                },
            ],
        }
    }
}

fn non_empty_or_env(value: &Option<String>, env: &str) -> Option<String> {
    value
        .clone()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| std::env::var(env).ok().filter(|v| !v.trim().is_empty()))
}

/// 从 config 目录加载配置，环境变量 TASKBEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TASKBEE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TASKBEE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
