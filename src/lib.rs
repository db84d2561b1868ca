//! Taskbee - 对话式任务管家
//!
//! 模块划分：
//! - **agent**: 运行时装配（时钟、LLM、存储、网关、编排器）
//! - **capture**: 入站消息路由、线程回复分类、提取模式流程与状态消息
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、参考时区时钟、上下文签名兜底、按任务串行化
//! - **integrations**: 聊天网关抽象与 Slack Webhook
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **observability**: 日志初始化
//! - **parser**: 自由文本 -> 结构化任务提取（多级降级）
//! - **react**: 有界的智能体工具调用循环
//! - **scheduler**: 定时摘要推送
//! - **store**: 任务记录存储（Notion / 内存）
//! - **tools**: 任务工具声明、参数校验与分发

pub mod agent;
pub mod capture;
pub mod config;
pub mod core;
pub mod integrations;
pub mod llm;
pub mod observability;
pub mod parser;
pub mod react;
pub mod scheduler;
pub mod store;
pub mod tools;

pub use capture::CaptureOrchestrator;
pub use core::TaskbeeError;
