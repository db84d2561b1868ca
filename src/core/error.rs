//! 编排层错误类型
//!
//! 只有「编排层失败」才会以 TaskbeeError 的形式向上传播；工具失败会被转成 ToolResult::Error 喂回模型，
//! 解析失败在多条提取路径上降级为本地兜底，不会出现在这里。

use thiserror::Error;

use crate::integrations::GatewayError;
use crate::llm::LlmError;
use crate::store::StoreError;

/// 处理单条入站消息时可能出现的错误
#[derive(Error, Debug)]
pub enum TaskbeeError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Chat gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    /// 找不到可更新/删除的目标，或线程没有关联任务（直接提示用户，不重试）
    #[error("Lookup miss: {0}")]
    LookupMiss(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl TaskbeeError {
    /// 是否属于「查找未命中」类错误（展示为警告而不是通用失败）
    pub fn is_lookup_miss(&self) -> bool {
        matches!(self, TaskbeeError::LookupMiss(_))
    }
}
