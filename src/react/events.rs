//! 智能体循环过程事件：供编排层把进度实时编辑到状态消息里

use serde::Serialize;

/// 单步过程事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    /// 第几轮调用提供方（从 1 开始）
    ProviderTurn { iteration: usize, max_iterations: usize },
    /// 即将执行工具
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation { tool: String, preview: String },
    /// 工具返回了错误结果（已回填给模型）
    ToolFailure { tool: String, reason: String },
    /// 达到轮数上限
    CapReached { iterations: usize },
}

impl LoopEvent {
    /// 仅 ToolCall 事件需要展示给用户
    pub fn is_tool_call(&self) -> bool {
        matches!(self, LoopEvent::ToolCall { .. })
    }
}
