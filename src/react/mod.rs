//! 智能体循环：提供方 <-> 工具的有界多轮对话

pub mod events;
pub mod loop_;

pub use events::LoopEvent;
pub use loop_::{AgenticLoop, LoopOutcome, DEFAULT_MAX_ITERATIONS};
