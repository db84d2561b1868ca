//! 捕获层：线程回复分类、决策应用、提取模式流程、状态消息与顶层编排

pub mod apply;
pub mod classifier;
pub mod extraction_flow;
pub mod orchestrator;
pub mod status;

pub use apply::apply_decision;
pub use classifier::{
    keyword_rules, TaskSnapshot, TaskUpdates, ThreadDecision, ThreadUpdateClassifier, UpdateAction,
};
pub use extraction_flow::ExtractionFlow;
pub use orchestrator::{CaptureOrchestrator, OrchestratorSettings, Route};
pub use status::{StatusMessage, THINKING};
