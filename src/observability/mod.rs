//! 日志初始化：默认 info，可通过 RUST_LOG 覆盖（如 RUST_LOG=taskbee=debug）

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // 测试或重复初始化时忽略「已设置全局订阅者」错误
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}
