//! 核心公共件：错误、参考时区时钟、上下文签名兜底、按任务串行化

pub mod clock;
pub mod error;
pub mod locks;
pub mod signature;

pub use clock::{describe_now, parse_timezone, Clock, FixedClock, SystemClock};
pub use error::TaskbeeError;
pub use locks::{TaskLockGuard, TaskLocks};
pub use signature::{fallback_signature, is_local_signature};
