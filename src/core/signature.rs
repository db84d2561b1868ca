//! 上下文签名（context signature）的本地兜底
//!
//! 模型没有返回签名时，用输入文本（单条提取模式下再加时间戳）的 SHA-256 派生一个本地签名。
//! 只保证不同文本不碰撞，不追求全局唯一。

use sha2::{Digest, Sha256};

/// 本地签名前缀，便于在日志里区分模型签名与兜底签名
pub const LOCAL_SIGNATURE_PREFIX: &str = "local-";

/// 由输入文本（及可选时间戳）派生兜底签名
pub fn fallback_signature(text: &str, timestamp_millis: Option<i64>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    if let Some(ts) = timestamp_millis {
        hasher.update(b":");
        hasher.update(ts.to_string().as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    format!("{}{}", LOCAL_SIGNATURE_PREFIX, &digest[..16])
}

/// 是否为本地兜底签名
pub fn is_local_signature(signature: &str) -> bool {
    signature.starts_with(LOCAL_SIGNATURE_PREFIX)
}
