use std::time::{Duration, SystemTime, UNIX_EPOCH};

use uuid::Uuid;

pub fn new_uuid() -> u128 {
    Uuid::new_v4().as_u128()
}

/// 生成一个新的服务端 id
pub fn new_server_id() -> String {
    format!("aura-{}", Uuid::new_v4().simple())
}

/// 获取当前秒数，如果时间早于 UNIX_EPOCH，则返回 0
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// 获取当前毫秒，如果时间早于 UNIX_EPOCH，则返回 0
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as i64
}
