use serde::{Deserialize, Serialize};

const SECOND_MS: i64 = 1_000;
const MINUTE_MS: i64 = 60 * SECOND_MS;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Discrete recency label computed from the last-active timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityBucket {
    #[serde(rename = "online_now")]
    OnlineNow,
    #[serde(rename = "active_10s")]
    Active10s,
    #[serde(rename = "active_1m")]
    Active1m,
    #[serde(rename = "active_5m")]
    Active5m,
    #[serde(rename = "active_15m")]
    Active15m,
    #[serde(rename = "active_1h")]
    Active1h,
    #[serde(rename = "active_today")]
    ActiveToday,
    #[serde(rename = "inactive")]
    Inactive,
}

/// 根据 now - last_active 计算活跃度分档; online 时强制为 OnlineNow
pub fn bucket_for(online: bool, last_active_ms: Option<i64>, now_ms: i64) -> ActivityBucket {
    if online {
        return ActivityBucket::OnlineNow;
    }

    let Some(last_active) = last_active_ms else {
        return ActivityBucket::Inactive;
    };

    let elapsed = now_ms.saturating_sub(last_active);
    match elapsed {
        e if e < 10 * SECOND_MS => ActivityBucket::Active10s,
        e if e < MINUTE_MS => ActivityBucket::Active1m,
        e if e < 5 * MINUTE_MS => ActivityBucket::Active5m,
        e if e < 15 * MINUTE_MS => ActivityBucket::Active15m,
        e if e < HOUR_MS => ActivityBucket::Active1h,
        e if e < DAY_MS => ActivityBucket::ActiveToday,
        _ => ActivityBucket::Inactive,
    }
}
