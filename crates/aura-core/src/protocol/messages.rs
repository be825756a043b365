//! Wire protocol for the session transport.
//!
//! Messages are UTF-8 JSON text, discriminated by a `type` field. One
//! message per transport frame; there is no length framing on top of the
//! transport's own.

use serde::{Deserialize, Serialize};

use super::bucket::ActivityBucket;

/// 客户端 → 服务端
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth { user: String },
    Focus { users: Vec<String> },
    Blur { users: Vec<String> },
    Ping,
}

/// 服务端 → 客户端
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthOk {
        user: String,
        server_id: String,
        heartbeat_ms: u64,
        ttl_seconds: u64,
        last_seen_ms: Option<i64>,
    },
    FocusOk {
        statuses: Vec<PresenceStatus>,
    },
    BlurOk,
    Pong,
    PresenceUpdate {
        user: String,
        online: bool,
        timestamp_ms: i64,
    },
    Error {
        message: String,
    },
}

/// Snapshot entry for a single user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceStatus {
    pub user: String,
    pub online: bool,
    pub last_active_ms: Option<i64>,
    pub bucket: ActivityBucket,
}
