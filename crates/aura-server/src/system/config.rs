use anyhow::bail;
use serde::{Deserialize, Serialize};

use aura_store::RoutingMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuraSystemConfig {
    pub server_id: String,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_presence_ttl_seconds")]
    pub presence_ttl_seconds: u64,
    #[serde(default = "default_max_focus_per_client")]
    pub max_focus_per_client: usize,
    #[serde(default = "default_focus_rate_limit_per_minute")]
    pub focus_rate_limit_per_minute: u32,
    #[serde(default = "default_max_connections_per_ip")]
    pub max_connections_per_ip: u32,
    #[serde(default = "default_presence_shard_count")]
    pub presence_shard_count: u32,
    #[serde(default = "default_watcher_ttl_seconds")]
    pub watcher_ttl_seconds: u64,
    #[serde(default = "default_routing_mode")]
    pub routing_mode: String,
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}
fn default_presence_ttl_seconds() -> u64 {
    90
}
fn default_max_focus_per_client() -> usize {
    100
}
fn default_focus_rate_limit_per_minute() -> u32 {
    60
}
fn default_max_connections_per_ip() -> u32 {
    10
}
fn default_presence_shard_count() -> u32 {
    1
}
fn default_watcher_ttl_seconds() -> u64 {
    120
}
fn default_routing_mode() -> String {
    "sharded".to_string()
}

impl AuraSystemConfig {
    pub fn from_id(server_id: &str) -> Self {
        Self {
            server_id: server_id.to_string(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            presence_ttl_seconds: default_presence_ttl_seconds(),
            max_focus_per_client: default_max_focus_per_client(),
            focus_rate_limit_per_minute: default_focus_rate_limit_per_minute(),
            max_connections_per_ip: default_max_connections_per_ip(),
            presence_shard_count: default_presence_shard_count(),
            watcher_ttl_seconds: default_watcher_ttl_seconds(),
            routing_mode: default_routing_mode(),
        }
    }

    /// 启动期校验: TTL 必须大于 2 倍心跳, 否则正常会话也会掉线
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server_id.is_empty() {
            bail!("server_id cannot be empty");
        }
        if self.presence_ttl_seconds * 1000 <= 2 * self.heartbeat_interval_ms {
            bail!(
                "presence_ttl_seconds ({}) must exceed 2x heartbeat_interval_ms ({})",
                self.presence_ttl_seconds,
                self.heartbeat_interval_ms
            );
        }
        if RoutingMode::parse(&self.routing_mode).is_none() {
            bail!("invalid routing_mode: {}", self.routing_mode);
        }
        Ok(())
    }

    pub fn routing(&self) -> RoutingMode {
        RoutingMode::parse(&self.routing_mode).unwrap_or(RoutingMode::Sharded)
    }

    /// 每会话 refresh 冷却 = TTL 的一半, 保证续期频率 O(1/TTL)
    pub fn refresh_cooldown_ms(&self) -> i64 {
        (self.presence_ttl_seconds * 1000 / 2) as i64
    }
}
