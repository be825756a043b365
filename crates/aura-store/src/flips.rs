//! Targeted publication of online/offline transitions.
//!
//! Two routing modes share one payload format. Sharded broadcast hashes
//! the user onto a fixed set of channels every server subscribes to;
//! targeted fan-out publishes once per interested server, read from the
//! watcher index. Publication is best-effort — observers reconcile by
//! snapshot poll.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Result, WatcherIndex, backend::StoreBackend};

use aura_core::utils::now_millis;

/// 跨服务端翻转事件载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlipPayload {
    pub user: String,
    pub online: bool,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingMode {
    Sharded,
    Targeted,
}

impl RoutingMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sharded" => Some(Self::Sharded),
            "targeted" => Some(Self::Targeted),
            _ => None,
        }
    }
}

pub fn shard_channel(index: u32) -> String {
    format!("presence:flip:{index}")
}

pub fn server_channel(server_id: &str) -> String {
    format!("presence:server:{server_id}")
}

/// CRC32 取模, 所有服务端对同一 user 算出同一分片
pub fn shard_index(user: &str, shard_count: u32) -> u32 {
    crc32fast::hash(user.as_bytes()) % shard_count.max(1)
}

pub struct FlipPublisher {
    store: Arc<dyn StoreBackend>,
    mode: RoutingMode,
    shard_count: u32,
    watchers: WatcherIndex,
}

impl FlipPublisher {
    pub fn new(
        store: Arc<dyn StoreBackend>,
        mode: RoutingMode,
        shard_count: u32,
        watchers: WatcherIndex,
    ) -> Self {
        Self {
            store,
            mode,
            shard_count,
            watchers,
        }
    }

    pub fn mode(&self) -> RoutingMode {
        self.mode
    }

    /// Publish one flip. In targeted mode an empty watcher set skips the
    /// publish entirely.
    pub async fn publish(&self, user: &str, online: bool) -> Result<()> {
        let payload = serde_json::to_string(&FlipPayload {
            user: user.to_string(),
            online,
            timestamp_ms: now_millis(),
        })?;

        match self.mode {
            RoutingMode::Sharded => {
                let channel = shard_channel(shard_index(user, self.shard_count));
                self.store.publish(&channel, &payload).await?;
            }
            RoutingMode::Targeted => {
                let servers = self.watchers.watchers_of(user).await?;
                if servers.is_empty() {
                    debug!("No watchers for {}, skipping flip publish", user);
                    return Ok(());
                }
                for server_id in servers {
                    self.store
                        .publish(&server_channel(&server_id), &payload)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// 本服务端按路由模式应当订阅的频道
    pub fn subscription_channels(&self, server_id: &str) -> Vec<String> {
        match self.mode {
            RoutingMode::Sharded => (0..self.shard_count.max(1)).map(shard_channel).collect(),
            RoutingMode::Targeted => vec![server_channel(server_id)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStore, StoreBackend};

    fn publisher(store: Arc<MemoryStore>, mode: RoutingMode, shards: u32) -> FlipPublisher {
        let watchers = WatcherIndex::new(store.clone(), 60);
        FlipPublisher::new(store, mode, shards, watchers)
    }

    #[test]
    fn shard_index_is_stable_and_bounded() {
        let a = shard_index("a@x.io", 32);
        assert_eq!(a, shard_index("a@x.io", 32));
        for user in ["a@x.io", "b@x.io", "c@y.io"] {
            assert!(shard_index(user, 32) < 32);
        }
        // shard_count 0 按 1 处理
        assert_eq!(shard_index("a@x.io", 0), 0);
    }

    #[tokio::test]
    async fn sharded_mode_publishes_to_the_users_shard() {
        let store = Arc::new(MemoryStore::new());
        let publisher = publisher(store.clone(), RoutingMode::Sharded, 4);

        let channel = shard_channel(shard_index("a@x.io", 4));
        let mut rx = store.subscribe(vec![channel]).await.unwrap();

        publisher.publish("a@x.io", true).await.unwrap();

        let msg = rx.recv().await.unwrap();
        let flip: FlipPayload = serde_json::from_str(&msg.payload).unwrap();
        assert_eq!(flip.user, "a@x.io");
        assert!(flip.online);
    }

    #[tokio::test]
    async fn targeted_mode_reaches_interested_servers_only() {
        let store = Arc::new(MemoryStore::new());
        let publisher = publisher(store.clone(), RoutingMode::Targeted, 1);

        let watchers = WatcherIndex::new(store.clone(), 60);
        watchers
            .add_watchers(&["a@x.io".to_string()], "s-interested")
            .await
            .unwrap();

        let mut interested = store
            .subscribe(vec![server_channel("s-interested")])
            .await
            .unwrap();
        let mut other = store
            .subscribe(vec![server_channel("s-other")])
            .await
            .unwrap();

        publisher.publish("a@x.io", false).await.unwrap();

        let msg = interested.recv().await.unwrap();
        let flip: FlipPayload = serde_json::from_str(&msg.payload).unwrap();
        assert!(!flip.online);

        // 其他服务端的频道上没有任何消息
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(100), other.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn targeted_mode_skips_publish_without_watchers() {
        let store = Arc::new(MemoryStore::new());
        let publisher = publisher(store.clone(), RoutingMode::Targeted, 1);
        // 没有 watcher 时不报错, 直接跳过
        publisher.publish("lonely@x.io", true).await.unwrap();
    }

    #[test]
    fn subscription_channels_follow_mode() {
        let store = Arc::new(MemoryStore::new());
        let sharded = publisher(store.clone(), RoutingMode::Sharded, 3);
        assert_eq!(
            sharded.subscription_channels("s1"),
            vec!["presence:flip:0", "presence:flip:1", "presence:flip:2"]
        );

        let targeted = publisher(store, RoutingMode::Targeted, 3);
        assert_eq!(
            targeted.subscription_channels("s1"),
            vec!["presence:server:s1"]
        );
    }
}
