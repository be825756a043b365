use std::sync::Arc;

use crate::{Result, backend::StoreBackend};

pub(crate) fn watcher_key(user: &str) -> String {
    format!("presence:watchers:{user}")
}

/// Per-user set of server ids with at least one local session focused on
/// that user (targeted routing mode only). Membership carries a TTL so
/// entries left behind by crashed servers self-evict; it is a routing
/// hint, not a guarantee.
pub struct WatcherIndex {
    store: Arc<dyn StoreBackend>,
    ttl_secs: u64,
}

impl WatcherIndex {
    pub fn new(store: Arc<dyn StoreBackend>, ttl_secs: u64) -> Self {
        Self { store, ttl_secs }
    }

    /// 一个管道内把本服务端加入所有 user 的 watcher 集, 同时重置存活期
    pub async fn add_watchers(&self, users: &[String], server_id: &str) -> Result<()> {
        let keys: Vec<String> = users.iter().map(|u| watcher_key(u)).collect();
        self.store
            .expiring_set_add(&keys, server_id, self.ttl_secs)
            .await
    }

    pub async fn remove_watchers(&self, users: &[String], server_id: &str) -> Result<()> {
        let keys: Vec<String> = users.iter().map(|u| watcher_key(u)).collect();
        self.store.expiring_set_remove(&keys, server_id).await
    }

    pub async fn watchers_of(&self, user: &str) -> Result<Vec<String>> {
        self.store.expiring_set_members(&watcher_key(user)).await
    }
}
