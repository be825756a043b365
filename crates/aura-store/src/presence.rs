use std::sync::Arc;

use tracing::debug;

use crate::{
    Result,
    backend::{PipeCmd, StoreBackend},
};

use aura_core::utils::now_millis;

pub(crate) fn presence_key(user: &str) -> String {
    format!("presence:user:{user}")
}

pub(crate) fn seen_key(user: &str) -> String {
    format!("presence:seen:{user}")
}

pub(crate) fn active_key(user: &str) -> String {
    format!("presence:active:{user}")
}

/// Result of [`PresenceRegistry::claim_online`].
#[derive(Debug, Clone)]
pub struct ClaimOutcome {
    /// 抢占前 key 不存在, 即触发了 offline → online 翻转
    pub became_online: bool,
    pub last_seen_ms: Option<i64>,
}

/// Authoritative online truth: one TTL key per user, valued with the id of
/// the server that most recently claimed it. Only the stored owner can
/// extend or delete the key (script-guarded), so cross-server reconnects
/// need no lock — the loser's next refresh simply fails.
pub struct PresenceRegistry {
    store: Arc<dyn StoreBackend>,
    ttl_secs: u64,
}

impl PresenceRegistry {
    pub fn new(store: Arc<dyn StoreBackend>, ttl_secs: u64) -> Self {
        Self { store, ttl_secs }
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    pub(crate) fn store(&self) -> &Arc<dyn StoreBackend> {
        &self.store
    }

    /// 抢占在线 key, 同一管道里顺带更新 last-active 并读回 last-seen
    pub async fn claim_online(&self, user: &str, server_id: &str) -> Result<ClaimOutcome> {
        let prev = self
            .store
            .set_with_ttl_get_prev(&presence_key(user), server_id, self.ttl_secs)
            .await?;

        let results = self
            .store
            .pipeline(vec![
                PipeCmd::Set {
                    key: active_key(user),
                    value: now_millis().to_string(),
                },
                PipeCmd::Get {
                    key: seen_key(user),
                },
            ])
            .await?;

        let last_seen_ms = results
            .into_iter()
            .nth(1)
            .flatten()
            .and_then(|s| s.parse().ok());

        Ok(ClaimOutcome {
            became_online: prev.is_none(),
            last_seen_ms,
        })
    }

    /// 仅当本服务端仍持有 key 时续期; false 表示所有权已被他人接管或已过期
    pub async fn refresh(&self, user: &str, server_id: &str) -> Result<bool> {
        let refreshed = self
            .store
            .expire_if_equal(&presence_key(user), server_id, self.ttl_secs)
            .await?;

        if refreshed {
            self.store
                .set(&active_key(user), &now_millis().to_string())
                .await?;
        } else {
            debug!("Refresh for {} lost to another owner", user);
        }

        Ok(refreshed)
    }

    /// Record last-seen, then delete the presence key iff still owned.
    /// The boolean is the `became_offline` signal: `true` means this call
    /// performed the clean offline transition.
    pub async fn release_if_owned(&self, user: &str, server_id: &str) -> Result<bool> {
        self.store
            .set(&seen_key(user), &now_millis().to_string())
            .await?;

        self.store
            .delete_if_equal(&presence_key(user), server_id)
            .await
    }

    pub async fn is_online(&self, user: &str) -> Result<bool> {
        self.store.exists(&presence_key(user)).await
    }

    pub async fn owner_of(&self, user: &str) -> Result<Option<String>> {
        self.store.get(&presence_key(user)).await
    }
}
