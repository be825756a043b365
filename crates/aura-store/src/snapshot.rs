//! Batched presence snapshot: one pipeline round trip for any list size.

use crate::{
    PresenceRegistry, Result, StoreError,
    backend::PipeCmd,
    presence::{active_key, presence_key},
};

use aura_core::{PresenceStatus, bucket_for, utils::now_millis};

/// 单次 snapshot 的最大用户数, 超出直接拒绝, 不产生任何 store 流量
pub const MAX_SNAPSHOT_BATCH: usize = 500;

impl PresenceRegistry {
    /// Current presence + activity bucket for every requested user.
    /// Issues exactly one pipelined round trip (a presence GET and a
    /// last-active GET per user) regardless of list length.
    pub async fn snapshot(&self, users: &[String]) -> Result<Vec<PresenceStatus>> {
        if users.len() > MAX_SNAPSHOT_BATCH {
            return Err(StoreError::BatchTooLarge {
                size: users.len(),
                max: MAX_SNAPSHOT_BATCH,
            });
        }
        if users.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmds = Vec::with_capacity(users.len() * 2);
        for user in users {
            cmds.push(PipeCmd::Get {
                key: presence_key(user),
            });
            cmds.push(PipeCmd::Get {
                key: active_key(user),
            });
        }

        let results = self.store().pipeline(cmds).await?;
        let now = now_millis();

        let statuses = users
            .iter()
            .enumerate()
            .map(|(i, user)| {
                let online = results[i * 2].is_some();
                let last_active_ms = results[i * 2 + 1]
                    .as_deref()
                    .and_then(|s| s.parse::<i64>().ok());
                PresenceStatus {
                    user: user.clone(),
                    online,
                    last_active_ms,
                    bucket: bucket_for(online, last_active_ms, now),
                }
            })
            .collect();

        Ok(statuses)
    }
}
