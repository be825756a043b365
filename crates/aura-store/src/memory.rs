use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};

use crate::{
    Result, StoreError,
    backend::{PipeCmd, PubSubMessage, StoreBackend},
};

use aura_core::utils::{now_millis, now_secs};

const BUS_CAPACITY: usize = 1024;

struct Entry {
    value: String,
    expires_at_ms: Option<i64>,
}

impl Entry {
    fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_none_or(|at| at > now_ms)
    }
}

/// In-process store fake with the same semantics as the Redis backend:
/// lazy TTL expiry, owner-guarded mutation, fire-and-forget pub/sub.
/// Multi-server tests share one instance in place of a real store.
pub struct MemoryStore {
    kv: DashMap<String, Entry>,
    sets: DashMap<String, HashMap<String, u64>>,
    bus: broadcast::Sender<PubSubMessage>,
    failing: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            kv: DashMap::new(),
            sets: DashMap::new(),
            bus,
            failing: AtomicBool::new(false),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟命令连接断联: 为 true 时所有操作都报错, 已建立的订阅不受影响
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_up(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }

    /// 惰性过期: 读到已过期的 key 时顺手删除
    fn live_value(&self, key: &str) -> Option<String> {
        let now = now_millis();
        let expired = match self.kv.get(key) {
            Some(entry) if entry.is_live(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.kv.remove_if(key, |_, entry| !entry.is_live(now));
        }
        None
    }
}

#[async_trait::async_trait]
impl StoreBackend for MemoryStore {
    async fn set_with_ttl_get_prev(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<Option<String>> {
        self.check_up()?;
        let now = now_millis();
        let entry = Entry {
            value: value.to_string(),
            expires_at_ms: Some(now + ttl_secs as i64 * 1000),
        };
        let prev = self
            .kv
            .insert(key.to_string(), entry)
            .filter(|prev| prev.is_live(now))
            .map(|prev| prev.value);
        Ok(prev)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check_up()?;
        self.kv.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at_ms: None,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_up()?;
        Ok(self.live_value(key))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_up()?;
        Ok(self.live_value(key).is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_up()?;
        self.kv.remove(key);
        Ok(())
    }

    async fn pipeline(&self, cmds: Vec<PipeCmd>) -> Result<Vec<Option<String>>> {
        self.check_up()?;
        let mut results = Vec::with_capacity(cmds.len());
        for cmd in cmds {
            match cmd {
                PipeCmd::Set { key, value } => {
                    self.set(&key, &value).await?;
                    results.push(None);
                }
                PipeCmd::Get { key } => results.push(self.live_value(&key)),
            }
        }
        Ok(results)
    }

    async fn expire_if_equal(&self, key: &str, expected: &str, ttl_secs: u64) -> Result<bool> {
        self.check_up()?;
        let now = now_millis();
        if let Some(mut entry) = self.kv.get_mut(key)
            && entry.is_live(now)
            && entry.value == expected
        {
            entry.expires_at_ms = Some(now + ttl_secs as i64 * 1000);
            return Ok(true);
        }
        Ok(false)
    }

    async fn delete_if_equal(&self, key: &str, expected: &str) -> Result<bool> {
        self.check_up()?;
        let now = now_millis();
        let removed = self
            .kv
            .remove_if(key, |_, entry| entry.is_live(now) && entry.value == expected)
            .is_some();
        Ok(removed)
    }

    async fn expiring_set_add(&self, keys: &[String], member: &str, ttl_secs: u64) -> Result<()> {
        self.check_up()?;
        let expires_at = now_secs() + ttl_secs;
        for key in keys {
            self.sets
                .entry(key.clone())
                .or_default()
                .insert(member.to_string(), expires_at);
        }
        Ok(())
    }

    async fn expiring_set_remove(&self, keys: &[String], member: &str) -> Result<()> {
        self.check_up()?;
        for key in keys {
            if let Some(mut members) = self.sets.get_mut(key) {
                members.remove(member);
                if members.is_empty() {
                    drop(members);
                    self.sets.remove(key);
                }
            }
        }
        Ok(())
    }

    async fn expiring_set_members(&self, key: &str) -> Result<Vec<String>> {
        self.check_up()?;
        let now = now_secs();
        let Some(mut members) = self.sets.get_mut(key) else {
            return Ok(Vec::new());
        };
        members.retain(|_, expires_at| *expires_at > now);
        Ok(members.keys().cloned().collect())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.check_up()?;
        // 无订阅者时 send 返回 Err, 与 fire-and-forget 语义一致
        let _ = self.bus.send(PubSubMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    async fn subscribe(&self, channels: Vec<String>) -> Result<mpsc::Receiver<PubSubMessage>> {
        self.check_up()?;
        let mut bus_rx = self.bus.subscribe();
        let wanted: HashSet<String> = channels.into_iter().collect();
        let (tx, rx) = mpsc::channel(BUS_CAPACITY);

        tokio::spawn(async move {
            loop {
                match bus_rx.recv().await {
                    Ok(msg) => {
                        if !wanted.contains(&msg.channel) {
                            continue;
                        }
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn set_with_ttl_reports_previous_value() {
        let store = MemoryStore::new();
        let prev = store.set_with_ttl_get_prev("k", "s1", 10).await.unwrap();
        assert_eq!(prev, None);
        let prev = store.set_with_ttl_get_prev("k", "s2", 10).await.unwrap();
        assert_eq!(prev, Some("s1".to_string()));
    }

    #[tokio::test]
    async fn keys_expire() {
        let store = MemoryStore::new();
        store.set_with_ttl_get_prev("k", "v", 1).await.unwrap();
        assert!(store.exists("k").await.unwrap());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(!store.exists("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn guards_check_value_equality() {
        let store = MemoryStore::new();
        store.set_with_ttl_get_prev("k", "s1", 10).await.unwrap();

        assert!(!store.expire_if_equal("k", "s2", 10).await.unwrap());
        assert!(store.expire_if_equal("k", "s1", 10).await.unwrap());

        assert!(!store.delete_if_equal("k", "s2").await.unwrap());
        assert!(store.delete_if_equal("k", "s1").await.unwrap());
        assert!(!store.delete_if_equal("k", "s1").await.unwrap());
    }

    #[tokio::test]
    async fn pipeline_preserves_order() {
        let store = MemoryStore::new();
        let results = store
            .pipeline(vec![
                PipeCmd::Set {
                    key: "a".into(),
                    value: "1".into(),
                },
                PipeCmd::Get { key: "a".into() },
                PipeCmd::Get { key: "missing".into() },
            ])
            .await
            .unwrap();
        assert_eq!(results, vec![None, Some("1".to_string()), None]);
    }

    #[tokio::test]
    async fn expiring_set_members_prune() {
        let store = MemoryStore::new();
        let keys = vec!["w".to_string()];
        store.expiring_set_add(&keys, "s1", 60).await.unwrap();
        store.expiring_set_add(&keys, "s2", 1).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let members = store.expiring_set_members("w").await.unwrap();
        assert_eq!(members, vec!["s1".to_string()]);

        store.expiring_set_remove(&keys, "s1").await.unwrap();
        assert!(store.expiring_set_members("w").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_toggle_rejects_commands_and_recovers() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();

        store.set_failing(true);
        assert!(matches!(
            store.get("k").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.set_with_ttl_get_prev("k", "s1", 10).await.is_err());

        store.set_failing(false);
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn pubsub_delivers_to_matching_channel_only() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe(vec!["ch:1".to_string()]).await.unwrap();

        store.publish("ch:2", "ignored").await.unwrap();
        store.publish("ch:1", "hello").await.unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.channel, "ch:1");
        assert_eq!(msg.payload, "hello");
    }
}
