use tokio::sync::mpsc;

use crate::Result;

/// One command in an ordered pipeline. The result slot for a `Set` is
/// always `None`; a `Get` yields the value or `None`.
#[derive(Debug, Clone)]
pub enum PipeCmd {
    Set { key: String, value: String },
    Get { key: String },
}

/// A message received on a pub/sub channel.
#[derive(Debug, Clone)]
pub struct PubSubMessage {
    pub channel: String,
    pub payload: String,
}

/// Capability interface over the shared key-value + pub/sub store.
///
/// The production backend is Redis ([`crate::RedisStore`]); tests run
/// against [`crate::MemoryStore`]. Owner-guarded mutation goes through
/// `expire_if_equal` / `delete_if_equal` only — a `false` return is the
/// normal ownership-miss result, not an error.
#[async_trait::async_trait]
pub trait StoreBackend: Send + Sync {
    /// 原子 set + TTL, 返回旧值
    async fn set_with_ttl_get_prev(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// 一次往返执行所有命令, 按序返回结果
    async fn pipeline(&self, cmds: Vec<PipeCmd>) -> Result<Vec<Option<String>>>;

    /// refresh_if_owner: `if GET(key)==expected then EXPIRE(key, ttl) else 0`
    async fn expire_if_equal(&self, key: &str, expected: &str, ttl_secs: u64) -> Result<bool>;

    /// delete_if_owner: `if GET(key)==expected then DEL(key) else 0`
    async fn delete_if_equal(&self, key: &str, expected: &str) -> Result<bool>;

    /// 向每个 key 的成员集添加 member, 并重置其存活期
    async fn expiring_set_add(&self, keys: &[String], member: &str, ttl_secs: u64) -> Result<()>;

    /// 从每个 key 的成员集移除 member
    async fn expiring_set_remove(&self, keys: &[String], member: &str) -> Result<()>;

    /// 读取未过期的成员
    async fn expiring_set_members(&self, key: &str) -> Result<Vec<String>>;

    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Open a dedicated subscription context for the given channels.
    /// Received messages are pumped into the returned receiver until the
    /// receiver is dropped or the backend shuts down.
    async fn subscribe(&self, channels: Vec<String>) -> Result<mpsc::Receiver<PubSubMessage>>;
}
