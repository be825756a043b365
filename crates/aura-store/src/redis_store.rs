use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    Result, StoreError,
    backend::{PipeCmd, PubSubMessage, StoreBackend},
};

use aura_core::utils::now_secs;

/// 所有权守护脚本: 只有 value 仍等于调用方时才允许续期/删除
const REFRESH_IF_OWNER: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('EXPIRE', KEYS[1], ARGV[2])
else
  return 0
end";

const DELETE_IF_OWNER: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
else
  return 0
end";

/// 订阅转发通道容量
const SUBSCRIPTION_BUFFER: usize = 1024;

/// Redis-backed store adapter.
///
/// Regular commands go through one auto-reconnecting multiplexed
/// connection; every subscription context gets its own dedicated pub/sub
/// connection (subscriber connections cannot issue commands).
pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
    refresh_script: redis::Script,
    delete_script: redis::Script,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        info!("Connected to store at {}", url);

        Ok(Self {
            client,
            conn,
            refresh_script: redis::Script::new(REFRESH_IF_OWNER),
            delete_script: redis::Script::new(DELETE_IF_OWNER),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait::async_trait]
impl StoreBackend for RedisStore {
    async fn set_with_ttl_get_prev(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<Option<String>> {
        let mut conn = self.conn();
        let prev: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .arg("GET")
            .query_async(&mut conn)
            .await?;
        Ok(prev)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn();
        let n: i64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(n == 1)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: () = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }

    async fn pipeline(&self, cmds: Vec<PipeCmd>) -> Result<Vec<Option<String>>> {
        if cmds.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for cmd in &cmds {
            match cmd {
                PipeCmd::Set { key, value } => {
                    pipe.cmd("SET").arg(key).arg(value);
                }
                PipeCmd::Get { key } => {
                    pipe.cmd("GET").arg(key);
                }
            }
        }

        let mut conn = self.conn();
        let values: Vec<redis::Value> = pipe.query_async(&mut conn).await?;

        let mut results = Vec::with_capacity(cmds.len());
        for (cmd, value) in cmds.iter().zip(values) {
            match cmd {
                PipeCmd::Set { .. } => results.push(None),
                PipeCmd::Get { .. } => results.push(redis::from_redis_value(&value)?),
            }
        }
        Ok(results)
    }

    async fn expire_if_equal(&self, key: &str, expected: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.conn();
        let refreshed: i64 = self
            .refresh_script
            .key(key)
            .arg(expected)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await?;
        Ok(refreshed == 1)
    }

    async fn delete_if_equal(&self, key: &str, expected: &str) -> Result<bool> {
        let mut conn = self.conn();
        let deleted: i64 = self
            .delete_script
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn expiring_set_add(&self, keys: &[String], member: &str, ttl_secs: u64) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        // 成员的 score 即过期时刻; key 本身也跟着最后一次写续期
        let expires_at = now_secs() + ttl_secs;
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("ZADD").arg(key).arg(expires_at).arg(member).ignore();
            pipe.cmd("EXPIRE").arg(key).arg(ttl_secs).ignore();
        }

        let mut conn = self.conn();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn expiring_set_remove(&self, keys: &[String], member: &str) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("ZREM").arg(key).arg(member).ignore();
        }

        let mut conn = self.conn();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn expiring_set_members(&self, key: &str) -> Result<Vec<String>> {
        // 先修剪过期成员, 再读剩余
        let mut pipe = redis::pipe();
        pipe.cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(now_secs())
            .ignore();
        pipe.cmd("ZRANGE").arg(key).arg(0).arg(-1);

        let mut conn = self.conn();
        let (members,): (Vec<String>,) = pipe.query_async(&mut conn).await?;
        Ok(members)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: () = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, channels: Vec<String>) -> Result<mpsc::Receiver<PubSubMessage>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(StoreError::Redis)?;
        for channel in &channels {
            pubsub.subscribe(channel).await?;
        }
        info!("Subscribed to {} channel(s)", channels.len());

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        // 订阅连接专用泵任务
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let channel = msg.get_channel_name().to_string();
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Non-text payload on channel {}: {}", channel, e);
                        continue;
                    }
                };
                if tx.send(PubSubMessage { channel, payload }).await.is_err() {
                    debug!("Subscription receiver dropped, stopping pump");
                    break;
                }
            }
        });

        Ok(rx)
    }
}
