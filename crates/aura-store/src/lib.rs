pub use backend::{PipeCmd, PubSubMessage, StoreBackend};
pub use error::{Result, StoreError};
pub use flips::{FlipPayload, FlipPublisher, RoutingMode, server_channel, shard_channel, shard_index};
pub use memory::MemoryStore;
pub use presence::{ClaimOutcome, PresenceRegistry};
pub use redis_store::RedisStore;
pub use snapshot::MAX_SNAPSHOT_BATCH;
pub use watchers::WatcherIndex;

mod backend;
mod error;
mod flips;
mod memory;
mod presence;
mod redis_store;
mod snapshot;
mod watchers;
