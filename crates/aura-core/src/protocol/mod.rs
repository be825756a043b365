mod bucket;
mod messages;

pub use bucket::{ActivityBucket, bucket_for};
pub use messages::{ClientMessage, PresenceStatus, ServerMessage};
