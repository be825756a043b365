mod config;
pub mod handler;
mod sender;
mod server;
mod session;
mod subscriber;
pub mod system;
pub mod transport;

pub use crate::config::AuraServerConfig;
pub use crate::sender::SessionSender;
pub use crate::server::ServerHandle;
pub use crate::session::SessionInner;
pub use crate::transport::WebSocketServer;
pub use system::*;

use std::sync::Arc;

use anyhow::Result;

pub async fn open_server(
    system: Arc<AuraSystem>,
    server_config: AuraServerConfig,
) -> Result<Arc<dyn ServerHandle>> {
    WebSocketServer::open(system, server_config).await
}
