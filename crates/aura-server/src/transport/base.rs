use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{Semaphore, broadcast};
use tracing::warn;

use crate::{AuraServerConfig, AuraSystem};

/// 服务器基础结构, 包含所有通用字段
pub struct ServerBase {
    pub system: Arc<AuraSystem>,
    pub config: AuraServerConfig,
    pub semaphore: Arc<Semaphore>,
    pub shutdown_tx: Arc<broadcast::Sender<()>>,
}

impl ServerBase {
    pub fn new(
        system: Arc<AuraSystem>,
        config: AuraServerConfig,
    ) -> (Self, broadcast::Receiver<()>) {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_handlers));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(2 + config.max_concurrent_handlers);

        let base = Self {
            system,
            config,
            semaphore,
            shutdown_tx: Arc::new(shutdown_tx),
        };

        (base, shutdown_rx)
    }

    /// 通用的关闭逻辑
    pub fn send_shutdown_signal(&self) {
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Error sending shutdown signal: {}", e);
        }
    }

    /// 获取一个连接许可
    pub async fn acquire_connection_permit(&self) -> Result<tokio::sync::OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to acquire connection permit: {}", e))
    }
}
