use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuraServerConfig {
    pub bind_addr: SocketAddr,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_handlers: usize,
}

fn default_max_concurrent() -> usize {
    10000
}

impl AuraServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_concurrent_handlers: default_max_concurrent(),
        }
    }
}
