use std::net::SocketAddr;

#[async_trait::async_trait]
pub trait ServerHandle: Send + Sync {
    fn local_addr(&self) -> SocketAddr;
    async fn close(&self);
}
