use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::base::ServerBase;
use crate::{
    AuraServerConfig, AuraSystem, ServerHandle, handler,
    sender::{SessionSender, WebSocketSender},
    session::SessionInner,
};

use aura_core::utils::new_uuid;

pub struct WebSocketServer {
    base: ServerBase,
    listener: Arc<TcpListener>,
    local_addr: SocketAddr,
}

#[async_trait::async_trait]
impl ServerHandle for WebSocketServer {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn close(&self) {
        self.base.send_shutdown_signal();
        info!("WebSocketServer shutdown complete");
    }
}

impl WebSocketServer {
    pub async fn open(
        system: Arc<AuraSystem>,
        config: AuraServerConfig,
    ) -> Result<Arc<dyn ServerHandle>> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let (base, mut shutdown_rx) = ServerBase::new(system, config);

        let server = Arc::new(WebSocketServer {
            base,
            listener: Arc::new(listener),
            local_addr,
        });

        // 服务器连接处理任务
        tokio::spawn({
            let server = server.clone();
            async move {
                info!("Accepting WebSocket connections on {}", local_addr);
                loop {
                    tokio::select! {
                        Ok((stream, peer_addr)) = server.listener.accept() => {
                            server.clone().handle_connection(stream, peer_addr).await;
                        }
                        _ = shutdown_rx.recv() => {
                            info!("WebSocket server received shutdown signal, stopping.");
                            break;
                        }
                    }
                }
                info!("Stopped accepting WebSocket connections");
            }
        });

        Ok(server)
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer_addr: SocketAddr) {
        debug!("New WebSocket connection from {}", peer_addr);

        // WebSocket 握手
        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!("WebSocket handshake failed for {}: {}", peer_addr, e);
                return;
            }
        };

        let (sink, mut stream) = ws_stream.split();
        let sender = Arc::new(WebSocketSender::new(sink));

        // 任何共享状态之前先做 per-IP 限流
        if !self.base.system.try_admit(peer_addr.ip()) {
            warn!("Connection cap reached for {}, policy-closing", peer_addr);
            if let Err(e) = sender.close(true).await {
                debug!("Policy close for {} failed: {}", peer_addr, e);
            }
            return;
        }

        let permit = match self.base.acquire_connection_permit().await {
            Ok(permit) => permit,
            Err(e) => {
                warn!("Too many connections, rejecting {}: {}", peer_addr, e);
                self.base.system.release_ip(peer_addr.ip());
                return;
            }
        };

        let session = Arc::new(SessionInner::new(new_uuid(), peer_addr, sender));
        self.base.system.add_session(session.clone());

        // 为每个连接启动处理任务
        tokio::spawn({
            let server = self.clone();
            async move {
                let _permit = permit;

                server
                    .handle_connection_inner(session.clone(), &mut stream)
                    .await;

                server.base.system.remove_session(session.id()).await;

                info!("WebSocket connection {} closed and cleaned up", peer_addr);
            }
        });
    }

    async fn handle_connection_inner(
        self: &Arc<Self>,
        session: Arc<SessionInner>,
        stream: &mut futures_util::stream::SplitStream<
            tokio_tungstenite::WebSocketStream<TcpStream>,
        >,
    ) {
        let peer_addr = session.peer_addr();
        let mut shutdown_rx = self.base.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = stream.next() => {
                    match result {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = handler::handle(&self.base.system, &session, text.as_str()).await {
                                // 发送失败说明对端已断开, 由读取侧关闭收尾
                                debug!("Error handling message from {}: {}", peer_addr, e);
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.base.system.on_pong(&session).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = session.send_pong(data).await {
                                debug!("Failed to send pong to {}: {}", peer_addr, e);
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("WebSocket connection {} closed by client", peer_addr);
                            break;
                        }
                        Some(Ok(_)) => {
                            // 二进制等其他帧直接忽略
                            debug!("Received non-text message from {}", peer_addr);
                        }
                        Some(Err(e)) => {
                            info!("WebSocket connection {} error: {}", peer_addr, e);
                            break;
                        }
                        None => {
                            info!("WebSocket connection {} stream ended", peer_addr);
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("WebSocket connection {} shutting down due to server shutdown", peer_addr);
                    break;
                }
            }
        }
    }
}
