use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::warn;

use aura_core::{ClientMessage, ServerMessage};
use aura_server::{AuraServerConfig, AuraSystem, AuraSystemConfig, ServerHandle, open_server};
use aura_store::{MemoryStore, StoreBackend};

/// 单条消息的接收超时
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// ------------------------- TestEnv -------------------------
///
/// Multi-server environment over one shared in-memory store: every
/// `start_server` call boots an independent presence system with its own
/// WebSocket listener on an ephemeral loopback port, exactly like a
/// separate front-end process sharing the same store.
pub struct TestEnv {
    store: Arc<MemoryStore>,
    servers: Vec<(Arc<AuraSystem>, Arc<dyn ServerHandle>)>,
}

impl Default for TestEnv {
    fn default() -> Self {
        let _ = tracing_subscriber::fmt::try_init();
        Self {
            store: Arc::new(MemoryStore::new()),
            servers: Vec::new(),
        }
    }
}

impl TestEnv {
    pub fn store(&self) -> Arc<dyn StoreBackend> {
        self.store.clone()
    }

    /// 具体类型句柄, 用于 set_failing 之类只有 fake 才有的开关
    pub fn memory(&self) -> Arc<MemoryStore> {
        self.store.clone()
    }

    /// 测试用短周期配置: 心跳 250ms, TTL 2s (冷却 1s)
    pub fn fast_config(server_id: &str) -> AuraSystemConfig {
        let mut config = AuraSystemConfig::from_id(server_id);
        config.heartbeat_interval_ms = 250;
        config.presence_ttl_seconds = 2;
        config.watcher_ttl_seconds = 2;
        config
    }

    /// 启动一个逻辑服务端, 返回监听地址
    pub async fn start_server(&mut self, config: AuraSystemConfig) -> Result<SocketAddr> {
        let system = AuraSystem::new(config, self.store()).await?;
        let server_config = AuraServerConfig::new("127.0.0.1:0".parse()?);
        let server = open_server(system.clone(), server_config).await?;
        let addr = server.local_addr();
        self.servers.push((system, server));
        Ok(addr)
    }

    pub fn system(&self, index: usize) -> Arc<AuraSystem> {
        self.servers[index].0.clone()
    }

    pub async fn connect_client(&self, addr: SocketAddr) -> Result<TestClient> {
        TestClient::connect(addr).await
    }

    pub async fn shutdown(&mut self) {
        for (system, server) in self.servers.drain(..) {
            server.close().await;
            system.close().await;
        }
    }
}

/// 不读不回的哑连接, 用来模拟心跳失联的客户端
pub struct MuteClient {
    _ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl MuteClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let (ws, _) = connect_async(format!("ws://{addr}")).await?;
        Ok(Self { _ws: ws })
    }
}

/// ------------------------- TestClient -------------------------
pub struct TestClient {
    sink: Arc<Mutex<WsSink>>,
    rx: mpsc::Receiver<ServerMessage>,
    close_code: Arc<Mutex<Option<u16>>>,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let (ws_stream, _) = connect_async(format!("ws://{addr}")).await?;
        let (sink, mut stream) = ws_stream.split();
        let sink = Arc::new(Mutex::new(sink));
        let close_code = Arc::new(Mutex::new(None));
        let (tx, rx) = mpsc::channel(100);

        // 接收任务: 文本帧入队, 传输层 ping 立即回 pong
        tokio::spawn({
            let sink = sink.clone();
            let close_code = close_code.clone();
            async move {
                while let Some(result) = stream.next().await {
                    match result {
                        Ok(Message::Text(text)) => {
                            match serde_json::from_str::<ServerMessage>(text.as_str()) {
                                Ok(msg) => {
                                    if tx.send(msg).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => warn!("test client: bad server message: {}", e),
                            }
                        }
                        Ok(Message::Ping(data)) => {
                            let mut sink = sink.lock().await;
                            if sink.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                        Ok(Message::Close(frame)) => {
                            if let Some(frame) = frame {
                                *close_code.lock().await = Some(frame.code.into());
                            }
                            break;
                        }
                        Ok(_) => {}
                        Err(_) => break,
                    }
                }
            }
        });

        Ok(Self {
            sink,
            rx,
            close_code,
        })
    }

    pub async fn send(&self, msg: &ClientMessage) -> Result<()> {
        let text = serde_json::to_string(msg)?;
        self.send_raw(text).await
    }

    /// 发送未经类型化的裸文本帧, 用于协议边界测试
    pub async fn send_raw(&self, text: impl Into<String>) -> Result<()> {
        self.sink.lock().await.send(Message::text(text.into())).await?;
        Ok(())
    }

    /// 带超时接收; 连接断开或超时返回 None
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        tokio::time::timeout(RECV_TIMEOUT, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// 跳过无关消息 (比如中途到达的 presence_update) 直到谓词命中
    pub async fn recv_matching(
        &mut self,
        mut pred: impl FnMut(&ServerMessage) -> bool,
    ) -> Option<ServerMessage> {
        loop {
            match self.recv().await {
                Some(msg) if pred(&msg) => return Some(msg),
                Some(_) => continue,
                None => return None,
            }
        }
    }

    /// 等一条非 presence_update 的回复
    async fn recv_reply(&mut self) -> Result<ServerMessage> {
        self.recv_matching(|m| !matches!(m, ServerMessage::PresenceUpdate { .. }))
            .await
            .ok_or_else(|| anyhow!("no reply from server"))
    }

    pub async fn auth(&mut self, user: &str) -> Result<ServerMessage> {
        self.send(&ClientMessage::Auth {
            user: user.to_string(),
        })
        .await?;
        self.recv_reply().await
    }

    pub async fn focus(&mut self, users: &[&str]) -> Result<ServerMessage> {
        self.send(&ClientMessage::Focus {
            users: users.iter().map(|u| u.to_string()).collect(),
        })
        .await?;
        self.recv_reply().await
    }

    pub async fn blur(&mut self, users: &[&str]) -> Result<ServerMessage> {
        self.send(&ClientMessage::Blur {
            users: users.iter().map(|u| u.to_string()).collect(),
        })
        .await?;
        self.recv_reply().await
    }

    /// 服务端若以关闭帧断开, 返回其状态码
    pub async fn close_code(&self) -> Option<u16> {
        *self.close_code.lock().await
    }

    pub async fn close(&self) {
        let _ = self.sink.lock().await.close().await;
    }
}
