use anyhow::Result;
use futures_util::SinkExt;
use futures_util::stream::SplitSink;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::tungstenite::Bytes;

/// Write half of a session transport. Senders must tolerate the transport
/// closing underneath them; callers treat a send error as "gone".
#[async_trait::async_trait]
pub trait SessionSender: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<()>;
    async fn send_ping(&self) -> Result<()>;
    async fn send_pong(&self, data: Bytes) -> Result<()>;
    /// `policy_violation` 时带 1008 状态码关闭
    async fn close(&self, policy_violation: bool) -> Result<()>;
}

/// WebSocket 发送器, 封装写入流
pub struct WebSocketSender {
    sink: Mutex<SplitSink<WebSocketStream<TcpStream>, Message>>,
}

impl WebSocketSender {
    pub fn new(sink: SplitSink<WebSocketStream<TcpStream>, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }
}

#[async_trait::async_trait]
impl SessionSender for WebSocketSender {
    async fn send_text(&self, text: &str) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::text(text.to_string())).await?;
        Ok(())
    }

    async fn send_ping(&self) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Ping(Bytes::new())).await?;
        Ok(())
    }

    async fn send_pong(&self, data: Bytes) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Pong(data)).await?;
        Ok(())
    }

    async fn close(&self, policy_violation: bool) -> Result<()> {
        let mut sink = self.sink.lock().await;
        if policy_violation {
            sink.send(Message::Close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: "connection limit reached".into(),
            })))
            .await?;
        }
        sink.close().await?;
        Ok(())
    }
}
