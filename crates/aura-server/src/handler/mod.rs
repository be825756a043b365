mod auth;
mod blur;
mod focus;
mod ping;

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::{AuraSystem, session::SessionInner};

use aura_core::{AuraError, ClientMessage, ServerMessage};

/// 解析并分发一条会话消息; 协议层错误只回 typed error, 不断开连接
pub async fn handle(
    system: &Arc<AuraSystem>,
    session: &Arc<SessionInner>,
    text: &str,
) -> Result<()> {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!("Malformed message from [{:032X}]: {}", session.id(), e);
            return reply_error(session, &AuraError::MalformedMessage(e)).await;
        }
    };

    match msg {
        ClientMessage::Auth { user } => auth::handle(system, session, user).await,
        ClientMessage::Focus { users } => focus::handle(system, session, users).await,
        ClientMessage::Blur { users } => blur::handle(system, session, users).await,
        ClientMessage::Ping => ping::handle(session).await,
    }
}

pub(crate) async fn reply_error(session: &Arc<SessionInner>, error: &AuraError) -> Result<()> {
    session
        .send(&ServerMessage::Error {
            message: error.to_string(),
        })
        .await
}
