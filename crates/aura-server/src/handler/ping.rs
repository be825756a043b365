use std::sync::Arc;

use anyhow::Result;

use crate::{handler::reply_error, session::SessionInner};

use aura_core::{AuraError, ServerMessage};

/// 应用层 ping 只回 pong, 不触发 presence 续期; 续期只由传输层 pong 驱动,
/// 避免客户端消息伪造活跃
pub async fn handle(session: &Arc<SessionInner>) -> Result<()> {
    if !session.is_authenticated() {
        return reply_error(session, &AuraError::NotAuthenticated).await;
    }
    session.send(&ServerMessage::Pong).await
}
