use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::{AuraSystem, handler::reply_error, session::SessionInner};

use aura_core::{AuraError, ServerMessage, user_key};

pub async fn handle(
    system: &Arc<AuraSystem>,
    session: &Arc<SessionInner>,
    raw_user: String,
) -> Result<()> {
    let user = user_key::normalize(&raw_user);
    if !user_key::validate(&user) {
        return reply_error(session, &AuraError::InvalidUserKey(user)).await;
    }

    // 重新认证: 先卸下旧身份 (必要时含 release + offline 翻转)
    if let Some(previous) = session.user()
        && previous != user
    {
        system.detach_identity(session, &previous).await;
    }

    let outcome = match system
        .registry()
        .claim_online(&user, system.server_id())
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("claim_online for {} failed: {}", user, e);
            // store 断联期间不接受新认证: 回完错误就关闭会话, 交给客户端重连
            if let Err(e) = reply_error(session, &AuraError::Internal).await {
                debug!("Error reply to [{:032X}] failed: {}", session.id(), e);
            }
            return session.close(false).await;
        }
    };

    // store 已确认, 再落地本地状态
    system.attach_identity(session, &user);
    session.reset_refresh();

    session
        .send(&ServerMessage::AuthOk {
            user: user.clone(),
            server_id: system.server_id().to_string(),
            heartbeat_ms: system.config.heartbeat_interval_ms,
            ttl_seconds: system.config.presence_ttl_seconds,
            last_seen_ms: outcome.last_seen_ms,
        })
        .await?;

    info!(
        "Session [{:032X}] authenticated as {} (became_online: {})",
        session.id(),
        user,
        outcome.became_online
    );

    if outcome.became_online
        && let Err(e) = system.publisher().publish(&user, true).await
    {
        // 发布尽力而为, 观察者靠 snapshot 轮询兜底
        warn!("Failed to publish online flip for {}: {}", user, e);
    }

    Ok(())
}
