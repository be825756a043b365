use std::sync::Arc;

use anyhow::Result;
use itertools::Itertools;
use tracing::warn;

use crate::{AuraSystem, handler::reply_error, session::SessionInner};

use aura_core::{AuraError, ServerMessage, user_key};
use aura_store::RoutingMode;

pub async fn handle(
    system: &Arc<AuraSystem>,
    session: &Arc<SessionInner>,
    users: Vec<String>,
) -> Result<()> {
    if !session.is_authenticated() {
        return reply_error(session, &AuraError::NotAuthenticated).await;
    }

    // 每次 focus 调用消耗一个预算单位, 无论列表多大
    if !session.consume_focus_budget(system.config.focus_rate_limit_per_minute) {
        return reply_error(session, &AuraError::FocusRateLimited).await;
    }

    // 去重 + 已关注的静默忽略, 再按剩余容量截断
    let room = system
        .config
        .max_focus_per_client
        .saturating_sub(session.focus_len());
    let accepted: Vec<String> = users
        .iter()
        .map(|u| user_key::normalize(u))
        .filter(|u| !u.is_empty())
        .unique()
        .filter(|u| !session.has_focus(u))
        .take(room)
        .collect();

    if accepted.is_empty() {
        return session
            .send(&ServerMessage::FocusOk {
                statuses: Vec::new(),
            })
            .await;
    }

    if system.publisher().mode() == RoutingMode::Targeted
        && let Err(e) = system
            .watchers()
            .add_watchers(&accepted, system.server_id())
            .await
    {
        warn!("Failed to register watcher entries: {}", e);
        return reply_error(session, &AuraError::Internal).await;
    }

    let statuses = match system.registry().snapshot(&accepted).await {
        Ok(statuses) => statuses,
        Err(e) => {
            warn!("Snapshot for focus failed: {}", e);
            return reply_error(session, &AuraError::Internal).await;
        }
    };

    // store 全部成功后才更新本地索引
    system.focus_attach(session, &accepted);

    session.send(&ServerMessage::FocusOk { statuses }).await
}
