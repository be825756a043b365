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

    let targets: Vec<String> = users
        .iter()
        .map(|u| user_key::normalize(u))
        .unique()
        .filter(|u| session.has_focus(u))
        .collect();

    let zero_watchers = system.focus_detach(session, &targets);
    if system.publisher().mode() == RoutingMode::Targeted
        && !zero_watchers.is_empty()
        && let Err(e) = system
            .watchers()
            .remove_watchers(&zero_watchers, system.server_id())
            .await
    {
        // watcher 集只是路由提示, TTL 会兜底
        warn!("Failed to remove watcher entries: {}", e);
    }

    session.send(&ServerMessage::BlurOk).await
}
