//! Flip subscriber: routes incoming pub/sub flips to local sessions whose
//! focus set matches. Delivery is best-effort; closed transports are
//! tolerated, malformed payloads are logged once per failure reason.

use std::{collections::HashSet, sync::Arc};

use futures_util::{StreamExt, stream::FuturesUnordered};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::AuraSystem;

use aura_core::ServerMessage;
use aura_store::{FlipPayload, PubSubMessage};

pub(crate) fn spawn(system: Arc<AuraSystem>, mut flip_rx: mpsc::Receiver<PubSubMessage>) {
    tokio::spawn(async move {
        let mut shutdown_rx = system.shutdown_subscribe();
        let mut seen_reasons: HashSet<String> = HashSet::new();
        info!("Flip subscriber started");

        loop {
            tokio::select! {
                msg = flip_rx.recv() => {
                    match msg {
                        Some(msg) => dispatch(&system, msg, &mut seen_reasons).await,
                        None => {
                            warn!("Flip subscription closed");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Flip subscriber received shutdown signal, stopping.");
                    break;
                }
            }
        }
    });
}

async fn dispatch(system: &Arc<AuraSystem>, msg: PubSubMessage, seen_reasons: &mut HashSet<String>) {
    let flip: FlipPayload = match serde_json::from_str(&msg.payload) {
        Ok(flip) => flip,
        Err(e) => {
            // 每种解析失败原因只告警一次
            let reason = format!("{:?}", e.classify());
            if seen_reasons.insert(reason.clone()) {
                warn!(
                    "Dropping malformed flip payload on {} ({}): {}",
                    msg.channel, reason, e
                );
            }
            return;
        }
    };

    let targets = system.sessions_focused_on(&flip.user);
    if targets.is_empty() {
        return;
    }

    debug!(
        "Dispatching {} flip for {} to {} session(s)",
        if flip.online { "online" } else { "offline" },
        flip.user,
        targets.len()
    );

    let update = ServerMessage::PresenceUpdate {
        user: flip.user.clone(),
        online: flip.online,
        timestamp_ms: flip.timestamp_ms,
    };

    // 并行投递, 已关闭的连接直接忽略
    let tasks: FuturesUnordered<_> = targets
        .into_iter()
        .map(|session| {
            let update = update.clone();
            async move {
                if let Err(e) = session.send(&update).await {
                    debug!("Deliver to [{:032X}] failed: {}", session.id(), e);
                }
            }
        })
        .collect();

    tasks.collect::<Vec<_>>().await;
}
