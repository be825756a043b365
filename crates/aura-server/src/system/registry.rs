use std::{net::IpAddr, sync::Arc, time::Duration};

use ahash::RandomState;
use anyhow::Result;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{AuraSystemConfig, session::SessionInner, subscriber};

use aura_store::{FlipPublisher, PresenceRegistry, RoutingMode, StoreBackend, WatcherIndex};

/// 限流窗口清理频率
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Process-wide presence fabric: local session maps, the focus index, the
/// store-backed registry/publisher, and the heartbeat tick. One instance
/// per server process; sessions attach through the transport layer.
pub struct AuraSystem {
    pub config: AuraSystemConfig,
    registry: PresenceRegistry,
    publisher: FlipPublisher,
    watchers: WatcherIndex,
    sessions: DashMap<u128, Arc<SessionInner>, RandomState>,
    user2sessions: DashMap<String, Vec<Arc<SessionInner>>, RandomState>,
    focus2sessions: DashMap<String, Vec<Arc<SessionInner>>, RandomState>,
    ip_counts: DashMap<IpAddr, u32, RandomState>,
    shutdown_tx: Arc<broadcast::Sender<()>>,
}

impl AuraSystem {
    pub async fn new(
        config: AuraSystemConfig,
        store: Arc<dyn StoreBackend>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let registry = PresenceRegistry::new(store.clone(), config.presence_ttl_seconds);
        let watchers = WatcherIndex::new(store.clone(), config.watcher_ttl_seconds);
        let publisher = FlipPublisher::new(
            store.clone(),
            config.routing(),
            config.presence_shard_count,
            WatcherIndex::new(store.clone(), config.watcher_ttl_seconds),
        );

        let (shutdown_tx, _) = broadcast::channel(8);

        let system = Arc::new(Self {
            config,
            registry,
            publisher,
            watchers,
            sessions: DashMap::with_hasher(RandomState::new()),
            user2sessions: DashMap::with_hasher(RandomState::new()),
            focus2sessions: DashMap::with_hasher(RandomState::new()),
            ip_counts: DashMap::with_hasher(RandomState::new()),
            shutdown_tx: Arc::new(shutdown_tx),
        });

        // 翻转事件订阅
        let channels = system
            .publisher
            .subscription_channels(&system.config.server_id);
        let flip_rx = store.subscribe(channels).await?;
        subscriber::spawn(system.clone(), flip_rx);

        // 心跳任务
        tokio::spawn({
            let system = system.clone();
            let mut shutdown_rx = system.shutdown_tx.subscribe();
            async move {
                let interval = Duration::from_millis(system.config.heartbeat_interval_ms);
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {
                            system.heartbeat_tick().await;
                        }
                        _ = shutdown_rx.recv() => {
                            info!("Heartbeat task received shutdown signal, stopping.");
                            break;
                        }
                    }
                }
            }
        });

        // 限流窗口清理任务
        tokio::spawn({
            let system = system.clone();
            let mut shutdown_rx = system.shutdown_tx.subscribe();
            async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(PRUNE_INTERVAL) => {
                            system.prune_rate_windows();
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
            }
        });

        Ok(system)
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    pub fn publisher(&self) -> &FlipPublisher {
        &self.publisher
    }

    pub fn watchers(&self) -> &WatcherIndex {
        &self.watchers
    }

    pub fn server_id(&self) -> &str {
        &self.config.server_id
    }

    pub fn shutdown_subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /* ---------------- connection admission ---------------- */

    /// 接入前的 per-IP 限流, 成功则计数
    pub fn try_admit(&self, ip: IpAddr) -> bool {
        let mut count = self.ip_counts.entry(ip).or_insert(0);
        if *count >= self.config.max_connections_per_ip {
            return false;
        }
        *count += 1;
        true
    }

    pub fn release_ip(&self, ip: IpAddr) {
        if let Some(mut count) = self.ip_counts.get_mut(&ip) {
            *count = count.saturating_sub(1);
        }
    }

    /* ---------------- session lifecycle ---------------- */

    pub fn add_session(&self, session: Arc<SessionInner>) {
        self.sessions.insert(session.id(), session);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Full disconnect handling, clean or terminated. Safe to call more
    /// than once; only the first call for a session id does any work.
    pub async fn remove_session(&self, session_id: u128) {
        let Some((_, session)) = self.sessions.remove(&session_id) else {
            return;
        };

        self.release_ip(session.peer_addr().ip());

        // focus 索引清理, 目标模式下顺带撤销 watcher 登记
        let focused = session.focus_list();
        let zero_watchers = self.focus_detach(&session, &focused);
        if self.publisher.mode() == RoutingMode::Targeted
            && !zero_watchers.is_empty()
            && let Err(e) = self
                .watchers
                .remove_watchers(&zero_watchers, &self.config.server_id)
                .await
        {
            warn!("Failed to remove watcher entries: {}", e);
        }

        if let Some(user) = session.user() {
            self.detach_identity(&session, &user).await;
        }

        if let Err(e) = session.close(false).await {
            debug!("Transport already closed for [{:032X}]: {}", session_id, e);
        }

        info!("Session [{:032X}] removed", session_id);
    }

    /* ---------------- identity ---------------- */

    /// 认证成功后登记, 同一 user 允许多个本地会话
    pub fn attach_identity(&self, session: &Arc<SessionInner>, user: &str) {
        session.set_user(Some(user.to_string()));

        let mut list = self.user2sessions.entry(user.to_string()).or_default();
        if !list.iter().any(|s| s.id() == session.id()) {
            list.push(session.clone());
        }
    }

    /// Detach one session from its identity. When it was the last local
    /// session for that user, presence is released (owner-guarded) and a
    /// clean offline flip is published iff the release actually happened.
    pub async fn detach_identity(&self, session: &Arc<SessionInner>, user: &str) {
        let mut last_local = false;
        if let Some(mut list) = self.user2sessions.get_mut(user) {
            list.retain(|s| s.id() != session.id());
            if list.is_empty() {
                drop(list);
                self.user2sessions.remove(user);
                last_local = true;
            }
        }
        session.set_user(None);

        if !last_local {
            return;
        }

        match self
            .registry
            .release_if_owned(user, &self.config.server_id)
            .await
        {
            Ok(true) => {
                if let Err(e) = self.publisher.publish(user, false).await {
                    warn!("Failed to publish offline flip for {}: {}", user, e);
                }
            }
            Ok(false) => {
                // 他服务端已接管, 在线真相以其 TTL 为准
                debug!("Presence for {} owned elsewhere, no release", user);
            }
            Err(e) => warn!("Release for {} failed: {}", user, e),
        }
    }

    pub fn local_sessions_of(&self, user: &str) -> Vec<Arc<SessionInner>> {
        self.user2sessions
            .get(user)
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    /* ---------------- focus index ---------------- */

    /// 本地索引双向登记; 只能在相关 store 调用成功之后调用
    pub fn focus_attach(&self, session: &Arc<SessionInner>, users: &[String]) {
        for user in users {
            session.focus_insert(user);
            let mut list = self.focus2sessions.entry(user.clone()).or_default();
            if !list.iter().any(|s| s.id() == session.id()) {
                list.push(session.clone());
            }
        }
    }

    /// 返回本地 watcher 数掉到 0 的 user 列表
    pub fn focus_detach(&self, session: &Arc<SessionInner>, users: &[String]) -> Vec<String> {
        let mut zero = Vec::new();
        for user in users {
            session.focus_remove(user);
            if let Some(mut list) = self.focus2sessions.get_mut(user) {
                list.retain(|s| s.id() != session.id());
                if list.is_empty() {
                    drop(list);
                    self.focus2sessions.remove(user);
                    zero.push(user.clone());
                }
            }
        }
        zero
    }

    pub fn sessions_focused_on(&self, user: &str) -> Vec<Arc<SessionInner>> {
        self.focus2sessions
            .get(user)
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    /* ---------------- heartbeat ---------------- */

    async fn heartbeat_tick(&self) {
        let sessions: Vec<Arc<SessionInner>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut stale = Vec::new();
        for session in sessions {
            if session.set_awaiting_pong() {
                // 上个周期的 ping 没有回应
                stale.push(session.id());
            } else if let Err(e) = session.send_ping().await {
                debug!("Ping to [{:032X}] failed: {}", session.id(), e);
                stale.push(session.id());
            }
        }

        for session_id in stale {
            warn!("Session [{:032X}] missed heartbeat, terminating", session_id);
            self.remove_session(session_id).await;
        }
    }

    /// Transport-level pong: the only trigger for presence refresh. Idle
    /// observers (empty focus set) never refresh, so their cost does not
    /// scale with the user population.
    pub async fn on_pong(&self, session: &Arc<SessionInner>) {
        session.clear_awaiting_pong();

        let Some(user) = session.user() else {
            return;
        };
        if session.focus_len() == 0 {
            return;
        }

        // 目标模式下按节流周期重登 watcher 记录, 防止长关注被 TTL 清掉
        let watch_cooldown_ms = (self.config.watcher_ttl_seconds * 1000 / 2) as i64;
        if self.publisher.mode() == RoutingMode::Targeted
            && session.should_refresh_watch(watch_cooldown_ms)
        {
            let focused = session.focus_list();
            match self
                .watchers
                .add_watchers(&focused, &self.config.server_id)
                .await
            {
                Ok(()) => session.mark_watch_refreshed(),
                Err(e) => warn!("Watcher re-registration failed: {}", e),
            }
        }

        if !session.should_refresh(self.config.refresh_cooldown_ms()) {
            return;
        }

        match self.registry.refresh(&user, &self.config.server_id).await {
            Ok(true) => session.mark_refreshed(),
            Ok(false) => {
                // 所有权已让渡, 停止续期直到重新认证
                session.cede_refresh();
                info!("Presence for {} reclaimed elsewhere, refresh stopped", user);
            }
            Err(e) => warn!("Refresh for {} failed: {}", user, e),
        }
    }

    /* ---------------- background maintenance ---------------- */

    fn prune_rate_windows(&self) {
        self.ip_counts.retain(|_, count| *count > 0);
        for entry in self.sessions.iter() {
            entry.value().prune_focus_window();
        }
    }

    /* ---------------- shutdown ---------------- */

    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(());

        let sessions: Vec<Arc<SessionInner>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for session in sessions {
            if let Err(e) = session.close(false).await {
                debug!("close session error: {}", e);
            }
        }

        self.sessions.clear();
        self.user2sessions.clear();
        self.focus2sessions.clear();
        self.ip_counts.clear();
    }
}
