use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
};

use anyhow::Result;
use dashmap::DashSet;
use parking_lot::{Mutex, RwLock};
use tokio_tungstenite::tungstenite::Bytes;

use crate::sender::SessionSender;

use aura_core::{ServerMessage, utils::now_millis};

/// focus 调用限流窗口长度
const FOCUS_WINDOW_MS: i64 = 60_000;

/// Per-session state. Fields are touched by the session's own transport
/// task and the process-wide heartbeat tick, so everything mutable is an
/// atomic or sits behind a lightweight lock.
pub struct SessionInner {
    id: u128,
    peer_addr: SocketAddr,
    sender: Arc<dyn SessionSender>,
    user: RwLock<Option<String>>,
    focus: DashSet<String>,
    awaiting_pong: AtomicBool,
    refresh_ceded: AtomicBool,
    last_refresh_ms: AtomicI64,
    last_watch_refresh_ms: AtomicI64,
    focus_calls: Mutex<VecDeque<i64>>,
}

impl SessionInner {
    pub fn new(id: u128, peer_addr: SocketAddr, sender: Arc<dyn SessionSender>) -> Self {
        Self {
            id,
            peer_addr,
            sender,
            user: RwLock::new(None),
            focus: DashSet::new(),
            awaiting_pong: AtomicBool::new(false),
            refresh_ceded: AtomicBool::new(false),
            last_refresh_ms: AtomicI64::new(0),
            last_watch_refresh_ms: AtomicI64::new(0),
            focus_calls: Mutex::new(VecDeque::new()),
        }
    }

    pub fn id(&self) -> u128 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /* ---------------- transport ---------------- */

    pub async fn send(&self, msg: &ServerMessage) -> Result<()> {
        let text = serde_json::to_string(msg)?;
        self.sender.send_text(&text).await
    }

    pub async fn send_ping(&self) -> Result<()> {
        self.sender.send_ping().await
    }

    pub async fn send_pong(&self, data: Bytes) -> Result<()> {
        self.sender.send_pong(data).await
    }

    pub async fn close(&self, policy_violation: bool) -> Result<()> {
        self.sender.close(policy_violation).await
    }

    /* ---------------- identity ---------------- */

    pub fn user(&self) -> Option<String> {
        self.user.read().clone()
    }

    pub fn set_user(&self, user: Option<String>) {
        *self.user.write() = user;
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.read().is_some()
    }

    /* ---------------- focus set ---------------- */

    pub fn has_focus(&self, user: &str) -> bool {
        self.focus.contains(user)
    }

    pub fn focus_len(&self) -> usize {
        self.focus.len()
    }

    pub fn focus_insert(&self, user: &str) {
        self.focus.insert(user.to_string());
    }

    pub fn focus_remove(&self, user: &str) {
        self.focus.remove(user);
    }

    pub fn focus_list(&self) -> Vec<String> {
        self.focus.iter().map(|u| u.to_string()).collect()
    }

    /* ---------------- heartbeat / refresh ---------------- */

    /// 标记等待 pong, 返回之前是否已在等待 (即上个周期没有回应)
    pub fn set_awaiting_pong(&self) -> bool {
        self.awaiting_pong.swap(true, Ordering::SeqCst)
    }

    pub fn clear_awaiting_pong(&self) {
        self.awaiting_pong.store(false, Ordering::SeqCst);
    }

    /// Whether a presence refresh is due. The cede flag is set when an
    /// ownership check failed; it stays set until the next re-auth.
    pub fn should_refresh(&self, cooldown_ms: i64) -> bool {
        if self.refresh_ceded.load(Ordering::SeqCst) {
            return false;
        }
        now_millis() - self.last_refresh_ms.load(Ordering::SeqCst) >= cooldown_ms
    }

    pub fn mark_refreshed(&self) {
        self.last_refresh_ms.store(now_millis(), Ordering::SeqCst);
    }

    pub fn cede_refresh(&self) {
        self.refresh_ceded.store(true, Ordering::SeqCst);
    }

    pub fn reset_refresh(&self) {
        self.refresh_ceded.store(false, Ordering::SeqCst);
        self.mark_refreshed();
    }

    /// watcher 记录的重登节流, 与 presence 续期分开计时:
    /// 所有权让渡后会话仍在观察别人
    pub fn should_refresh_watch(&self, cooldown_ms: i64) -> bool {
        now_millis() - self.last_watch_refresh_ms.load(Ordering::SeqCst) >= cooldown_ms
    }

    pub fn mark_watch_refreshed(&self) {
        self.last_watch_refresh_ms.store(now_millis(), Ordering::SeqCst);
    }

    /* ---------------- rate limiting ---------------- */

    /// 滚动 60 秒窗口: 超限返回 false, 否则记账并放行
    pub fn consume_focus_budget(&self, limit: u32) -> bool {
        let now = now_millis();
        let mut calls = self.focus_calls.lock();
        while calls.front().is_some_and(|&t| t <= now - FOCUS_WINDOW_MS) {
            calls.pop_front();
        }
        if calls.len() >= limit as usize {
            return false;
        }
        calls.push_back(now);
        true
    }

    /// 定期清理已滑出窗口的记账项
    pub fn prune_focus_window(&self) {
        let cutoff = now_millis() - FOCUS_WINDOW_MS;
        let mut calls = self.focus_calls.lock();
        while calls.front().is_some_and(|&t| t <= cutoff) {
            calls.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSender;

    #[async_trait::async_trait]
    impl SessionSender for NullSender {
        async fn send_text(&self, _text: &str) -> Result<()> {
            Ok(())
        }
        async fn send_ping(&self) -> Result<()> {
            Ok(())
        }
        async fn send_pong(&self, _data: Bytes) -> Result<()> {
            Ok(())
        }
        async fn close(&self, _policy_violation: bool) -> Result<()> {
            Ok(())
        }
    }

    fn session() -> SessionInner {
        SessionInner::new(1, "127.0.0.1:1".parse().unwrap(), Arc::new(NullSender))
    }

    #[test]
    fn focus_budget_caps_calls_in_window() {
        let s = session();
        for _ in 0..3 {
            assert!(s.consume_focus_budget(3));
        }
        assert!(!s.consume_focus_budget(3));
    }

    #[test]
    fn awaiting_pong_reports_previous_state() {
        let s = session();
        assert!(!s.set_awaiting_pong());
        assert!(s.set_awaiting_pong());
        s.clear_awaiting_pong();
        assert!(!s.set_awaiting_pong());
    }

    #[test]
    fn refresh_respects_cooldown_and_cede() {
        let s = session();
        // last_refresh 为 0, 立即可刷新
        assert!(s.should_refresh(1_000));
        s.mark_refreshed();
        assert!(!s.should_refresh(1_000));

        s.cede_refresh();
        assert!(!s.should_refresh(0));
        s.reset_refresh();
        assert!(!s.should_refresh(1_000));
        assert!(s.should_refresh(0));
    }

    #[test]
    fn focus_set_round_trips() {
        let s = session();
        s.focus_insert("a@x.io");
        assert!(s.has_focus("a@x.io"));
        assert_eq!(s.focus_len(), 1);
        s.focus_remove("a@x.io");
        assert!(!s.has_focus("a@x.io"));
    }
}
