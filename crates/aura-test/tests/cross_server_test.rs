#[cfg(test)]
mod tests {
    use anyhow::Result;

    use aura_core::ServerMessage;
    use aura_test::factory::TestEnv;

    /// 跨服务端重连: 后到的 claim 覆盖所有权, 原服务端续期失败,
    /// 新 owner 干净下线时翻转只发一次
    #[tokio::test(flavor = "multi_thread")]
    async fn reconnect_on_second_server_takes_ownership() -> Result<()> {
        let mut env = TestEnv::default();
        let addr1 = env.start_server(TestEnv::fast_config("s1")).await?;
        let addr2 = env.start_server(TestEnv::fast_config("s2")).await?;

        // s1 上的观察者先关注 b@x.io
        let mut observer = env.connect_client(addr1).await?;
        observer.auth("watcher@x.io").await?;
        let reply = observer.focus(&["b@x.io"]).await?;
        let ServerMessage::FocusOk { statuses } = reply else {
            panic!("expected focus_ok, got {reply:?}");
        };
        assert!(!statuses[0].online);

        // c1 在 s1 认证, 观察者收到 online 翻转
        let mut c1 = env.connect_client(addr1).await?;
        c1.auth("b@x.io").await?;
        let update = observer
            .recv_matching(|m| matches!(m, ServerMessage::PresenceUpdate { .. }))
            .await
            .expect("no online flip");
        assert!(matches!(
            update,
            ServerMessage::PresenceUpdate { online: true, .. }
        ));
        assert_eq!(
            env.system(0).registry().owner_of("b@x.io").await?.as_deref(),
            Some("s1")
        );

        // c2 不等 c1 断开, 直接在 s2 认证同一 user
        let mut c2 = env.connect_client(addr2).await?;
        let reply = c2.auth("b@x.io").await?;
        assert!(matches!(reply, ServerMessage::AuthOk { .. }));
        assert_eq!(
            env.system(0).registry().owner_of("b@x.io").await?.as_deref(),
            Some("s2")
        );

        // 原服务端的续期拿不到所有权
        assert!(!env.system(0).registry().refresh("b@x.io", "s1").await?);

        // c2 干净断开: release 成功, offline 翻转跨服务端送达观察者
        c2.close().await;
        let update = observer
            .recv_matching(|m| matches!(m, ServerMessage::PresenceUpdate { .. }))
            .await
            .expect("no offline flip");
        let ServerMessage::PresenceUpdate { user, online, .. } = update else {
            unreachable!()
        };
        assert_eq!(user, "b@x.io");
        assert!(!online);
        assert!(!env.system(0).registry().is_online("b@x.io").await?);

        c1.close().await;
        env.shutdown().await;
        Ok(())
    }

    /// c1 所在服务端后断开时, release 必须空转 (所有权已在别处)
    #[tokio::test(flavor = "multi_thread")]
    async fn stale_server_disconnect_does_not_clear_new_owner() -> Result<()> {
        let mut env = TestEnv::default();
        let addr1 = env.start_server(TestEnv::fast_config("s1")).await?;
        let addr2 = env.start_server(TestEnv::fast_config("s2")).await?;

        let mut c1 = env.connect_client(addr1).await?;
        c1.auth("c@x.io").await?;

        let mut c2 = env.connect_client(addr2).await?;
        c2.auth("c@x.io").await?;

        // 旧会话断开, s1 的 release_if_owned 返回 false, 在线保持
        c1.close().await;
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;

        assert!(env.system(0).registry().is_online("c@x.io").await?);
        assert_eq!(
            env.system(0).registry().owner_of("c@x.io").await?.as_deref(),
            Some("s2")
        );

        c2.close().await;
        env.shutdown().await;
        Ok(())
    }
}
