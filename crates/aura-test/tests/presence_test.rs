#[cfg(test)]
mod tests {
    use anyhow::Result;

    use aura_core::{ActivityBucket, ClientMessage, ServerMessage};
    use aura_test::factory::TestEnv;

    /// 两个会话互相关注, 断开方的 offline 翻转要推到对端
    #[tokio::test(flavor = "multi_thread")]
    async fn mutual_focus_sees_offline_flip() -> Result<()> {
        let mut env = TestEnv::default();
        let addr = env.start_server(TestEnv::fast_config("s1")).await?;

        let mut p1 = env.connect_client(addr).await?;
        let mut p2 = env.connect_client(addr).await?;

        p1.auth("p1@x.io").await?;
        p2.auth("p2@x.io").await?;

        let reply = p1.focus(&["p2@x.io"]).await?;
        let ServerMessage::FocusOk { statuses } = reply else {
            panic!("expected focus_ok, got {reply:?}");
        };
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].online);
        assert_eq!(statuses[0].bucket, ActivityBucket::OnlineNow);

        let reply = p2.focus(&["p1@x.io"]).await?;
        let ServerMessage::FocusOk { statuses } = reply else {
            panic!("expected focus_ok, got {reply:?}");
        };
        assert!(statuses[0].online);

        // p1 干净断开, p2 收到 offline 翻转
        p1.close().await;

        let update = p2
            .recv_matching(|m| matches!(m, ServerMessage::PresenceUpdate { .. }))
            .await
            .expect("no presence_update delivered");
        let ServerMessage::PresenceUpdate { user, online, .. } = update else {
            unreachable!()
        };
        assert_eq!(user, "p1@x.io");
        assert!(!online);

        env.shutdown().await;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn auth_normalizes_and_reports_last_seen() -> Result<()> {
        let mut env = TestEnv::default();
        let addr = env.start_server(TestEnv::fast_config("s1")).await?;

        let mut client = env.connect_client(addr).await?;
        let reply = client.auth("  Alice@Example.COM ").await?;
        let ServerMessage::AuthOk {
            user,
            server_id,
            ttl_seconds,
            last_seen_ms,
            ..
        } = reply
        else {
            panic!("expected auth_ok, got {reply:?}");
        };
        assert_eq!(user, "alice@example.com");
        assert_eq!(server_id, "s1");
        assert_eq!(ttl_seconds, 2);
        // 第一次上线, 没有 last_seen
        assert_eq!(last_seen_ms, None);
        // 本地会话表以规范化后的 key 登记
        assert_eq!(
            env.system(0).local_sessions_of("alice@example.com").len(),
            1
        );
        client.close().await;

        // 干净下线后重连, last_seen 应当有值
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let mut client = env.connect_client(addr).await?;
        let reply = client.auth("alice@example.com").await?;
        let ServerMessage::AuthOk { last_seen_ms, .. } = reply else {
            panic!("expected auth_ok, got {reply:?}");
        };
        assert!(last_seen_ms.is_some());

        env.shutdown().await;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn auth_rejects_malformed_user_key() -> Result<()> {
        let mut env = TestEnv::default();
        let addr = env.start_server(TestEnv::fast_config("s1")).await?;

        let mut client = env.connect_client(addr).await?;
        for bad in ["not-an-email", "user@localhost", "@x.io"] {
            let reply = client.auth(bad).await?;
            assert!(
                matches!(reply, ServerMessage::Error { .. }),
                "expected error for {bad}, got {reply:?}"
            );
        }

        // 会话未关闭, 还能正常认证
        let reply = client.auth("ok@x.io").await?;
        assert!(matches!(reply, ServerMessage::AuthOk { .. }));

        env.shutdown().await;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ping_requires_auth_then_answers_pong() -> Result<()> {
        let mut env = TestEnv::default();
        let addr = env.start_server(TestEnv::fast_config("s1")).await?;

        let mut client = env.connect_client(addr).await?;

        // Connecting 状态只接受 auth
        client.send(&ClientMessage::Ping).await?;
        let reply = client
            .recv_matching(|m| !matches!(m, ServerMessage::PresenceUpdate { .. }))
            .await;
        assert!(matches!(reply, Some(ServerMessage::Error { .. })));

        client.auth("a@x.io").await?;
        client.send(&ClientMessage::Ping).await?;
        let reply = client
            .recv_matching(|m| !matches!(m, ServerMessage::PresenceUpdate { .. }))
            .await;
        assert!(matches!(reply, Some(ServerMessage::Pong)));

        env.shutdown().await;
        Ok(())
    }

    /// 同一会话换身份重新认证: 旧身份按断开语义卸下, 新身份生效
    #[tokio::test(flavor = "multi_thread")]
    async fn reauth_switches_identity_and_releases_old() -> Result<()> {
        let mut env = TestEnv::default();
        let addr = env.start_server(TestEnv::fast_config("s1")).await?;

        let mut observer = env.connect_client(addr).await?;
        observer.auth("o@x.io").await?;
        observer.focus(&["a@x.io", "b@x.io"]).await?;

        let mut client = env.connect_client(addr).await?;
        client.auth("a@x.io").await?;
        let update = observer
            .recv_matching(|m| matches!(m, ServerMessage::PresenceUpdate { .. }))
            .await
            .expect("no online flip for a");
        assert!(matches!(
            update,
            ServerMessage::PresenceUpdate { ref user, online: true, .. } if user == "a@x.io"
        ));

        // 同一连接直接 auth 成另一个 user
        let reply = client.auth("b@x.io").await?;
        let ServerMessage::AuthOk { user, .. } = reply else {
            panic!("expected auth_ok, got {reply:?}");
        };
        assert_eq!(user, "b@x.io");

        // 先是 a 的下线翻转, 再是 b 的上线翻转
        let update = observer
            .recv_matching(|m| matches!(m, ServerMessage::PresenceUpdate { .. }))
            .await
            .expect("no offline flip for a");
        assert!(matches!(
            update,
            ServerMessage::PresenceUpdate { ref user, online: false, .. } if user == "a@x.io"
        ));
        let update = observer
            .recv_matching(|m| matches!(m, ServerMessage::PresenceUpdate { .. }))
            .await
            .expect("no online flip for b");
        assert!(matches!(
            update,
            ServerMessage::PresenceUpdate { ref user, online: true, .. } if user == "b@x.io"
        ));

        assert!(!env.system(0).registry().is_online("a@x.io").await?);
        assert!(env.system(0).registry().is_online("b@x.io").await?);
        assert_eq!(
            env.system(0).registry().owner_of("b@x.io").await?.as_deref(),
            Some("s1")
        );
        assert!(env.system(0).local_sessions_of("a@x.io").is_empty());
        assert_eq!(env.system(0).local_sessions_of("b@x.io").len(), 1);

        env.shutdown().await;
        Ok(())
    }

    /// 该 user 还有其他本地会话时, 换身份不得触发下线
    #[tokio::test(flavor = "multi_thread")]
    async fn reauth_keeps_user_online_with_remaining_session() -> Result<()> {
        let mut env = TestEnv::default();
        let addr = env.start_server(TestEnv::fast_config("s1")).await?;

        let mut keeper = env.connect_client(addr).await?;
        keeper.auth("a@x.io").await?;
        let mut switcher = env.connect_client(addr).await?;
        switcher.auth("a@x.io").await?;

        let mut observer = env.connect_client(addr).await?;
        observer.auth("o@x.io").await?;
        observer.focus(&["a@x.io"]).await?;

        let reply = switcher.auth("b@x.io").await?;
        assert!(matches!(reply, ServerMessage::AuthOk { .. }));

        // keeper 还在, a 保持在线, 不应出现 a 的下线翻转
        assert!(env.system(0).registry().is_online("a@x.io").await?);
        assert_eq!(env.system(0).local_sessions_of("a@x.io").len(), 1);
        let update = observer
            .recv_matching(|m| {
                matches!(
                    m,
                    ServerMessage::PresenceUpdate { user, online: false, .. } if user == "a@x.io"
                )
            })
            .await;
        assert!(update.is_none(), "unexpected offline flip: {update:?}");

        env.shutdown().await;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_frames_keep_the_session_open() -> Result<()> {
        let mut env = TestEnv::default();
        let addr = env.start_server(TestEnv::fast_config("s1")).await?;

        let mut client = env.connect_client(addr).await?;
        client.auth("a@x.io").await?;

        // 非 JSON, 未知 type, 数组位置传标量: 都是 typed error, 不断连
        for raw in [
            "not json at all",
            r#"{"type":"subscribe","users":[]}"#,
            r#"{"type":"focus","users":"a@x.io"}"#,
        ] {
            client.send_raw(raw).await?;
            let reply = client
                .recv_matching(|m| !matches!(m, ServerMessage::PresenceUpdate { .. }))
                .await;
            assert!(
                matches!(reply, Some(ServerMessage::Error { .. })),
                "expected error for {raw}, got {reply:?}"
            );
        }

        // 会话仍然可用
        let reply = client.focus(&[]).await?;
        assert!(matches!(reply, ServerMessage::FocusOk { .. }));

        env.shutdown().await;
        Ok(())
    }
}
