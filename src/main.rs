use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};

use anyhow::Result;
use clap::Parser;
use tracing::info;

use aura_core::utils::new_server_id;
use aura_server::{AuraServerConfig, AuraSystem, AuraSystemConfig, open_server};
use aura_store::RedisStore;

#[derive(clap::Parser)]
#[command(name = "aura", version, about = "aura presence server")]
pub struct Cli {
    /// 监听端口
    #[arg(long, env = "PORT", default_value_t = 9470)]
    port: u16,
    /// 共享 store 地址
    #[arg(long, env = "STORE_URL", default_value = "redis://127.0.0.1:6379")]
    store_url: String,
    /// 服务端 id, 缺省时随机生成
    #[arg(long, env = "SERVER_ID")]
    server_id: Option<String>,
    #[arg(long, env = "HEARTBEAT_INTERVAL_MS", default_value_t = 30_000)]
    heartbeat_interval_ms: u64,
    #[arg(long, env = "PRESENCE_TTL_SECONDS", default_value_t = 90)]
    presence_ttl_seconds: u64,
    #[arg(long, env = "MAX_FOCUS_PER_CLIENT", default_value_t = 100)]
    max_focus_per_client: usize,
    #[arg(long, env = "FOCUS_RATE_LIMIT_PER_MINUTE", default_value_t = 60)]
    focus_rate_limit_per_minute: u32,
    #[arg(long, env = "MAX_CONNECTIONS_PER_IP", default_value_t = 10)]
    max_connections_per_ip: u32,
    #[arg(long, env = "PRESENCE_SHARD_COUNT", default_value_t = 1)]
    presence_shard_count: u32,
    #[arg(long, env = "WATCHER_TTL_SECONDS", default_value_t = 120)]
    watcher_ttl_seconds: u64,
    /// 翻转路由模式: sharded | targeted
    #[arg(long, env = "ROUTING_MODE", default_value = "sharded")]
    routing_mode: String,
}

impl Cli {
    fn system_config(&self) -> AuraSystemConfig {
        AuraSystemConfig {
            server_id: self
                .server_id
                .clone()
                .unwrap_or_else(new_server_id),
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            presence_ttl_seconds: self.presence_ttl_seconds,
            max_focus_per_client: self.max_focus_per_client,
            focus_rate_limit_per_minute: self.focus_rate_limit_per_minute,
            max_connections_per_ip: self.max_connections_per_ip,
            presence_shard_count: self.presence_shard_count,
            watcher_ttl_seconds: self.watcher_ttl_seconds,
            routing_mode: self.routing_mode.clone(),
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.system_config();
    config.validate()?;

    // store 连不上就直接退出, 由进程管理器重启
    let store = Arc::new(RedisStore::connect(&cli.store_url).await?);

    let system = AuraSystem::new(config, store).await?;
    info!("Presence system started, server_id: {}", system.server_id());

    let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), cli.port);
    let server = open_server(system.clone(), AuraServerConfig::new(bind_addr)).await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    server.close().await;
    system.close().await;

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Application error: {:#}", e);
        std::process::exit(1);
    }
}
