//! ACIP discovery-service entrypoint: binds a raw-TCP listener for native
//! clients and an HTTP/WebSocket listener for browser clients, both feeding
//! the same dispatch loop, plus a background cleanup task for stale
//! sessions, participants, and rate-limit history.

mod announce;
mod config;
mod db;
mod dispatch;
mod rate_limit_sqlite;
mod relay;
mod session_registry;
mod state;
mod web;
mod wordlist;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use acip_protocol::crypto::Identity;
use acip_protocol::InMemoryRateLimiter;
use acip_transport::TcpTransport;
use tracing_subscriber::EnvFilter;

use config::DiscoveryServiceConfig;
use rate_limit_sqlite::{SqliteRateLimiter, SwappableRateLimiter};
use session_registry::SessionRegistry;
use state::DiscoveryState;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const RATE_EVENT_MAX_AGE: Duration = Duration::from_secs(60 * 60);
const RATE_EVENT_MAX_AGE_MS: i64 = RATE_EVENT_MAX_AGE.as_millis() as i64;
const EMPTY_SESSION_MAX_AGE_MS: i64 = 24 * 60 * 60 * 1000;

fn identity_path() -> PathBuf {
    if cfg!(windows) {
        let appdata = std::env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(appdata).join("ascii-chat").join("discovery_identity")
    } else {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".config").join("ascii-chat").join("discovery_identity")
    }
}

fn load_or_generate_identity() -> anyhow::Result<Identity> {
    let path = identity_path();
    if let Ok(bytes) = std::fs::read(&path) {
        return Identity::from_file_bytes(&bytes).map_err(|e| anyhow::anyhow!("corrupt identity file {path:?}: {e}"));
    }
    let identity = Identity::generate();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, identity.to_file_bytes())?;
    tracing::info!(path = %path.display(), fingerprint = %identity.fingerprint(), "generated discovery-service identity");
    Ok(identity)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = config::parse_args(&args);

    if let Err(issues) = cli.validate() {
        for issue in &issues {
            tracing::error!("{issue}");
        }
        std::process::exit(1);
    }

    let identity = match load_or_generate_identity() {
        Ok(id) => Some(id),
        Err(e) => {
            if cli.require_server_identity {
                tracing::error!(error = %e, "ERROR: identity is required but could not be loaded or generated");
                std::process::exit(1);
            }
            tracing::warn!(error = %e, "continuing without a persistent identity");
            None
        }
    };

    let db_pool = match &cli.discovery_database_path {
        Some(path) => match db::open(path).await {
            Ok(pool) => Some(pool),
            Err(e) => {
                tracing::warn!(error = %e, "database unavailable, continuing in-memory only");
                None
            }
        },
        None => None,
    };

    let rate_limiter = match db_pool.clone() {
        Some(pool) => SwappableRateLimiter::new(Box::new(SqliteRateLimiter::new(pool))),
        None => SwappableRateLimiter::new(Box::new(InMemoryRateLimiter::new())),
    };

    let sessions = SessionRegistry::new(db_pool.clone(), cli.require_server_identity, cli.require_client_identity);

    let state = Arc::new(DiscoveryState::new(
        sessions,
        rate_limiter,
        identity,
        cli.require_server_identity,
        cli.require_client_identity,
    ));

    if !cli.stun_servers.is_empty() {
        tracing::info!(stun = ?cli.stun_servers, "advertising STUN servers to clients");
    }
    if !cli.turn_servers.is_empty() {
        tracing::info!(turn = ?cli.turn_servers, "advertising TURN servers to clients");
    }

    announce::announce(cli.port, cli.upnp);

    tracing::info!("===================================");
    tracing::info!("ACIP discovery-service starting");
    tracing::info!(tcp_port = cli.port, ws_port = cli.websocket_port, "listeners");
    tracing::info!("===================================");

    if let Some(pool) = db_pool {
        let cleanup_state = state.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                ticker.tick().await;
                cleanup_state.sessions.prune_stale_participants().await;
                cleanup_state.rate_limiter.cleanup(RATE_EVENT_MAX_AGE).await;
                if let Err(e) = db::cleanup(&pool, RATE_EVENT_MAX_AGE_MS, EMPTY_SESSION_MAX_AGE_MS).await {
                    tracing::warn!(error = %e, "database cleanup pass failed");
                }
            }
        });
    } else {
        let cleanup_state = state.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                ticker.tick().await;
                cleanup_state.sessions.prune_stale_participants().await;
                cleanup_state.rate_limiter.cleanup(RATE_EVENT_MAX_AGE).await;
            }
        });
    }

    let tcp_listener = tokio::net::TcpListener::bind(("0.0.0.0", cli.port)).await?;
    let tcp_state = state.clone();
    let tcp_task = tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, peer)) => {
                    let state = tcp_state.clone();
                    tokio::spawn(async move {
                        let transport = Arc::new(TcpTransport::new(stream, peer));
                        dispatch::run(state, transport, peer.ip()).await;
                    });
                }
                Err(e) => tracing::warn!(error = %e, "tcp accept failed"),
            }
        }
    });

    let app = web::build_router(state.clone());
    let ws_listener = tokio::net::TcpListener::bind(("0.0.0.0", cli.websocket_port)).await?;
    let ws_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(ws_listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>()).await {
            tracing::error!(error = %e, "websocket listener exited");
        }
    });

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("received ctrl-c, shutting down"),
        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
    }

    tcp_task.abort();
    ws_task.abort();
    Ok(())
}
