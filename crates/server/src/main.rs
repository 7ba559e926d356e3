//! ACIP server mode entrypoint: the session creator runs the star-topology
//! host directly on a fixed port. Binds a raw-TCP listener on
//! `--address:--port` and, when `--address6` is given, a second listener
//! on that address for IPv6-only peers.

mod config;
mod session;

use std::net::IpAddr;
use std::sync::Arc;

use acip_host::NullMixer;
use acip_protocol::InMemoryRateLimiter;
use acip_transport::TcpTransport;
use anyhow::Result;
use tracing_subscriber::EnvFilter;

use config::ServerConfig;
use session::SessionHost;

fn init_tracing(config: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match &config.log_file {
        Some(path) => match std::fs::File::create(path) {
            Ok(file) => subscriber.with_writer(std::sync::Mutex::new(file)).init(),
            Err(e) => {
                subscriber.init();
                tracing::warn!(path = %path, error = %e, "could not open log file, logging to stderr");
            }
        },
        None => subscriber.init(),
    }
}

async fn accept_loop(listener: tokio::net::TcpListener, host: Arc<SessionHost>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let host = host.clone();
                tokio::spawn(async move {
                    let transport = Arc::new(TcpTransport::new(stream, peer));
                    session::handle_client(host, transport, peer.ip()).await;
                });
            }
            Err(e) => tracing::warn!(error = %e, "tcp accept failed"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = config::parse_args(&args);

    init_tracing(&config);

    if let Err(issues) = config.validate() {
        for issue in &issues {
            tracing::error!("{issue}");
        }
        std::process::exit(1);
    }

    tracing::info!("===================================");
    tracing::info!("ACIP server starting");
    tracing::info!(address = %config.address, port = config.port, "primary listener");
    tracing::info!("===================================");

    let rate_limiter = Arc::new(InMemoryRateLimiter::new());
    let host = Arc::new(SessionHost::new(rate_limiter, Arc::new(NullMixer)));

    let primary_listener = tokio::net::TcpListener::bind((config.address.as_str(), config.port)).await?;
    let primary_task = tokio::spawn(accept_loop(primary_listener, host.clone()));

    let secondary_task = if let Some(address6) = &config.address6 {
        let addr: IpAddr = address6.parse().unwrap_or_else(|_| "::".parse().unwrap());
        match tokio::net::TcpListener::bind((addr, config.port)).await {
            Ok(listener) => {
                tracing::info!(address = %addr, port = config.port, "secondary (ipv6) listener");
                Some(tokio::spawn(accept_loop(listener, host.clone())))
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to bind secondary ipv6 listener, continuing without it");
                None
            }
        }
    } else {
        None
    };

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("received ctrl-c, shutting down"),
        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
    }

    primary_task.abort();
    if let Some(task) = secondary_task {
        task.abort();
    }
    Ok(())
}
