//! ACIP client mode entrypoint: a participant connecting to a known server
//! address.

mod config;
mod session;
mod sink;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use sink::NullSink;

#[tokio::main]
async fn main() -> Result<()> {
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

    let should_exit = Arc::new(AtomicBool::new(false));
    let exit_for_signal = should_exit.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        exit_for_signal.store(true, std::sync::atomic::Ordering::Release);
    });

    session::run(cli, Arc::new(NullSink), should_exit).await?;
    Ok(())
}
