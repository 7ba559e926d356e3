//! Discovery client entrypoint: finds or creates a session on a
//! discovery-service, elects a host with a peer, and either hosts or
//! connects, logging every state transition as it goes.

mod config;
mod connect_host;
mod election_round;
mod fsm;
mod host_role;
mod nat_probe;
mod session;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use acip_protocol::crypto::SecureChannel;
use acip_protocol::{AcipError, Packet, PacketType};
use acip_transport::Transport;
use anyhow::Result;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use fsm::State;
use nat_probe::DefaultNatProbe;

const RECV_TIMEOUT: Duration = Duration::from_secs(60);
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

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
        exit_for_signal.store(true, Ordering::Release);
    });

    let (state_tx, mut state_rx) = watch::channel(State::Init);
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow();
            tracing::info!(?state, "discovery client state changed");
        }
    });

    let nat_probe = Arc::new(DefaultNatProbe);
    match session::run(cli, nat_probe, should_exit.clone(), state_tx).await {
        Ok((transport, secure_channel)) => {
            tracing::info!("session active, relaying packets until shutdown");
            run_active_loop(transport, secure_channel, should_exit).await;
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "discovery attempt failed");
            std::process::exit(1);
        }
    }
}

struct PacketReader {
    buf: Vec<u8>,
}

impl PacketReader {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    async fn next_packet(&mut self, transport: &dyn Transport) -> Result<Packet, AcipError> {
        loop {
            if self.buf.len() >= acip_protocol::PACKET_HEADER_SIZE {
                let declared_len =
                    u32::from_be_bytes([self.buf[6], self.buf[7], self.buf[8], self.buf[9]]) as usize;
                let total = acip_protocol::PACKET_HEADER_SIZE + declared_len;
                if self.buf.len() >= total {
                    let packet = Packet::decode(&self.buf[..total])?;
                    self.buf.drain(..total);
                    return Ok(packet);
                }
            }
            let mut chunk = vec![0u8; 8 * 1024];
            let n = transport.recv(&mut chunk, RECV_TIMEOUT).await?;
            if n == 0 {
                return Err(AcipError::EndOfStream);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Once a media transport is established (either the one we host clients
/// on, or the one we connected to the host with), this just keeps the
/// process alive and answers keepalives; real rendering happens outside
/// this crate. `secure_channel` is `None` only when `transport` is the
/// unsecured discovery-service connection (we were elected host), in
/// which case keepalive replies go out unsealed too.
async fn run_active_loop(transport: Arc<dyn Transport>, secure_channel: Option<SecureChannel>, should_exit: Arc<AtomicBool>) {
    let mut reader = PacketReader::new();
    loop {
        if should_exit.load(Ordering::Acquire) {
            break;
        }
        match reader.next_packet(transport.as_ref()).await {
            Ok(packet) if packet.packet_type == PacketType::Ping as u16 => {
                let pong_payload = match &secure_channel {
                    Some(channel) => match channel.seal(&[]) {
                        Ok(sealed) => sealed,
                        Err(_) => continue,
                    },
                    None => Vec::new(),
                };
                if let Ok(bytes) = Packet::new(PacketType::Pong, pong_payload).encode() {
                    let _ = transport.send(&bytes, SEND_TIMEOUT).await;
                }
            }
            Ok(_) => continue,
            Err(AcipError::Timeout) => continue,
            Err(_) => break,
        }
    }
    transport.close().await;
}
