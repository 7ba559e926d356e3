//! Drives one discovery attempt end-to-end: connect to the discovery
//! service, create or join a session, wait for a peer, negotiate NAT
//! quality, elect a host, then either host or connect. Every wait accepts
//! `should_exit` and polls it at least every 100 ms, same as
//! `acip_transport::connect_dual_stack`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use acip_protocol::crypto::SecureChannel;
use acip_protocol::election::NatQuality;
use acip_protocol::{
    AcipError, ClientCapabilities, NatQualityAdvisory, Packet, PacketType, SessionCreate, SessionCreated,
    SessionInfo, SessionInfoRequest, SessionJoin, SessionJoined, SessionLookup, BROADCAST_RECIPIENT,
};
use acip_transport::{connect_dual_stack, TcpTransport, Transport};
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::DiscoverConfig;
use crate::election_round::elect_host;
use crate::fsm::{DiscoveryClientFsm, Event, State};
use crate::nat_probe::NatProbe;
use crate::{connect_host, host_role};

const DISCOVERY_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const READ_CHUNK: usize = 8 * 1024;
const MAX_ACCUMULATED: usize = 256 * 1024;
const PEER_WAIT_POLL: Duration = Duration::from_millis(100);
const NEGOTIATION_DEADLINE: Duration = Duration::from_secs(10);

struct PacketReader {
    buf: Vec<u8>,
}

impl PacketReader {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    async fn next_packet(&mut self, transport: &dyn Transport, timeout: Duration) -> Result<Packet, AcipError> {
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
            if self.buf.len() > MAX_ACCUMULATED {
                return Err(AcipError::Oversize(self.buf.len()));
            }
            let mut chunk = vec![0u8; READ_CHUNK];
            let n = transport.recv(&mut chunk, timeout).await?;
            if n == 0 {
                return Err(AcipError::EndOfStream);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    async fn next_typed<T: serde::de::DeserializeOwned>(
        &mut self,
        transport: &dyn Transport,
        expect: PacketType,
        timeout: Duration,
    ) -> Result<T, AcipError> {
        let packet = self.next_packet(transport, timeout).await?;
        if packet.packet_type != expect as u16 {
            return Err(AcipError::HandshakeFailed(format!(
                "expected {expect:?}, got packet type {}",
                packet.packet_type
            )));
        }
        serde_json::from_slice(&packet.payload).map_err(|e| AcipError::InvalidParam(e.to_string()))
    }

    /// Like [`next_packet`](Self::next_packet), but chops `overall_timeout`
    /// into `PEER_WAIT_POLL`-sized steps so `should_exit` is checked at
    /// least that often instead of blocking for the full duration.
    async fn next_packet_polling(
        &mut self,
        transport: &dyn Transport,
        overall_timeout: Duration,
        should_exit: &Arc<AtomicBool>,
    ) -> Result<Packet, AcipError> {
        let deadline = Instant::now() + overall_timeout;
        loop {
            if should_exit.load(Ordering::Acquire) {
                return Err(AcipError::Timeout);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(AcipError::Timeout);
            }
            match self.next_packet(transport, remaining.min(PEER_WAIT_POLL)).await {
                Ok(packet) => return Ok(packet),
                Err(AcipError::Timeout) => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

async fn send_json(transport: &dyn Transport, packet_type: PacketType, payload: &impl serde::Serialize) -> Result<(), AcipError> {
    let bytes = serde_json::to_vec(payload).map_err(|e| AcipError::InvalidParam(e.to_string()))?;
    let packet = Packet::new(packet_type, bytes);
    transport.send(&packet.encode()?, REQUEST_TIMEOUT).await
}

/// Runs one discovery attempt, emitting every state transition on
/// `state_tx`. Returns once the session reaches `Active` (the caller owns
/// the resulting transport afterward), or an error from `Ended`/`Failed`.
/// The returned `SecureChannel` is `None` when we were elected host: the
/// transport handed back in that case is the discovery-service connection
/// itself, which is never handshake-secured.
pub async fn run(
    config: DiscoverConfig,
    nat_probe: Arc<dyn NatProbe>,
    should_exit: Arc<AtomicBool>,
    state_tx: watch::Sender<State>,
) -> Result<(Arc<dyn Transport>, Option<SecureChannel>), AcipError> {
    let mut fsm = DiscoveryClientFsm::new();
    let self_id = Uuid::new_v4();

    emit(&mut fsm, Event::BeginConnect, &state_tx)?;
    let discovery_transport = connect_discovery(&config, should_exit.clone()).await?;

    let has_session_string = config.session_string.is_some();
    emit(&mut fsm, Event::DiscoveryConnected { has_session_string }, &state_tx)?;

    let mut reader = PacketReader::new();
    let session_info = if let Some(session_string) = &config.session_string {
        send_json(
            discovery_transport.as_ref(),
            PacketType::SessionLookup,
            &SessionLookup { session_string: session_string.clone() },
        )
        .await?;
        let info: SessionInfo = reader
            .next_typed(discovery_transport.as_ref(), PacketType::SessionInfo, REQUEST_TIMEOUT)
            .await?;
        send_json(
            discovery_transport.as_ref(),
            PacketType::SessionJoin,
            &SessionJoin {
                session_uuid: info.session_uuid,
                participant_id: self_id,
                participant_pubkey: [0u8; 32],
            },
        )
        .await?;
        let joined: SessionJoined = reader
            .next_typed(discovery_transport.as_ref(), PacketType::SessionJoined, REQUEST_TIMEOUT)
            .await?;
        joined.session_info
    } else {
        send_json(
            discovery_transport.as_ref(),
            PacketType::SessionCreate,
            &SessionCreate { creator_id: self_id, creator_pubkey: [0u8; 32], session_settings: None },
        )
        .await?;
        let created: SessionCreated = reader
            .next_typed(discovery_transport.as_ref(), PacketType::SessionCreated, REQUEST_TIMEOUT)
            .await?;
        tracing::info!(session_string = %created.session_string, "session created");
        SessionInfo {
            session_uuid: created.session_uuid,
            participants: vec![],
            host_participant: None,
            session_settings: acip_protocol::SessionSettings::default(),
        }
    };
    emit(&mut fsm, Event::SessionReady, &state_tx)?;

    let session_info = wait_for_peer(discovery_transport.as_ref(), &mut reader, session_info.session_uuid, &should_exit).await?;
    emit(&mut fsm, Event::PeerThresholdReached, &state_tx)?;

    let my_quality = nat_probe.probe();
    let peer_records = negotiate(
        discovery_transport.as_ref(),
        &mut reader,
        session_info.session_uuid,
        self_id,
        &my_quality,
        &session_info,
        &should_exit,
    )
    .await?;

    let mut records: Vec<(Uuid, NatQuality)> = vec![(self_id, my_quality)];
    records.extend(peer_records);
    let host_id = elect_host(&records);

    let capabilities = ClientCapabilities {
        terminal_width: 80,
        terminal_height: 24,
        color_depth: 24,
        renderer: "ascii".to_string(),
        charset: "ascii".to_string(),
    };

    if host_id == self_id {
        emit(&mut fsm, Event::ElectedSelf, &state_tx)?;
        let port = config.port;
        let exit_for_host = should_exit.clone();
        tokio::spawn(async move {
            if let Err(e) = host_role::run(port, exit_for_host).await {
                tracing::warn!(error = %e, "hosting task ended");
            }
        });
        emit(&mut fsm, Event::MediaFlowing, &state_tx)?;
        Ok((discovery_transport, None))
    } else {
        emit(&mut fsm, Event::ElectedPeer, &state_tx)?;
        let host_participant = session_info
            .participants
            .iter()
            .find(|p| p.participant_id == host_id)
            .ok_or(AcipError::NotFound)?;
        let connected = connect_host::connect_to_host(
            discovery_transport.as_ref(),
            session_info.session_uuid,
            self_id,
            host_id,
            &host_participant.ip,
            config.port,
            capabilities,
        )
        .await?;
        emit(&mut fsm, Event::MediaFlowing, &state_tx)?;
        Ok((connected.transport, Some(connected.secure_channel)))
    }
}

fn emit(fsm: &mut DiscoveryClientFsm, event: Event, state_tx: &watch::Sender<State>) -> Result<State, AcipError> {
    let next = fsm
        .step(event)
        .map_err(|e| AcipError::InvalidState(e))?;
    let _ = state_tx.send(next);
    Ok(next)
}

async fn connect_discovery(config: &DiscoverConfig, should_exit: Arc<AtomicBool>) -> Result<Arc<dyn Transport>, AcipError> {
    let stream = connect_dual_stack(&config.discovery_server, config.discovery_port, DISCOVERY_CONNECT_TIMEOUT, should_exit).await?;
    let peer = stream.peer_addr().map_err(|e| AcipError::InvalidParam(e.to_string()))?;
    Ok(Arc::new(TcpTransport::new(stream, peer)))
}

/// Polls `SessionInfoRequest` until at least two participants are present
/// or `should_exit` fires.
async fn wait_for_peer(
    transport: &dyn Transport,
    reader: &mut PacketReader,
    session_uuid: Uuid,
    should_exit: &Arc<AtomicBool>,
) -> Result<SessionInfo, AcipError> {
    loop {
        if should_exit.load(Ordering::Acquire) {
            return Err(AcipError::Timeout);
        }
        send_json(transport, PacketType::SessionInfoRequest, &SessionInfoRequest { session_uuid }).await?;
        let packet = reader.next_packet_polling(transport, REQUEST_TIMEOUT, should_exit).await?;
        if packet.packet_type != PacketType::SessionInfo as u16 {
            return Err(AcipError::HandshakeFailed(format!(
                "expected SessionInfo, got packet type {}",
                packet.packet_type
            )));
        }
        let info: SessionInfo =
            serde_json::from_slice(&packet.payload).map_err(|e| AcipError::InvalidParam(e.to_string()))?;
        if info.participants.len() >= 2 {
            return Ok(info);
        }
        tokio::time::sleep(PEER_WAIT_POLL).await;
    }
}

/// Broadcasts our NAT-quality advisory, then collects one reply per other
/// declared participant until all have answered or 10 s elapse.
async fn negotiate(
    transport: &dyn Transport,
    reader: &mut PacketReader,
    session_uuid: Uuid,
    self_id: Uuid,
    my_quality: &NatQuality,
    session_info: &SessionInfo,
    should_exit: &Arc<AtomicBool>,
) -> Result<Vec<(Uuid, NatQuality)>, AcipError> {
    send_json(
        transport,
        PacketType::NatQualityAdvisory,
        &NatQualityAdvisory {
            session_uuid,
            from: self_id,
            to: BROADCAST_RECIPIENT,
            quality: my_quality.clone(),
            signature: None,
        },
    )
    .await?;

    let expected: usize = session_info.participants.iter().filter(|p| p.participant_id != self_id).count();
    let mut collected = Vec::new();
    let deadline = Instant::now() + NEGOTIATION_DEADLINE;

    while collected.len() < expected && Instant::now() < deadline {
        if should_exit.load(Ordering::Acquire) {
            break;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match reader.next_packet_polling(transport, remaining, should_exit).await {
            Ok(packet) if packet.packet_type == PacketType::NatQualityAdvisory as u16 => {
                match serde_json::from_slice::<NatQualityAdvisory>(&packet.payload) {
                    Ok(advisory) if advisory.session_uuid == session_uuid => {
                        collected.push((advisory.from, advisory.quality))
                    }
                    Ok(_) => continue,
                    Err(e) => return Err(AcipError::InvalidParam(e.to_string())),
                }
            }
            Ok(_) => continue,
            Err(AcipError::Timeout) => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(collected)
}
