//! Gathering real NAT quality (STUN round trips, UPnP port mapping, ICE
//! candidate gathering) is external infrastructure this crate doesn't own —
//! same shape as `acip-host`'s `FrameMixer`: a trait at the seam, with a
//! conservative default standing in for the real prober.

use acip_protocol::election::{NatQuality, NatType};

pub trait NatProbe: Send + Sync {
    fn probe(&self) -> NatQuality;
}

/// Assumes the worst: no public IP, no UPnP, NAT type unknown. Good enough
/// to keep the election deterministic in the absence of a real STUN client;
/// a caller wiring this crate into a full application supplies its own
/// `NatProbe` backed by one.
pub struct DefaultNatProbe;

impl NatProbe for DefaultNatProbe {
    fn probe(&self) -> NatQuality {
        NatQuality {
            has_public_ip: false,
            upnp_available: false,
            upnp_mapped_port: 0,
            nat_type: NatType::Unknown,
            lan_reachable: true,
            stun_latency_ms: 0,
            public_address: None,
            public_port: 0,
            upload_kbps: 0,
            download_kbps: 0,
            rtt_to_discovery_service_ms: 0,
            jitter_ms: 0,
            packet_loss_pct: 0,
            has_host_candidate: true,
            has_srflx_candidate: false,
            has_relay_candidate: false,
        }
    }
}
