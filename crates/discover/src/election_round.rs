//! Reduces a whole session's NAT-quality records down to one host, using
//! `acip_protocol::election::elect` as the only comparison primitive. The
//! two-participant case (the common one) is a single `elect` call; sessions
//! with more participants fold pairwise over a canonically sorted list so
//! every participant reaches the identical winner without further talk.

use acip_protocol::election::{elect, Decision, NatQuality};
use uuid::Uuid;

/// `records` must include the caller's own `(id, quality)` pair. Returns the
/// id of the participant that should host.
pub fn elect_host(records: &[(Uuid, NatQuality)]) -> Uuid {
    let mut sorted: Vec<&(Uuid, NatQuality)> = records.iter().collect();
    sorted.sort_by_key(|(id, _)| *id);

    let mut winner = &sorted[0];
    for candidate in &sorted[1..] {
        // The initiator flag only breaks a full tie, which requires equal
        // UUIDs and can't happen across distinct participants; fixing it to
        // `false` keeps every participant's fold identical.
        let decision = elect(&winner.1, winner.0, false, &candidate.1, candidate.0);
        if decision == Decision::TheyHost {
            winner = candidate;
        }
    }
    winner.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use acip_protocol::election::NatType;

    fn record(public: bool) -> NatQuality {
        NatQuality {
            has_public_ip: public,
            upnp_available: false,
            upnp_mapped_port: 0,
            nat_type: NatType::Moderate,
            lan_reachable: true,
            stun_latency_ms: 20,
            public_address: None,
            public_port: 0,
            upload_kbps: 500,
            download_kbps: 500,
            rtt_to_discovery_service_ms: 30,
            jitter_ms: 2,
            packet_loss_pct: 0,
            has_host_candidate: true,
            has_srflx_candidate: true,
            has_relay_candidate: false,
        }
    }

    #[test]
    fn two_party_prefers_public_ip() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let records = vec![(a, record(false)), (b, record(true))];
        assert_eq!(elect_host(&records), b);
    }

    #[test]
    fn fold_is_order_independent() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let c = Uuid::from_u128(3);
        let mut records = vec![(a, record(false)), (b, record(false)), (c, record(true))];
        let winner = elect_host(&records);
        records.reverse();
        assert_eq!(elect_host(&records), winner);
        assert_eq!(winner, c);
    }

    #[test]
    fn single_participant_hosts_itself() {
        let a = Uuid::from_u128(1);
        let records = vec![(a, record(false))];
        assert_eq!(elect_host(&records), a);
    }
}
