//! Shared state handed to every connection's dispatch task: the session
//! registry, the swappable rate limiter, this process's identity, and a
//! map of currently-connected participants used by the signaling relay.

use std::collections::HashMap;
use std::sync::Arc;

use acip_protocol::crypto::Identity;
use acip_transport::Transport;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::rate_limit_sqlite::SwappableRateLimiter;
use crate::session_registry::SessionRegistry;

pub struct DiscoveryState {
    pub sessions: SessionRegistry,
    pub rate_limiter: SwappableRateLimiter,
    pub identity: Option<Identity>,
    pub require_server_identity: bool,
    pub require_client_identity: bool,
    /// Live transports for connected participants, keyed by participant id.
    /// Populated on `SessionJoin`/`SessionCreate`, removed when the
    /// connection's dispatch loop exits.
    pub connections: RwLock<HashMap<Uuid, Arc<dyn Transport>>>,
}

impl DiscoveryState {
    pub fn new(
        sessions: SessionRegistry,
        rate_limiter: SwappableRateLimiter,
        identity: Option<Identity>,
        require_server_identity: bool,
        require_client_identity: bool,
    ) -> Self {
        Self {
            sessions,
            rate_limiter,
            identity,
            require_server_identity,
            require_client_identity,
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register_connection(&self, participant_id: Uuid, transport: Arc<dyn Transport>) {
        self.connections.write().await.insert(participant_id, transport);
    }

    pub async fn deregister_connection(&self, participant_id: Uuid) {
        self.connections.write().await.remove(&participant_id);
    }
}
