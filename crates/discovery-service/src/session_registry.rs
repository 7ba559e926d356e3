//! Session lifecycle: create/lookup/join/info, backed by an in-memory map
//! with `sqlx` persistence alongside it. A session-string collision during
//! `create` retries against a bounded attempt budget before failing
//! `Exhausted`, per the data model's session-string section.

use std::collections::HashMap;
use std::time::Duration;

use acip_protocol::{AcipError, NatQuality, ParticipantInfo, SessionInfo, SessionSettings};
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::wordlist::random_session_string;

pub const DEFAULT_MAX_PARTICIPANTS: u32 = 32;
const STRING_GENERATION_ATTEMPTS: u32 = 64;
/// Grace period after the last ping before a participant's row is pruned.
pub const PARTICIPANT_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Participant {
    pub id: Uuid,
    pub pubkey: [u8; 32],
    pub ip: std::net::IpAddr,
    pub joined_at_ms: i64,
    pub last_seen_ms: i64,
    pub nat_quality: Option<NatQuality>,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub uuid: Uuid,
    pub session_string: String,
    pub creator_id: Uuid,
    pub creator_pubkey: [u8; 32],
    pub created_at_ms: i64,
    pub max_participants: u32,
    pub host_participant: Option<Uuid>,
    pub participants: Vec<Participant>,
    pub settings: SessionSettings,
}

impl Session {
    fn info(&self) -> SessionInfo {
        SessionInfo {
            session_uuid: self.uuid,
            participants: self
                .participants
                .iter()
                .map(|p| ParticipantInfo {
                    participant_id: p.id,
                    ip: p.ip.to_string(),
                    joined_at: p.joined_at_ms,
                })
                .collect(),
            host_participant: self.host_participant,
            session_settings: self.settings.clone(),
        }
    }
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Session>>,
    pool: Option<SqlitePool>,
    require_server_identity: bool,
    require_client_identity: bool,
}

impl SessionRegistry {
    pub fn new(pool: Option<SqlitePool>, require_server_identity: bool, require_client_identity: bool) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            pool,
            require_server_identity,
            require_client_identity,
        }
    }

    pub async fn create(
        &self,
        creator_id: Uuid,
        creator_pubkey: [u8; 32],
        creator_ip: std::net::IpAddr,
        has_identity: bool,
        settings: Option<SessionSettings>,
    ) -> Result<(Uuid, String), AcipError> {
        if self.require_server_identity && !has_identity {
            return Err(AcipError::AuthRequired);
        }

        let mut sessions = self.sessions.write().await;
        let mut candidate = None;
        for _ in 0..STRING_GENERATION_ATTEMPTS {
            let s = random_session_string();
            if !sessions.values().any(|sess| sess.session_string == s) {
                candidate = Some(s);
                break;
            }
        }
        let session_string = candidate.ok_or_else(|| {
            AcipError::Exhausted("could not find an unused session string".into())
        })?;

        let now = crate::db::now_unix_ms();
        let uuid = Uuid::new_v4();
        let creator = Participant {
            id: creator_id,
            pubkey: creator_pubkey,
            ip: creator_ip,
            joined_at_ms: now,
            last_seen_ms: now,
            nat_quality: None,
        };
        let session = Session {
            uuid,
            session_string: session_string.clone(),
            creator_id,
            creator_pubkey,
            created_at_ms: now,
            max_participants: DEFAULT_MAX_PARTICIPANTS,
            host_participant: None,
            participants: vec![creator],
            settings: settings.unwrap_or_default(),
        };
        sessions.insert(uuid, session);
        drop(sessions);

        if let Some(pool) = &self.pool {
            if let Err(e) = sqlx::query(
                "INSERT INTO sessions (uuid, session_string, creator_id, creator_pubkey, created_at, max_participants, host_id) VALUES (?, ?, ?, ?, ?, ?, NULL)",
            )
            .bind(uuid.to_string())
            .bind(&session_string)
            .bind(creator_id.to_string())
            .bind(creator_pubkey.as_slice())
            .bind(now)
            .bind(DEFAULT_MAX_PARTICIPANTS as i64)
            .execute(pool)
            .await
            {
                tracing::warn!(error = %e, "failed to persist new session, continuing in-memory only");
            }
        }

        Ok((uuid, session_string))
    }

    pub async fn lookup(&self, session_string: &str) -> Result<Uuid, AcipError> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .find(|s| s.session_string == session_string)
            .map(|s| s.uuid)
            .ok_or(AcipError::NotFound)
    }

    pub async fn join(
        &self,
        session_uuid: Uuid,
        participant_id: Uuid,
        participant_pubkey: [u8; 32],
        participant_ip: std::net::IpAddr,
        has_identity: bool,
    ) -> Result<SessionInfo, AcipError> {
        if self.require_client_identity && !has_identity {
            return Err(AcipError::AuthRequired);
        }

        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&session_uuid).ok_or(AcipError::NotFound)?;

        if session.participants.iter().any(|p| p.id == participant_id) {
            return Err(AcipError::AlreadyJoined);
        }
        if session.participants.len() as u32 >= session.max_participants {
            return Err(AcipError::Full);
        }

        let now = crate::db::now_unix_ms();
        session.participants.push(Participant {
            id: participant_id,
            pubkey: participant_pubkey,
            ip: participant_ip,
            joined_at_ms: now,
            last_seen_ms: now,
            nat_quality: None,
        });
        let info = session.info();
        drop(sessions);

        if let Some(pool) = &self.pool {
            if let Err(e) = sqlx::query(
                "INSERT INTO participants (session_uuid, participant_id, pubkey, ip, joined_at, last_seen_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(session_uuid.to_string())
            .bind(participant_id.to_string())
            .bind(participant_pubkey.as_slice())
            .bind(participant_ip.to_string())
            .bind(now)
            .bind(now)
            .execute(pool)
            .await
            {
                tracing::warn!(error = %e, "failed to persist new participant, continuing in-memory only");
            }
        }

        Ok(info)
    }

    pub async fn info(&self, session_uuid: Uuid) -> Result<SessionInfo, AcipError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&session_uuid)
            .map(Session::info)
            .ok_or(AcipError::NotFound)
    }

    pub async fn session_uuid_for_participant(&self, participant_id: Uuid) -> Option<Uuid> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .find(|s| s.participants.iter().any(|p| p.id == participant_id))
            .map(|s| s.uuid)
    }

    pub async fn participant_ids(&self, session_uuid: Uuid) -> Vec<Uuid> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&session_uuid)
            .map(|s| s.participants.iter().map(|p| p.id).collect())
            .unwrap_or_default()
    }

    pub async fn touch(&self, session_uuid: Uuid, participant_id: Uuid) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&session_uuid) {
            if let Some(p) = session.participants.iter_mut().find(|p| p.id == participant_id) {
                p.last_seen_ms = crate::db::now_unix_ms();
            }
        }
    }

    pub async fn set_host(&self, session_uuid: Uuid, host_participant: Uuid) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&session_uuid) {
            session.host_participant = Some(host_participant);
        }
    }

    /// Drop a participant whose last ping exceeded the grace period. The
    /// creator's session survives as long as any participant remains;
    /// deleting the last participant removes the session entirely.
    pub async fn prune_stale_participants(&self) {
        let cutoff = crate::db::now_unix_ms() - PARTICIPANT_GRACE_PERIOD.as_millis() as i64;
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, session| {
            session.participants.retain(|p| p.last_seen_ms >= cutoff);
            !session.participants.is_empty()
        });
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip() -> std::net::IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[tokio::test]
    async fn create_then_lookup_roundtrips() {
        let registry = SessionRegistry::new(None, false, false);
        let creator = Uuid::new_v4();
        let (uuid, session_string) = registry
            .create(creator, [0u8; 32], ip(), false, None)
            .await
            .unwrap();
        assert!(crate::wordlist::is_well_formed(&session_string));

        let looked_up = registry.lookup(&session_string).await.unwrap();
        assert_eq!(looked_up, uuid);

        let info = registry.info(uuid).await.unwrap();
        assert_eq!(info.session_uuid, uuid);
        assert_eq!(info.participants.len(), 1);
    }

    #[tokio::test]
    async fn lookup_of_unknown_string_is_not_found() {
        let registry = SessionRegistry::new(None, false, false);
        assert!(matches!(
            registry.lookup("nope-nope-nope").await,
            Err(AcipError::NotFound)
        ));
    }

    #[tokio::test]
    async fn join_rejects_duplicate_participant() {
        let registry = SessionRegistry::new(None, false, false);
        let creator = Uuid::new_v4();
        let (uuid, _) = registry.create(creator, [0u8; 32], ip(), false, None).await.unwrap();
        assert!(matches!(
            registry.join(uuid, creator, [0u8; 32], ip(), false).await,
            Err(AcipError::AlreadyJoined)
        ));
    }

    #[tokio::test]
    async fn join_rejects_when_full() {
        let registry = SessionRegistry::new(None, false, false);
        let creator = Uuid::new_v4();
        let (uuid, _) = registry.create(creator, [0u8; 32], ip(), false, None).await.unwrap();
        {
            let mut sessions = registry.sessions.write().await;
            sessions.get_mut(&uuid).unwrap().max_participants = 1;
        }
        let joiner = Uuid::new_v4();
        assert!(matches!(
            registry.join(uuid, joiner, [0u8; 32], ip(), false).await,
            Err(AcipError::Full)
        ));
    }

    #[tokio::test]
    async fn auth_required_rejects_missing_identity() {
        let registry = SessionRegistry::new(None, true, true);
        let creator = Uuid::new_v4();
        assert!(matches!(
            registry.create(creator, [0u8; 32], ip(), false, None).await,
            Err(AcipError::AuthRequired)
        ));
        let (uuid, _) = registry.create(creator, [0u8; 32], ip(), true, None).await.unwrap();
        let joiner = Uuid::new_v4();
        assert!(matches!(
            registry.join(uuid, joiner, [0u8; 32], ip(), false).await,
            Err(AcipError::AuthRequired)
        ));
    }

    #[tokio::test]
    async fn stale_participants_are_pruned_after_grace_period() {
        let registry = SessionRegistry::new(None, false, false);
        let creator = Uuid::new_v4();
        let (uuid, _) = registry.create(creator, [0u8; 32], ip(), false, None).await.unwrap();
        {
            let mut sessions = registry.sessions.write().await;
            let session = sessions.get_mut(&uuid).unwrap();
            session.participants[0].last_seen_ms = 0;
        }
        registry.prune_stale_participants().await;
        assert_eq!(registry.session_count().await, 0);
    }
}
