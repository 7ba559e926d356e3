//! Persistent rate-limit ledger backed by the `rate_events` table, and the
//! "last call wins" backend-swap wrapper around [`RateLimiter`].
//!
//! The wire protocol design is explicit that when both
//! `rate_limiter_create_sqlite(NULL)` (in-memory) and a later
//! `rate_limiter_set_sqlite_db` call occur, the later call wins — modeled
//! here as a swap, not a constructor argument, so "last call wins" is
//! literal: [`SwappableRateLimiter::set_backend`] replaces whatever backend
//! was installed before it, at any point in the process's lifetime.

use std::net::IpAddr;
use std::time::Duration;

use acip_protocol::{EventKind, RateLimiter};
use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::RwLock;

fn event_kind_str(kind: EventKind) -> &'static str {
    match kind {
        EventKind::SessionCreate => "session_create",
        EventKind::SessionLookup => "session_lookup",
        EventKind::SessionJoin => "session_join",
        EventKind::Connection => "connection",
        EventKind::ImageFrame => "image_frame",
        EventKind::Audio => "audio",
        EventKind::Ping => "ping",
        EventKind::ClientJoin => "client_join",
        EventKind::Control => "control",
    }
}

pub struct SqliteRateLimiter {
    pool: SqlitePool,
}

impl SqliteRateLimiter {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateLimiter for SqliteRateLimiter {
    async fn check(&self, ip: IpAddr, kind: EventKind) -> bool {
        let (max, window) = kind.default_limit();
        let cutoff = crate::db::now_unix_ms() - window.as_millis() as i64;
        let ip_str = ip.to_string();
        let kind_str = event_kind_str(kind);
        let row: Result<(i64,), _> = sqlx::query_as(
            "SELECT COUNT(*) FROM rate_events WHERE ip = ? AND kind = ? AND timestamp_ms >= ?",
        )
        .bind(&ip_str)
        .bind(kind_str)
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await;

        match row {
            Ok((count,)) => (count as u32) < max,
            Err(e) => {
                tracing::warn!(error = %e, "rate limit query failed, allowing by default");
                true
            }
        }
    }

    async fn record(&self, ip: IpAddr, kind: EventKind) {
        let now = crate::db::now_unix_ms();
        let ip_str = ip.to_string();
        let kind_str = event_kind_str(kind);
        if let Err(e) = sqlx::query("INSERT INTO rate_events (ip, kind, timestamp_ms) VALUES (?, ?, ?)")
            .bind(&ip_str)
            .bind(kind_str)
            .bind(now)
            .execute(&self.pool)
            .await
        {
            tracing::warn!(error = %e, "failed to record rate-limit event");
        }
    }

    async fn cleanup(&self, max_age: Duration) {
        if let Err(e) = crate::db::cleanup(&self.pool, max_age.as_millis() as i64, 60 * 60 * 1000).await {
            tracing::warn!(error = %e, "rate-limit cleanup failed");
        }
    }
}

/// Wraps whichever [`RateLimiter`] backend is currently installed so callers
/// can swap it out (e.g. in-memory at startup, SQL-backed once the database
/// opens) without restarting the service or threading a constructor flag
/// through every call site.
pub struct SwappableRateLimiter {
    current: RwLock<Box<dyn RateLimiter>>,
}

impl SwappableRateLimiter {
    pub fn new(initial: Box<dyn RateLimiter>) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    pub async fn set_backend(&self, backend: Box<dyn RateLimiter>) {
        *self.current.write().await = backend;
    }
}

#[async_trait]
impl RateLimiter for SwappableRateLimiter {
    async fn check(&self, ip: IpAddr, kind: EventKind) -> bool {
        self.current.read().await.check(ip, kind).await
    }

    async fn record(&self, ip: IpAddr, kind: EventKind) {
        self.current.read().await.record(ip, kind).await
    }

    async fn cleanup(&self, max_age: Duration) {
        self.current.read().await.cleanup(max_age).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acip_protocol::InMemoryRateLimiter;

    #[tokio::test]
    async fn sqlite_backend_enforces_the_same_contract_as_in_memory() {
        let pool = crate::db::open(":memory:").await.unwrap();
        let limiter = SqliteRateLimiter::new(pool);
        let ip: IpAddr = "198.51.100.1".parse().unwrap();
        let (max, _) = EventKind::Ping.default_limit();
        for _ in 0..max {
            assert!(limiter.check(ip, EventKind::Ping).await);
            limiter.record(ip, EventKind::Ping).await;
        }
        assert!(!limiter.check(ip, EventKind::Ping).await);
    }

    #[tokio::test]
    async fn swap_replaces_the_active_backend() {
        let swappable = SwappableRateLimiter::new(Box::new(InMemoryRateLimiter::new()));
        let ip: IpAddr = "198.51.100.2".parse().unwrap();
        let (max, _) = EventKind::Control.default_limit();
        for _ in 0..max {
            swappable.record(ip, EventKind::Control).await;
        }
        assert!(!swappable.check(ip, EventKind::Control).await);

        // Swapping to a fresh backend forgets the in-memory history — "last
        // call wins" means the newly installed backend is authoritative.
        let pool = crate::db::open(":memory:").await.unwrap();
        swappable.set_backend(Box::new(SqliteRateLimiter::new(pool))).await;
        assert!(swappable.check(ip, EventKind::Control).await);
    }
}
