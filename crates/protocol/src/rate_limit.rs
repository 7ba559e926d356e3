//! The rate limiter contract shared by the star-topology host and the
//! discovery-service. Both pluggable backends (in-memory here; a
//! persistent SQL-backed ledger in the discovery-service binary)
//! implement this same trait so callers use either interchangeably.
//!
//! `check` then `record` is deliberately not atomic as a pair — two
//! concurrent callers may both pass `check` before either calls `record`.
//! Limits are advisory to within a factor of concurrent-request count, not
//! a hard ceiling.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SessionCreate,
    SessionLookup,
    SessionJoin,
    Connection,
    ImageFrame,
    Audio,
    Ping,
    ClientJoin,
    Control,
}

impl EventKind {
    /// Default (max_count, window) per the ledger table in the data model.
    pub fn default_limit(&self) -> (u32, Duration) {
        use EventKind::*;
        match self {
            SessionCreate => (10, Duration::from_secs(60)),
            SessionLookup => (30, Duration::from_secs(60)),
            SessionJoin => (20, Duration::from_secs(60)),
            Connection => (60, Duration::from_secs(60)),
            ImageFrame => (120, Duration::from_secs(1)),
            Audio => (100, Duration::from_secs(1)),
            Ping => (2, Duration::from_secs(1)),
            ClientJoin => (5, Duration::from_secs(60)),
            Control => (30, Duration::from_secs(1)),
        }
    }
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check(&self, ip: IpAddr, kind: EventKind) -> bool;
    async fn record(&self, ip: IpAddr, kind: EventKind);
    async fn cleanup(&self, max_age: Duration);
}

/// Sliding-window in-memory limiter: a mutex-guarded map from
/// `(ip, kind)` to a deque of record timestamps.
pub struct InMemoryRateLimiter {
    windows: Mutex<HashMap<(IpAddr, EventKindKey), VecDeque<Instant>>>,
}

// EventKind isn't Eq+Hash-friendly across crate boundaries if extended later;
// keep a tiny newtype so the map key stays simple and local to this module.
type EventKindKey = EventKind;

impl Default for InMemoryRateLimiter {
    fn default() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check(&self, ip: IpAddr, kind: EventKind) -> bool {
        let (max, window) = kind.default_limit();
        let mut windows = self.windows.lock().await;
        let entry = windows.entry((ip, kind)).or_default();
        let cutoff = Instant::now() - window;
        while matches!(entry.front(), Some(t) if *t < cutoff) {
            entry.pop_front();
        }
        (entry.len() as u32) < max
    }

    async fn record(&self, ip: IpAddr, kind: EventKind) {
        let mut windows = self.windows.lock().await;
        windows.entry((ip, kind)).or_default().push_back(Instant::now());
    }

    async fn cleanup(&self, max_age: Duration) {
        let mut windows = self.windows.lock().await;
        let cutoff = Instant::now() - max_age;
        for entry in windows.values_mut() {
            while matches!(entry.front(), Some(t) if *t < cutoff) {
                entry.pop_front();
            }
        }
        windows.retain(|_, v| !v.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_the_configured_max() {
        let limiter = InMemoryRateLimiter::new();
        let ip: IpAddr = "192.0.2.1".parse().unwrap();
        let (max, _) = EventKind::Ping.default_limit();
        for _ in 0..max {
            assert!(limiter.check(ip, EventKind::Ping).await);
            limiter.record(ip, EventKind::Ping).await;
        }
        assert!(!limiter.check(ip, EventKind::Ping).await);
    }

    #[tokio::test]
    async fn window_expiry_allows_again() {
        let limiter = InMemoryRateLimiter::new();
        let ip: IpAddr = "192.0.2.2".parse().unwrap();
        // Ping's window is 1 second; simulate an elapsed window by
        // recording into the past via cleanup with max_age 0.
        for _ in 0..2 {
            limiter.record(ip, EventKind::Ping).await;
        }
        assert!(!limiter.check(ip, EventKind::Ping).await);
        limiter.cleanup(Duration::from_secs(0)).await;
        assert!(limiter.check(ip, EventKind::Ping).await);
    }

    #[tokio::test]
    async fn different_ips_have_independent_windows() {
        let limiter = InMemoryRateLimiter::new();
        let a: IpAddr = "192.0.2.3".parse().unwrap();
        let b: IpAddr = "192.0.2.4".parse().unwrap();
        let (max, _) = EventKind::Control.default_limit();
        for _ in 0..max {
            limiter.record(a, EventKind::Control).await;
        }
        assert!(!limiter.check(a, EventKind::Control).await);
        assert!(limiter.check(b, EventKind::Control).await);
    }
}
