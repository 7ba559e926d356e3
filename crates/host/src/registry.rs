use std::collections::HashMap;
use std::sync::Arc;

use acip_protocol::AcipError;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::client::{ClientRecord, ShortIdPool};

/// Holds every client currently known to the host. Writers take the lock
/// only for membership changes (join/remove); the fan-out loop holds a
/// read lock for the duration of one dispatch pass.
pub struct ClientRegistry {
    by_short_id: RwLock<HashMap<u32, Arc<ClientRecord>>>,
    by_uuid: RwLock<HashMap<Uuid, u32>>,
    short_ids: tokio::sync::Mutex<ShortIdPool>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            by_short_id: RwLock::new(HashMap::new()),
            by_uuid: RwLock::new(HashMap::new()),
            short_ids: tokio::sync::Mutex::new(ShortIdPool::new()),
        }
    }

    pub async fn allocate_short_id(&self) -> Result<u32, AcipError> {
        let mut pool = self.short_ids.lock().await;
        pool.allocate()
            .ok_or_else(|| AcipError::Exhausted("short id pool exhausted".into()))
    }

    pub async fn insert(&self, record: Arc<ClientRecord>) {
        let mut by_uuid = self.by_uuid.write().await;
        let mut by_short_id = self.by_short_id.write().await;
        by_uuid.insert(record.id, record.short_id);
        by_short_id.insert(record.short_id, record);
    }

    pub async fn remove(&self, id: Uuid) -> Option<Arc<ClientRecord>> {
        let mut by_uuid = self.by_uuid.write().await;
        let short_id = by_uuid.remove(&id)?;
        let mut by_short_id = self.by_short_id.write().await;
        let record = by_short_id.remove(&short_id);
        drop(by_short_id);
        drop(by_uuid);
        let mut pool = self.short_ids.lock().await;
        pool.free(short_id);
        record
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<ClientRecord>> {
        let by_uuid = self.by_uuid.read().await;
        let short_id = *by_uuid.get(&id)?;
        drop(by_uuid);
        self.by_short_id.read().await.get(&short_id).cloned()
    }

    /// A snapshot of every currently registered client, for fan-out.
    pub async fn snapshot(&self) -> Vec<Arc<ClientRecord>> {
        self.by_short_id.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.by_short_id.read().await.len()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acip_protocol::rate_limit::InMemoryRateLimiter;
    use acip_transport::TcpTransport;
    use std::net::IpAddr;

    async fn fake_record(id: Uuid, short_id: u32) -> Arc<ClientRecord> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = tokio::net::TcpStream::connect(addr);
        let (accepted, connected) = tokio::join!(listener.accept(), connect);
        let (stream, peer) = accepted.unwrap();
        let _keep_alive = connected.unwrap();
        let transport = Arc::new(TcpTransport::new(stream, peer));
        let rate_limiter = Arc::new(InMemoryRateLimiter::new());
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let record = ClientRecord::new(id, short_id, ip, transport, rate_limiter);
        record
    }

    #[tokio::test]
    async fn insert_and_get_roundtrip() {
        let registry = ClientRegistry::new();
        let id = Uuid::new_v4();
        let record = fake_record(id, 0).await;
        registry.insert(record).await;
        assert!(registry.get(id).await.is_some());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn remove_frees_short_id() {
        let registry = ClientRegistry::new();
        let id = Uuid::new_v4();
        let short_id = registry.allocate_short_id().await.unwrap();
        let record = fake_record(id, short_id).await;
        registry.insert(record).await;
        let removed = registry.remove(id).await;
        assert!(removed.is_some());
        assert_eq!(registry.len().await, 0);

        // The short id must be available for reuse.
        let reused = registry.allocate_short_id().await.unwrap();
        assert_eq!(reused, short_id);
    }
}
