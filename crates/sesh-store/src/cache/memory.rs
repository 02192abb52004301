use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sesh_core::Result;

use super::CacheClient;
use crate::config::ResolvedNode;

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Minimum cache-clock time between two sweeps of expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

struct Shared {
    entries: DashMap<String, Entry>,
    /// Milliseconds added to the wall clock, see [`MemoryCacheClient::advance`].
    clock_offset_ms: AtomicU64,
    origin: Instant,
    /// Cache-clock milliseconds since `origin` at the last sweep.
    last_sweep_ms: AtomicU64,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            clock_offset_ms: AtomicU64::new(0),
            origin: Instant::now(),
            last_sweep_ms: AtomicU64::new(0),
        }
    }
}

/// In-process cache with per-entry TTL.
///
/// Clones share the same entries, so several handlers can be pointed at one
/// "physical" store. Registered servers are tracked per clone and only used
/// for inspection; every key lives in the shared map.
#[derive(Clone, Default)]
pub struct MemoryCacheClient {
    shared: Arc<Shared>,
    servers: Vec<ResolvedNode>,
}

impl MemoryCacheClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Servers registered on this clone.
    pub fn servers(&self) -> &[ResolvedNode] {
        &self.servers
    }

    /// Move this cache's clock forward. Entries whose TTL falls inside the
    /// skipped interval expire.
    pub fn advance(&self, by: Duration) {
        let ms = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.shared.clock_offset_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = self.now();
        self.shared
            .entries
            .iter()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn now(&self) -> Instant {
        let offset = self.shared.clock_offset_ms.load(Ordering::SeqCst);
        Instant::now() + Duration::from_millis(offset)
    }

    /// Drop expired entries, at most once per [`SWEEP_INTERVAL`] of cache time.
    fn sweep_expired(&self, now: Instant) {
        let at = u64::try_from(now.duration_since(self.shared.origin).as_millis())
            .unwrap_or(u64::MAX);
        let last = self.shared.last_sweep_ms.load(Ordering::SeqCst);
        if at.saturating_sub(last) < SWEEP_INTERVAL.as_millis() as u64 {
            return;
        }
        if self
            .shared
            .last_sweep_ms
            .compare_exchange(last, at, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.shared.entries.retain(|_, e| !e.is_expired(now));
        }
    }
}

#[async_trait]
impl CacheClient for MemoryCacheClient {
    async fn add_server(&mut self, node: &ResolvedNode) -> Result<()> {
        self.servers.push(node.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.now();
        let expired = match self.shared.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.shared.entries.remove_if(key, |_, e| e.is_expired(now));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let now = self.now();
        self.sweep_expired(now);
        // A TTL past the representable clock never expires.
        let expires_at = ttl.and_then(|ttl| now.checked_add(ttl));
        self.shared.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = self.now();
        Ok(self
            .shared
            .entries
            .remove(key)
            .is_some_and(|(_, e)| !e.is_expired(now)))
    }

    async fn close(&mut self) -> Result<()> {
        self.servers.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let cache = MemoryCacheClient::new();
        cache.set("k", b"v", None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.delete("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = MemoryCacheClient::new();
        cache.set("short", b"1", Some(Duration::from_secs(1))).await.unwrap();
        cache.set("long", b"2", Some(Duration::from_secs(60))).await.unwrap();
        cache.set("forever", b"3", None).await.unwrap();
        assert_eq!(cache.len(), 3);

        cache.advance(Duration::from_secs(2));
        assert_eq!(cache.get("short").await.unwrap(), None);
        assert_eq!(cache.get("long").await.unwrap(), Some(b"2".to_vec()));
        assert_eq!(cache.len(), 2);

        cache.advance(Duration::from_secs(3600));
        assert_eq!(cache.get("forever").await.unwrap(), Some(b"3".to_vec()));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn writes_sweep_expired_entries() {
        let cache = MemoryCacheClient::new();
        for i in 0..1000 {
            cache
                .set(&format!("k{i}"), b"v", Some(Duration::from_secs(60)))
                .await
                .unwrap();
        }
        assert_eq!(cache.shared.entries.len(), 1000);

        cache.advance(Duration::from_secs(120));
        cache.set("fresh", b"v", None).await.unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.shared.entries.len(), 1);
    }

    #[tokio::test]
    async fn huge_ttl_never_expires() {
        let cache = MemoryCacheClient::new();
        cache
            .set("k", b"v", Some(Duration::from_secs(u64::MAX)))
            .await
            .unwrap();
        cache.advance(Duration::from_secs(365 * 24 * 3600));
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn clones_share_entries_not_servers() {
        let mut a = MemoryCacheClient::new();
        let b = a.clone();
        a.add_server(&crate::config::ServerNode::default().resolve().unwrap())
            .await
            .unwrap();

        a.set("k", b"v", None).await.unwrap();
        assert_eq!(b.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(a.servers().len(), 1);
        assert!(b.servers().is_empty());
    }
}
