//! Per-address connection cache.
//!
//! Each remote endpoint gets one negotiated sub-transport. Creation is
//! single-flight per key: concurrent callers for the same key wait on one
//! initialization, callers for other keys never wait on it. A failed or
//! cancelled initialization leaves no entry behind.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::OnceCell;

use crate::error::Result;

/// Normalized `host:port` key. IPv6 hosts are bracketed.
///
/// Plain-HTTP endpoints never share an entry with TLS endpoints on the
/// same address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    addr: String,
    tls: bool,
}

impl CacheKey {
    /// Key for a TLS endpoint.
    pub fn new(host: &str, port: u16) -> Self {
        Self::build(host, port, true)
    }

    /// Key for a plain-HTTP endpoint.
    pub fn plain(host: &str, port: u16) -> Self {
        Self::build(host, port, false)
    }

    fn build(host: &str, port: u16, tls: bool) -> Self {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let addr = if host.contains(':') {
            format!("[{}]:{}", host.to_ascii_lowercase(), port)
        } else {
            format!("{}:{}", host.to_ascii_lowercase(), port)
        };
        Self { addr, tls }
    }

    /// Parse an address, inserting port 443 when none is given.
    pub fn parse(addr: &str) -> Self {
        if let Some(rest) = addr.strip_prefix('[') {
            if let Some((host, tail)) = rest.split_once(']') {
                let port = tail
                    .strip_prefix(':')
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(443);
                return Self::new(host, port);
            }
        }
        match addr.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => match port.parse() {
                Ok(port) => Self::new(host, port),
                Err(_) => Self::new(addr, 443),
            },
            _ => Self::new(addr, 443),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.addr
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tls {
            f.write_str(&self.addr)
        } else {
            write!(f, "http://{}", self.addr)
        }
    }
}

/// A cached value that can release its idle connections.
pub trait CloseIdle {
    fn close_idle(&self);
}

type Slot<T> = Arc<OnceCell<Arc<T>>>;

/// Concurrent map from address to negotiated sub-transport.
pub struct ConnectionCache<T> {
    entries: RwLock<HashMap<CacheKey, Slot<T>>>,
}

impl<T> Default for ConnectionCache<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> fmt::Debug for ConnectionCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionCache")
            .field("len", &self.len())
            .finish()
    }
}

impl<T> ConnectionCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value for `key`, if negotiation already completed.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<T>> {
        self.entries.read().get(key).and_then(|slot| slot.get().cloned())
    }

    /// Return the cached value or run `init` exactly once for this key.
    ///
    /// The boolean is true for the caller whose `init` produced the value.
    pub async fn get_or_try_init<F, Fut>(&self, key: &CacheKey, init: F) -> Result<(Arc<T>, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.get(key) {
            return Ok((value, false));
        }

        let slot = {
            let mut entries = self.entries.write();
            entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let mut created = false;
        let result = slot
            .get_or_try_init(|| {
                created = true;
                async move { init().await.map(Arc::new) }
            })
            .await;

        match result {
            Ok(value) => Ok((value.clone(), created)),
            Err(e) => {
                self.discard_if_empty(key, &slot);
                Err(e)
            }
        }
    }

    fn discard_if_empty(&self, key: &CacheKey, slot: &Slot<T>) {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(key) {
            if Arc::ptr_eq(existing, slot) && existing.get().is_none() {
                entries.remove(key);
            }
        }
    }

    /// Drop the entry for `key` if it still holds `value`.
    pub fn invalidate(&self, key: &CacheKey, value: &Arc<T>) -> bool {
        let mut entries = self.entries.write();
        let matches = entries
            .get(key)
            .and_then(|slot| slot.get())
            .is_some_and(|current| Arc::ptr_eq(current, value));
        if matches {
            entries.remove(key);
        }
        matches
    }

    /// Number of negotiated entries.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.get(key).is_some()
    }

    /// Keys of negotiated entries, sorted.
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self
            .entries
            .read()
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

impl<T: CloseIdle> ConnectionCache<T> {
    /// Close idle connections of every cached entry, then clear the map.
    ///
    /// Callers holding an entry keep using it; entries negotiated after
    /// this call are untouched.
    pub fn close_idle(&self) -> usize {
        let drained: Vec<Slot<T>> = {
            let mut entries = self.entries.write();
            entries.drain().map(|(_, slot)| slot).collect()
        };
        let mut closed = 0;
        for slot in drained {
            if let Some(value) = slot.get() {
                value.close_idle();
                closed += 1;
            }
        }
        closed
    }
}

/// Handshaked connections waiting to be picked up by their sub-transport.
pub struct PendingConnections<S> {
    slots: Mutex<HashMap<CacheKey, S>>,
}

impl<S> Default for PendingConnections<S> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<S> PendingConnections<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a connection. A connection already parked for the key is dropped.
    pub fn park(&self, key: CacheKey, conn: S) {
        self.slots.lock().insert(key, conn);
    }

    /// Take the parked connection for `key`; consumed exactly once.
    pub fn take(&self, key: &CacheKey) -> Option<S> {
        self.slots.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Entry {
        closed: Arc<AtomicUsize>,
    }

    impl CloseIdle for Entry {
        fn close_idle(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn entry() -> Entry {
        Entry {
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[test]
    fn test_cache_key_normalization() {
        assert_eq!(CacheKey::parse("Example.com").as_str(), "example.com:443");
        assert_eq!(CacheKey::parse("example.com:8443").as_str(), "example.com:8443");
        assert_eq!(CacheKey::parse("[::1]").as_str(), "[::1]:443");
        assert_eq!(CacheKey::parse("[::1]:80").as_str(), "[::1]:80");
        assert_eq!(CacheKey::new("::1", 80), CacheKey::parse("[::1]:80"));
    }

    #[test]
    fn test_plain_and_tls_keys_differ() {
        let tls = CacheKey::new("h.test", 443);
        let plain = CacheKey::plain("h.test", 443);
        assert_eq!(tls.as_str(), plain.as_str());
        assert_ne!(tls, plain);
        assert_eq!(plain.to_string(), "http://h.test:443");
        assert_eq!(tls.to_string(), "h.test:443");
    }

    #[tokio::test]
    async fn test_single_flight_per_key() {
        let cache = Arc::new(ConnectionCache::<Entry>::new());
        let inits = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::new("a.test", 443);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let inits = inits.clone();
            let key = key.clone();
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_try_init(&key, || async move {
                        inits.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(entry())
                    })
                    .await
                    .map(|(_, created)| created)
                    .unwrap()
            }));
        }
        let mut created = 0;
        for task in tasks {
            if task.await.unwrap() {
                created += 1;
            }
        }
        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert_eq!(created, 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_init_leaves_no_entry() {
        let cache = ConnectionCache::<Entry>::new();
        let key = CacheKey::new("a.test", 443);
        let result = cache
            .get_or_try_init(&key, || async { Err(Error::tls("handshake failed")) })
            .await;
        assert!(result.is_err());
        assert!(cache.is_empty());
        assert!(cache.entries.read().is_empty());

        let (_, created) = cache
            .get_or_try_init(&key, || async { Ok(entry()) })
            .await
            .unwrap();
        assert!(created);
    }

    #[tokio::test]
    async fn test_cancelled_init_leaves_no_entry() {
        let cache = ConnectionCache::<Entry>::new();
        let key = CacheKey::new("a.test", 443);
        let slow = cache.get_or_try_init(&key, || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(entry())
        });
        assert!(tokio::time::timeout(Duration::from_millis(10), slow)
            .await
            .is_err());
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_close_idle_closes_then_clears() {
        let cache = ConnectionCache::<Entry>::new();
        let closed = Arc::new(AtomicUsize::new(0));
        for host in ["a.test", "b.test"] {
            let closed = closed.clone();
            cache
                .get_or_try_init(&CacheKey::new(host, 443), || async move {
                    Ok(Entry { closed })
                })
                .await
                .unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.close_idle(), 2);
        assert_eq!(closed.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_only_matching_value() {
        let cache = ConnectionCache::<Entry>::new();
        let key = CacheKey::new("a.test", 443);
        let (first, _) = cache
            .get_or_try_init(&key, || async { Ok(entry()) })
            .await
            .unwrap();
        let stranger = Arc::new(entry());
        assert!(!cache.invalidate(&key, &stranger));
        assert!(cache.invalidate(&key, &first));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_pending_consumed_once() {
        let pending = PendingConnections::new();
        let key = CacheKey::new("a.test", 443);
        pending.park(key.clone(), 7u32);
        assert_eq!(pending.take(&key), Some(7));
        assert_eq!(pending.take(&key), None);
        assert!(pending.is_empty());
    }
}
