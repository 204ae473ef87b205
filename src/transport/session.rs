//! TLS session resumption.
//!
//! BoringSSL hands every new session to a callback; the session is kept per
//! server name and offered on the next handshake to the same host.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use boring::ssl::SslSession;
use parking_lot::Mutex;

/// TLS session cache keyed by server name.
#[derive(Clone)]
pub struct SessionCache {
    inner: Arc<Mutex<HashMap<String, CachedSession>>>,
    max_age: Duration,
}

struct CachedSession {
    session: SslSession,
    received_at: Instant,
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("len", &self.len())
            .field("max_age", &self.max_age)
            .finish()
    }
}

impl SessionCache {
    /// Create a new session cache with default max age (24 hours).
    pub fn new() -> Self {
        Self::with_max_age(Duration::from_secs(86400))
    }

    /// Create a session cache with custom max age.
    pub fn with_max_age(max_age: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            max_age,
        }
    }

    /// Store the latest session for a host, replacing any older one.
    pub fn store(&self, host: &str, session: SslSession) {
        tracing::trace!("storing TLS session for {}", host);
        self.inner.lock().insert(
            host.to_string(),
            CachedSession {
                session,
                received_at: Instant::now(),
            },
        );
    }

    /// Session for a host, if one is cached and not expired.
    pub fn get(&self, host: &str) -> Option<SslSession> {
        let mut inner = self.inner.lock();
        match inner.get(host) {
            Some(cached) if cached.received_at.elapsed() < self.max_age => {
                Some(cached.session.clone())
            }
            Some(_) => {
                inner.remove(host);
                None
            }
            None => None,
        }
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}
