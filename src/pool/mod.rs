//! Keyed connection pool.
//!
//! The pool is the sole owner of connection lifetime: it creates
//! connections lazily per (connection identity, target database) key,
//! hands out shared handles for reuse across polling cycles, and evicts
//! entries when the transport reports a terminal condition. Nothing else
//! may tear down a handle it did not create.
//!
//! Concurrent `acquire` calls for one key serialize on a per-key lock, so
//! a burst of requests while the first connection is still establishing
//! coalesces into a single connect attempt.

mod connector;

pub use connector::{Connector, Established, PgConnector};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::credentials::CredentialSource;

/// Database used when an identity does not name one.
pub const DEFAULT_DATABASE: &str = "postgres";

/// Default bound on one connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// Identity and key
// ---------------------------------------------------------------------------

/// Where and as whom to connect. Immutable per pool entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionIdentity {
    /// Stable identifier of the connection profile; also the credential
    /// lookup key.
    pub connection_id: String,
    pub host: String,
    pub port: u16,
    /// When absent, no credential lookup is performed.
    pub username: Option<String>,
    /// Target database; [`DEFAULT_DATABASE`] when absent.
    pub database: Option<String>,
}

impl ConnectionIdentity {
    pub fn database_name(&self) -> &str {
        self.database.as_deref().unwrap_or(DEFAULT_DATABASE)
    }

    /// The key this identity is cached under.
    pub fn pool_key(&self) -> PoolKey {
        PoolKey {
            connection_id: self.connection_id.clone(),
            database: self.database_name().to_string(),
        }
    }
}

/// Structured cache key: connection identifier plus target database.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolKey {
    pub connection_id: String,
    pub database: String,
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.connection_id, self.database)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure to acquire a pooled connection. Not retried by the pool.
#[derive(Debug)]
pub enum PoolError {
    /// Transport-level connect or authentication failure.
    Connect(String),
    /// The connect attempt exceeded the configured bound.
    Timeout(Duration),
}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolError::Connect(msg) => write!(f, "connect failed: {}", msg),
            PoolError::Timeout(d) => {
                write!(f, "connect timed out after {}s", d.as_secs())
            }
        }
    }
}

impl std::error::Error for PoolError {}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Per-key slot. Holding the state lock while connecting is what
/// serializes creation for one key; an empty `live` field is equivalent
/// to the key being absent from the pool.
struct KeySlot<H> {
    state: Mutex<SlotState<H>>,
}

struct SlotState<H> {
    live: Option<H>,
    /// Bumped on every store and explicit clear. An eviction watcher only
    /// clears the slot when its generation still matches, so eviction
    /// racing a fresh acquire cannot tear down the replacement.
    generation: u64,
}

impl<H> Default for KeySlot<H> {
    fn default() -> Self {
        Self {
            state: Mutex::new(SlotState {
                live: None,
                generation: 0,
            }),
        }
    }
}

struct PoolInner<C: Connector> {
    connector: C,
    credentials: Arc<dyn CredentialSource>,
    connect_timeout: Duration,
    slots: Mutex<HashMap<PoolKey, Arc<KeySlot<C::Handle>>>>,
}

/// Keyed cache of transport handles. Cheap to clone; all clones share
/// the same entries (the pool is constructed once and injected into every
/// consumer).
pub struct ConnectionPool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(connector: C, credentials: Arc<dyn CredentialSource>) -> Self {
        Self::with_timeout(connector, credentials, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Like [`ConnectionPool::new`] with an explicit connect bound.
    pub fn with_timeout(
        connector: C,
        credentials: Arc<dyn CredentialSource>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector,
                credentials,
                connect_timeout,
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the live handle for the identity's key, establishing a new
    /// connection when none exists.
    ///
    /// A credential is resolved only when the identity carries a
    /// username. A failed or timed-out attempt leaves no entry behind;
    /// the pool never retries on its own.
    pub async fn acquire(&self, identity: &ConnectionIdentity) -> Result<C::Handle, PoolError> {
        let key = identity.pool_key();
        let slot = self.slot(&key).await;

        // Per-key creation lock: concurrent acquires for this key queue
        // here and reuse whatever the first one established.
        let mut state = slot.state.lock().await;
        if let Some(handle) = &state.live {
            return Ok(handle.clone());
        }

        let secret = match &identity.username {
            Some(_) => self.inner.credentials.secret(&identity.connection_id),
            None => None,
        };

        let attempt = self.inner.connector.connect(identity, secret.as_deref());
        let established = match tokio::time::timeout(self.inner.connect_timeout, attempt).await {
            Ok(Ok(established)) => established,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(PoolError::Timeout(self.inner.connect_timeout)),
        };

        let Established { handle, closed } = established;
        state.generation += 1;
        let generation = state.generation;
        state.live = Some(handle.clone());
        debug!(key = %key, "pooled connection stored");

        // Eviction hook: when the transport reports end or error, clear
        // the entry so the next acquire recreates it.
        let watched = Arc::downgrade(&slot);
        tokio::spawn(async move {
            let reason = match closed.await {
                Ok(reason) => reason,
                Err(_) => "close signal dropped".to_string(),
            };
            let Some(slot) = watched.upgrade() else { return };
            let mut state = slot.state.lock().await;
            if state.generation == generation && state.live.take().is_some() {
                warn!(key = %key, reason = %reason, "pooled connection evicted");
            }
        });

        Ok(handle)
    }

    /// Explicitly closes one entry. Closing an absent key is a no-op.
    pub async fn release(&self, identity: &ConnectionIdentity) {
        self.clear_slot(&identity.pool_key()).await;
    }

    /// Closes every entry belonging to the given connection identifier,
    /// across all target databases.
    pub async fn release_all_matching(&self, connection_id: &str) {
        for key in self.keys_matching(Some(connection_id)).await {
            self.clear_slot(&key).await;
        }
    }

    /// Closes every pooled entry. Used at shutdown.
    pub async fn release_all(&self) {
        for key in self.keys_matching(None).await {
            self.clear_slot(&key).await;
        }
    }

    /// Keys that currently hold a live connection, sorted.
    pub async fn live_keys(&self) -> Vec<PoolKey> {
        let slots: Vec<(PoolKey, Arc<KeySlot<C::Handle>>)> = {
            let slots = self.inner.slots.lock().await;
            slots.iter().map(|(k, s)| (k.clone(), s.clone())).collect()
        };

        let mut keys = Vec::new();
        for (key, slot) in slots {
            if slot.state.lock().await.live.is_some() {
                keys.push(key);
            }
        }
        keys.sort();
        keys
    }

    async fn slot(&self, key: &PoolKey) -> Arc<KeySlot<C::Handle>> {
        let mut slots = self.inner.slots.lock().await;
        slots.entry(key.clone()).or_default().clone()
    }

    async fn keys_matching(&self, connection_id: Option<&str>) -> Vec<PoolKey> {
        let slots = self.inner.slots.lock().await;
        slots
            .keys()
            .filter(|k| connection_id.is_none_or(|id| k.connection_id == id))
            .cloned()
            .collect()
    }

    /// Dropping the handle here is the close: once the last clone held by
    /// an in-flight query is gone, the transport shuts down and the
    /// watcher fires.
    async fn clear_slot(&self, key: &PoolKey) {
        let slot = { self.inner.slots.lock().await.get(key).cloned() };
        let Some(slot) = slot else { return };
        let mut state = slot.state.lock().await;
        if state.live.take().is_some() {
            state.generation += 1;
            debug!(key = %key, "pooled connection released");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentials;

    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::oneshot;

    // -- test doubles --

    struct MockInner {
        attempts: AtomicU32,
        /// Close triggers for every established connection, oldest first.
        closers: std::sync::Mutex<Vec<oneshot::Sender<String>>>,
        connect_delay: Duration,
        hang: bool,
    }

    /// Connector handing out numbered handles.
    #[derive(Clone)]
    struct MockConnector {
        inner: Arc<MockInner>,
    }

    impl MockConnector {
        fn new(connect_delay: Duration) -> Self {
            Self {
                inner: Arc::new(MockInner {
                    attempts: AtomicU32::new(0),
                    closers: std::sync::Mutex::new(Vec::new()),
                    connect_delay,
                    hang: false,
                }),
            }
        }

        fn hanging() -> Self {
            Self {
                inner: Arc::new(MockInner {
                    attempts: AtomicU32::new(0),
                    closers: std::sync::Mutex::new(Vec::new()),
                    connect_delay: Duration::ZERO,
                    hang: true,
                }),
            }
        }

        fn attempts(&self) -> u32 {
            self.inner.attempts.load(Ordering::SeqCst)
        }

        /// Fires the close signal of the oldest still-watched connection.
        fn close_oldest(&self, reason: &str) {
            let tx = {
                let mut closers = self.inner.closers.lock().unwrap();
                closers.remove(0)
            };
            let _ = tx.send(reason.to_string());
        }
    }

    impl Connector for MockConnector {
        type Handle = u32;

        async fn connect(
            &self,
            _identity: &ConnectionIdentity,
            _secret: Option<&str>,
        ) -> Result<Established<u32>, PoolError> {
            if self.inner.hang {
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(self.inner.connect_delay).await;
            let n = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let (tx, rx) = oneshot::channel();
            self.inner.closers.lock().unwrap().push(tx);
            Ok(Established {
                handle: n,
                closed: rx,
            })
        }
    }

    /// Credential source counting lookups.
    struct CountingCredentials {
        calls: AtomicU32,
    }

    impl CredentialSource for CountingCredentials {
        fn secret(&self, _connection_id: &str) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some("s3cret".to_string())
        }
    }

    // -- helpers --

    fn identity(id: &str, db: &str) -> ConnectionIdentity {
        ConnectionIdentity {
            connection_id: id.to_string(),
            host: "localhost".to_string(),
            port: 5432,
            username: Some("app".to_string()),
            database: Some(db.to_string()),
        }
    }

    fn pool(connector: MockConnector) -> ConnectionPool<MockConnector> {
        ConnectionPool::new(connector, Arc::new(MemoryCredentials::new()))
    }

    // -- tests --

    #[tokio::test(start_paused = true)]
    async fn concurrent_acquires_coalesce_into_one_connect() {
        let mock = MockConnector::new(Duration::from_millis(50));
        let pool = pool(mock.clone());
        let ident = identity("conn1", "app");

        let acquires = (0..8).map(|_| {
            let pool = pool.clone();
            let ident = ident.clone();
            async move { pool.acquire(&ident).await.unwrap() }
        });
        let handles = futures_util::future::join_all(acquires).await;

        assert_eq!(mock.attempts(), 1);
        assert!(handles.iter().all(|&h| h == 1));
    }

    #[tokio::test]
    async fn acquire_reuses_live_entry_across_cycles() {
        let mock = MockConnector::new(Duration::ZERO);
        let pool = pool(mock.clone());
        let ident = identity("conn1", "app");

        let first = pool.acquire(&ident).await.unwrap();
        let second = pool.acquire(&ident).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(mock.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_recreates_entry_on_next_acquire() {
        let mock = MockConnector::new(Duration::ZERO);
        let pool = pool(mock.clone());
        let ident = identity("conn1", "app");

        pool.acquire(&ident).await.unwrap();
        mock.close_oldest("connection reset by peer");
        // Let the eviction watcher run.
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(pool.live_keys().await.is_empty());
        let handle = pool.acquire(&ident).await.unwrap();
        assert_eq!(handle, 2);
        assert_eq!(mock.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_eviction_does_not_tear_down_replacement() {
        let mock = MockConnector::new(Duration::ZERO);
        let pool = pool(mock.clone());
        let ident = identity("conn1", "app");

        pool.acquire(&ident).await.unwrap();
        pool.release(&ident).await;
        let replacement = pool.acquire(&ident).await.unwrap();
        assert_eq!(replacement, 2);

        // The first connection's close signal arrives late; its watcher
        // must not evict the replacement.
        mock.close_oldest("late close");
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(pool.live_keys().await, vec![ident.pool_key()]);
        assert_eq!(pool.acquire(&ident).await.unwrap(), 2);
        assert_eq!(mock.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_connect_leaves_no_entry() {
        let mock = MockConnector::hanging();
        let pool = ConnectionPool::with_timeout(
            mock.clone(),
            Arc::new(MemoryCredentials::new()),
            Duration::from_millis(100),
        );
        let ident = identity("conn1", "app");

        let err = pool.acquire(&ident).await.unwrap_err();
        assert!(matches!(err, PoolError::Timeout(_)));
        assert!(pool.live_keys().await.is_empty());
    }

    #[tokio::test]
    async fn release_of_absent_key_is_noop() {
        let mock = MockConnector::new(Duration::ZERO);
        let pool = pool(mock.clone());
        let ident = identity("conn1", "app");

        pool.release(&ident).await;

        pool.acquire(&ident).await.unwrap();
        pool.release(&ident).await;
        pool.release(&ident).await;
        assert!(pool.live_keys().await.is_empty());
    }

    #[tokio::test]
    async fn release_all_matching_scopes_by_connection_id() {
        let mock = MockConnector::new(Duration::ZERO);
        let pool = pool(mock.clone());

        pool.acquire(&identity("conn1", "app")).await.unwrap();
        pool.acquire(&identity("conn1", "admin")).await.unwrap();
        pool.acquire(&identity("conn2", "app")).await.unwrap();

        pool.release_all_matching("conn1").await;

        assert_eq!(pool.live_keys().await, vec![identity("conn2", "app").pool_key()]);
    }

    #[tokio::test]
    async fn release_all_empties_pool() {
        let mock = MockConnector::new(Duration::ZERO);
        let pool = pool(mock.clone());

        pool.acquire(&identity("conn1", "app")).await.unwrap();
        pool.acquire(&identity("conn2", "app")).await.unwrap();

        pool.release_all().await;
        assert!(pool.live_keys().await.is_empty());
    }

    #[tokio::test]
    async fn credential_lookup_requires_username() {
        let creds = Arc::new(CountingCredentials {
            calls: AtomicU32::new(0),
        });
        let mock = MockConnector::new(Duration::ZERO);
        let pool = ConnectionPool::new(mock.clone(), creds.clone());

        let mut anonymous = identity("conn1", "app");
        anonymous.username = None;
        pool.acquire(&anonymous).await.unwrap();
        assert_eq!(creds.calls.load(Ordering::SeqCst), 0);

        pool.acquire(&identity("conn2", "app")).await.unwrap();
        assert_eq!(creds.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pool_key_uses_default_database() {
        let mut ident = identity("conn1", "app");
        ident.database = None;
        let key = ident.pool_key();
        assert_eq!(key.database, DEFAULT_DATABASE);
        assert_eq!(key.connection_id, "conn1");
    }
}
