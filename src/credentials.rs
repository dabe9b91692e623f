//! Credential lookup for pooled connections.
//!
//! The pool never stores secrets; it asks a [`CredentialSource`] for the
//! secret belonging to a connection identifier at connect time, and only
//! when the identity actually carries a username.

use std::collections::HashMap;

/// Source of connection secrets, keyed by connection identifier.
///
/// Implementations are expected to be cheap to query; the pool consults
/// the source once per physical connection attempt.
pub trait CredentialSource: Send + Sync {
    /// Returns the secret for a connection identifier, if one is stored.
    fn secret(&self, connection_id: &str) -> Option<String>;
}

/// In-memory credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    secrets: HashMap<String, String>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a secret for a connection identifier, replacing any
    /// previous value.
    pub fn insert(&mut self, connection_id: impl Into<String>, secret: impl Into<String>) {
        self.secrets.insert(connection_id.into(), secret.into());
    }
}

impl CredentialSource for MemoryCredentials {
    fn secret(&self, connection_id: &str) -> Option<String> {
        self.secrets.get(connection_id).cloned()
    }
}

/// Environment-backed credential store.
///
/// Reads `PGPASSWORD` regardless of the connection identifier, matching
/// how a single-server deployment is usually configured.
#[derive(Debug, Default)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn secret(&self, _connection_id: &str) -> Option<String> {
        std::env::var("PGPASSWORD").ok().filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_returns_inserted_secret() {
        let mut store = MemoryCredentials::new();
        store.insert("conn1", "hunter2");

        assert_eq!(store.secret("conn1").as_deref(), Some("hunter2"));
        assert_eq!(store.secret("conn2"), None);
    }
}
