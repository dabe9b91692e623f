//! Transport connector abstraction.
//!
//! The pool is generic over how a physical connection is established so
//! tests can substitute scripted connectors. Production uses
//! [`PgConnector`], which drives tokio-postgres without TLS.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_postgres::{Client, NoTls};
use tracing::debug;

use super::{ConnectionIdentity, PoolError};
use crate::collector::format_pg_error;

/// Outcome of a successful connect.
pub struct Established<H> {
    /// Shared handle for issuing queries.
    pub handle: H,
    /// Fires once when the transport reaches a terminal state (clean end
    /// or protocol error), carrying a short reason. The pool registers an
    /// eviction watcher on it.
    pub closed: oneshot::Receiver<String>,
}

/// Establishes physical connections for the pool.
pub trait Connector: Send + Sync + 'static {
    type Handle: Clone + Send + Sync + 'static;

    /// Connects on behalf of `identity`. The secret is already resolved
    /// by the pool (present only when the identity has a username).
    ///
    /// The overall attempt is bounded by the pool's connect timeout; a
    /// cancelled attempt must not leak resources.
    fn connect(
        &self,
        identity: &ConnectionIdentity,
        secret: Option<&str>,
    ) -> impl Future<Output = Result<Established<Self::Handle>, PoolError>> + Send;
}

/// tokio-postgres connector.
///
/// Spawns the connection driver task and reports its exit through the
/// [`Established::closed`] signal, so the pool evicts the entry as soon
/// as the transport dies.
#[derive(Debug, Default, Clone, Copy)]
pub struct PgConnector;

impl Connector for PgConnector {
    type Handle = Arc<Client>;

    async fn connect(
        &self,
        identity: &ConnectionIdentity,
        secret: Option<&str>,
    ) -> Result<Established<Arc<Client>>, PoolError> {
        let mut config = tokio_postgres::Config::new();
        config.host(&identity.host);
        config.port(identity.port);
        config.dbname(identity.database_name());
        config.application_name("pgpulse");
        if let Some(user) = &identity.username {
            config.user(user);
        }
        if let Some(secret) = secret {
            config.password(secret);
        }

        let (client, connection) = config
            .connect(NoTls)
            .await
            .map_err(|e| PoolError::Connect(format_pg_error(&e)))?;

        debug!(host = %identity.host, port = identity.port,
            database = %identity.database_name(), "connection established");

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let reason = match connection.await {
                Ok(()) => "connection ended".to_string(),
                Err(e) => format_pg_error(&e),
            };
            let _ = tx.send(reason);
        });

        Ok(Established {
            handle: Arc::new(client),
            closed: rx,
        })
    }
}
