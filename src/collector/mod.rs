//! PostgreSQL statistics collection.
//!
//! Collects one dashboard snapshot from the server statistics views:
//! - `pg_database` — owner and on-disk size
//! - `pg_stat_activity` — connection-state histogram and active queries
//! - `pg_stat_user_tables` — largest tables by size
//! - `pg_extension` / `pg_class` / `pg_proc` — extension and object counts
//! - `pg_locks` — blocked/blocking backend pairs
//! - `pg_stat_database` — cumulative counters for rate derivation
//!
//! All eight queries are dispatched together over one pipelined client
//! and settled independently: a failing query logs a warning and leaves
//! its snapshot field at the documented default, never failing the cycle.
//! The cycle fails only when the connection itself is unusable.

mod activity;
mod database;
mod details;
mod locks;
mod queries;

pub use activity::{cancel_backend, terminate_backend};
pub use details::fetch_details;

use chrono::Utc;
use tokio_postgres::Client;
use tracing::warn;

use crate::models::{
    ActiveQuery, BlockingLock, ConnectionCounts, ObjectCounts, ServerCounters, StateCount,
    StatsSnapshot, TableSize, UNKNOWN,
};

/// Error type for statistics collection.
#[derive(Debug)]
pub enum CollectError {
    /// The pooled connection is unusable; fatal to this polling cycle.
    Connection(String),
    /// A non-recoverable query failed (drill-down or control command).
    Query(String),
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::Connection(msg) => write!(f, "connection error: {}", msg),
            CollectError::Query(msg) => write!(f, "query failed: {}", msg),
        }
    }
}

impl std::error::Error for CollectError {}

/// Database owner and size, the only sub-result with its own shape.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct DatabaseMeta {
    pub owner: String,
    pub size_bytes: i64,
}

impl Default for DatabaseMeta {
    fn default() -> Self {
        Self {
            owner: UNKNOWN.to_string(),
            size_bytes: 0,
        }
    }
}

/// Independently settled outcomes of the eight sub-queries.
///
/// Errors are already condensed to one-line messages; assembly only
/// decides between the value and the documented default.
pub(super) struct SnapshotParts {
    pub meta: Result<DatabaseMeta, String>,
    pub connections: Result<Vec<StateCount>, String>,
    pub top_tables: Result<Vec<TableSize>, String>,
    pub extensions: Result<i64, String>,
    pub objects: Result<ObjectCounts, String>,
    pub activity: Result<Vec<ActiveQuery>, String>,
    pub locks: Result<Vec<BlockingLock>, String>,
    pub counters: Result<ServerCounters, String>,
}

/// Collects one statistics snapshot for `database`.
///
/// Returns `CollectError::Connection` only when the client is unusable;
/// individual query failures are absorbed into defaults.
pub async fn fetch_stats(client: &Client, database: &str) -> Result<StatsSnapshot, CollectError> {
    if client.is_closed() {
        return Err(CollectError::Connection("connection is closed".to_string()));
    }

    let captured_at = Utc::now().timestamp();

    // The client pipelines: all eight round-trips are in flight at once,
    // each settling to its own Result.
    let (meta, connections, top_tables, extensions, objects, activity, locks, counters) = tokio::join!(
        database::database_meta(client, database),
        database::connection_states(client, database),
        database::top_tables(client),
        database::extension_count(client),
        database::object_counts(client),
        activity::active_queries(client, database),
        locks::blocking_locks(client),
        database::server_counters(client, database),
    );

    if client.is_closed() {
        return Err(CollectError::Connection(
            "connection lost during collection".to_string(),
        ));
    }

    Ok(assemble_snapshot(
        captured_at,
        database,
        SnapshotParts {
            meta,
            connections,
            top_tables,
            extensions,
            objects,
            activity,
            locks,
            counters,
        },
    ))
}

/// Builds the snapshot from settled sub-query outcomes.
///
/// Pure: substitutes the documented default for every failed field and
/// logs the failure with the query name.
pub(super) fn assemble_snapshot(
    captured_at: i64,
    database: &str,
    parts: SnapshotParts,
) -> StatsSnapshot {
    let meta = settle(parts.meta, "database metadata");
    let breakdown = settle(parts.connections, "connection states");

    StatsSnapshot {
        captured_at,
        database: database.to_string(),
        owner: meta.owner,
        size_bytes: meta.size_bytes,
        connections: reduce_connection_states(breakdown),
        extension_count: settle(parts.extensions, "extension count"),
        objects: settle(parts.objects, "object counts"),
        top_tables: settle(parts.top_tables, "top tables"),
        active_queries: settle(parts.activity, "active queries"),
        blocking_locks: settle(parts.locks, "blocking locks"),
        counters: settle(parts.counters, "server counters"),
    }
}

/// Resolves one field outcome, substituting the default on failure.
fn settle<T: Default>(outcome: Result<T, String>, query: &str) -> T {
    match outcome {
        Ok(value) => value,
        Err(error) => {
            warn!(query, error = %error, "stats query failed; using default");
            T::default()
        }
    }
}

/// Reduces the per-state histogram into headline counts, keeping the
/// verbatim breakdown for display.
pub(super) fn reduce_connection_states(breakdown: Vec<StateCount>) -> ConnectionCounts {
    let mut counts = ConnectionCounts::default();
    for entry in &breakdown {
        counts.total += entry.count;
        if entry.state == "active" {
            counts.active += entry.count;
        } else if entry.state.starts_with("idle") {
            counts.idle += entry.count;
        }
    }
    counts.breakdown = breakdown;
    counts
}

/// Condenses a postgres error into a narrow one-line message.
pub(crate) fn format_pg_error(e: &tokio_postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.severity(), db_error.message())
    } else {
        let msg = e.to_string();
        if msg.contains("Connection refused") {
            "connection refused".to_string()
        } else if msg.contains("password authentication failed") {
            "password authentication failed".to_string()
        } else {
            msg
        }
    }
}
