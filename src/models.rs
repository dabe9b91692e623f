//! Dashboard data model.
//!
//! These structures hold one point-in-time capture of server statistics,
//! assembled by the collector and consumed by the rate engine and the
//! presenter. All of them are immutable once produced; a new polling
//! cycle always builds a fresh snapshot.

use serde::{Deserialize, Serialize};

/// Default substituted for string fields whose source query failed.
pub const UNKNOWN: &str = "Unknown";

/// One complete, point-in-time capture of server statistics.
///
/// Every field is best-effort: a failed sub-query leaves its field at the
/// documented default (empty list, zero count, [`UNKNOWN`] string) and
/// never invalidates the rest of the snapshot.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct StatsSnapshot {
    /// Capture time (seconds since Unix epoch).
    pub captured_at: i64,
    /// Database this snapshot describes.
    pub database: String,
    /// Database owner role name.
    /// Source: `pg_get_userbyid(pg_database.datdba)`
    pub owner: String,
    /// On-disk size of the database in bytes.
    /// Source: `pg_database_size(oid)`
    pub size_bytes: i64,
    /// Connection counts by backend state.
    pub connections: ConnectionCounts,
    /// Number of installed extensions.
    /// Source: `count(*) FROM pg_extension`
    pub extension_count: i64,
    /// Object counts by kind (schemas, tables, views, ...).
    pub objects: ObjectCounts,
    /// Largest user tables by total relation size.
    pub top_tables: Vec<TableSize>,
    /// Currently executing backends, excluding idle ones and ourselves.
    pub active_queries: Vec<ActiveQuery>,
    /// Blocked/blocking backend pairs derived from pg_locks.
    pub blocking_locks: Vec<BlockingLock>,
    /// Cumulative server counters used for rate derivation.
    pub counters: ServerCounters,
}

/// Per-state connection count, kept verbatim for display.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct StateCount {
    /// Backend state as reported by pg_stat_activity (empty for
    /// background workers that report no state).
    pub state: String,
    pub count: i64,
}

/// Connection-state histogram reduced to the numbers the dashboard
/// headlines, plus the raw breakdown.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct ConnectionCounts {
    /// Backends in state `active`.
    pub active: i64,
    /// Backends in any `idle*` state.
    pub idle: i64,
    /// All backends regardless of state.
    pub total: i64,
    /// The verbatim (state, count) rows.
    pub breakdown: Vec<StateCount>,
}

/// Object counts for the summary view.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct ObjectCounts {
    pub schemas: i64,
    pub tables: i64,
    pub views: i64,
    pub functions: i64,
    pub sequences: i64,
}

/// One of the top-N user tables by size.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct TableSize {
    pub schema: String,
    pub name: String,
    /// Source: `pg_total_relation_size(relid)`
    pub size_bytes: i64,
}

/// A currently executing backend.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct ActiveQuery {
    /// Process ID of the backend.
    /// Source: `pg_stat_activity.pid`
    pub pid: i32,
    /// Source: `pg_stat_activity.usename`
    pub username: String,
    /// Source: `pg_stat_activity.state`
    pub state: String,
    /// Query start time (seconds since Unix epoch, 0 if unknown).
    /// Source: `pg_stat_activity.query_start`
    pub query_start: i64,
    /// Elapsed time as text, truncated to whole seconds.
    pub duration: String,
    /// Source: `pg_stat_activity.query`
    /// Note: truncated by the server to track_activity_query_size.
    pub query: String,
}

/// A blocked backend together with the backend blocking it.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct BlockingLock {
    pub blocked_pid: i32,
    pub blocked_user: String,
    pub blocking_pid: i32,
    pub blocking_user: String,
    /// Lock mode the blocked backend is waiting for.
    /// Source: `pg_locks.mode`
    pub lock_mode: String,
    /// Locked relation, rendered through regclass.
    pub locked_object: String,
    pub blocked_query: String,
    pub blocking_query: String,
}

/// The four cumulative counters from pg_stat_database.
///
/// Monotonically increasing since the last stats reset; rates are derived
/// by differencing two captures (see the `rates` module).
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct ServerCounters {
    /// Source: `pg_stat_database.xact_commit`
    pub commits: i64,
    /// Source: `pg_stat_database.xact_rollback`
    pub rollbacks: i64,
    /// Source: `pg_stat_database.blks_read`
    pub blocks_read: i64,
    /// Source: `pg_stat_database.blks_hit`
    pub blocks_hit: i64,
}

/// Object categories available for drill-down listings.
///
/// The set is closed: a kind that is not listed here cannot be requested,
/// and parsing an unknown name fails at the boundary.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Tables,
    Views,
    Functions,
}

impl ObjectKind {
    pub fn all() -> &'static [ObjectKind] {
        &[ObjectKind::Tables, ObjectKind::Views, ObjectKind::Functions]
    }

    /// Returns the display name of the kind.
    pub fn name(&self) -> &'static str {
        match self {
            ObjectKind::Tables => "tables",
            ObjectKind::Views => "views",
            ObjectKind::Functions => "functions",
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ObjectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tables" => Ok(ObjectKind::Tables),
            "views" => Ok(ObjectKind::Views),
            "functions" => Ok(ObjectKind::Functions),
            other => Err(format!("unknown object kind: {}", other)),
        }
    }
}

/// A full (non-summarized) drill-down listing for one object kind.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct DetailTable {
    pub kind: ObjectKind,
    pub columns: Vec<String>,
    /// One stringified row per object, column-aligned with `columns`.
    pub rows: Vec<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn object_kind_roundtrips_known_names() {
        for kind in ObjectKind::all() {
            assert_eq!(ObjectKind::from_str(kind.name()).unwrap(), *kind);
        }
    }

    #[test]
    fn object_kind_rejects_unknown_name() {
        let err = ObjectKind::from_str("sequences").unwrap_err();
        assert!(err.contains("sequences"));
    }
}
