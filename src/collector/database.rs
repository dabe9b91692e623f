//! Database-level metadata and counter collection.

use tokio_postgres::Client;

use crate::models::{ObjectCounts, ServerCounters, StateCount, TableSize};

use super::queries::{
    CONNECTION_STATES_QUERY, DATABASE_META_QUERY, EXTENSION_COUNT_QUERY, OBJECT_COUNTS_QUERY,
    SERVER_COUNTERS_QUERY, build_top_tables_query,
};
use super::{DatabaseMeta, format_pg_error};

/// Owner and size of the target database.
///
/// A missing row (database dropped mid-cycle) yields the defaults rather
/// than an error.
pub(super) async fn database_meta(client: &Client, database: &str) -> Result<DatabaseMeta, String> {
    let row = client
        .query_opt(DATABASE_META_QUERY, &[&database])
        .await
        .map_err(|e| format_pg_error(&e))?;

    Ok(row
        .map(|row| DatabaseMeta {
            owner: row.get("owner"),
            size_bytes: row.get("size_bytes"),
        })
        .unwrap_or_default())
}

/// Per-state connection counts, verbatim.
pub(super) async fn connection_states(
    client: &Client,
    database: &str,
) -> Result<Vec<StateCount>, String> {
    let rows = client
        .query(CONNECTION_STATES_QUERY, &[&database])
        .await
        .map_err(|e| format_pg_error(&e))?;

    Ok(rows
        .iter()
        .map(|row| StateCount {
            state: row.get("state"),
            count: row.get("count"),
        })
        .collect())
}

/// Largest user tables by total relation size.
pub(super) async fn top_tables(client: &Client) -> Result<Vec<TableSize>, String> {
    let rows = client
        .query(build_top_tables_query().as_str(), &[])
        .await
        .map_err(|e| format_pg_error(&e))?;

    Ok(rows
        .iter()
        .map(|row| TableSize {
            schema: row.get("schema"),
            name: row.get("name"),
            size_bytes: row.get("size_bytes"),
        })
        .collect())
}

/// Number of installed extensions.
pub(super) async fn extension_count(client: &Client) -> Result<i64, String> {
    let row = client
        .query_one(EXTENSION_COUNT_QUERY, &[])
        .await
        .map_err(|e| format_pg_error(&e))?;
    Ok(row.get("count"))
}

/// User object counts by kind.
pub(super) async fn object_counts(client: &Client) -> Result<ObjectCounts, String> {
    let row = client
        .query_one(OBJECT_COUNTS_QUERY, &[])
        .await
        .map_err(|e| format_pg_error(&e))?;

    Ok(ObjectCounts {
        schemas: row.get("schemas"),
        tables: row.get("tables"),
        views: row.get("views"),
        functions: row.get("functions"),
        sequences: row.get("sequences"),
    })
}

/// The four cumulative counters from pg_stat_database.
pub(super) async fn server_counters(
    client: &Client,
    database: &str,
) -> Result<ServerCounters, String> {
    let row = client
        .query_opt(SERVER_COUNTERS_QUERY, &[&database])
        .await
        .map_err(|e| format_pg_error(&e))?;

    Ok(row
        .map(|row| ServerCounters {
            commits: row.get("commits"),
            rollbacks: row.get("rollbacks"),
            blocks_read: row.get("blocks_read"),
            blocks_hit: row.get("blocks_hit"),
        })
        .unwrap_or_default())
}
