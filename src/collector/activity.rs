//! Active query collection and backend control commands.

use tokio_postgres::Client;

use crate::fmt::truncate_subseconds;
use crate::models::ActiveQuery;

use super::queries::ACTIVE_QUERIES_QUERY;
use super::{CollectError, format_pg_error};

/// Currently executing backends for the target database.
pub(super) async fn active_queries(
    client: &Client,
    database: &str,
) -> Result<Vec<ActiveQuery>, String> {
    let rows = client
        .query(ACTIVE_QUERIES_QUERY, &[&database])
        .await
        .map_err(|e| format_pg_error(&e))?;

    Ok(rows
        .iter()
        .map(|row| {
            let duration: String = row.get("duration");
            ActiveQuery {
                pid: row.get("pid"),
                username: row.get("usename"),
                state: row.get("state"),
                query_start: row.get("query_start"),
                duration: truncate_subseconds(&duration),
                query: row.get("query"),
            }
        })
        .collect())
}

/// Soft-cancels the current query of a backend.
///
/// Returns the server's acknowledgement: `false` means the pid did not
/// name a live backend. Not retried; pool state is unaffected.
pub async fn cancel_backend(client: &Client, pid: i32) -> Result<bool, CollectError> {
    signal_backend(client, "SELECT pg_cancel_backend($1)", pid).await
}

/// Hard-terminates a backend process.
pub async fn terminate_backend(client: &Client, pid: i32) -> Result<bool, CollectError> {
    signal_backend(client, "SELECT pg_terminate_backend($1)", pid).await
}

async fn signal_backend(client: &Client, sql: &str, pid: i32) -> Result<bool, CollectError> {
    let row = client
        .query_one(sql, &[&pid])
        .await
        .map_err(|e| CollectError::Query(format_pg_error(&e)))?;
    Ok(row.get(0))
}
