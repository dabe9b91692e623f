//! Blocking-lock collection.

use tokio_postgres::Client;

use crate::models::BlockingLock;

use super::queries::BLOCKING_LOCKS_QUERY;
use super::format_pg_error;

/// Blocked/blocking backend pairs.
///
/// No caching: lock state changes rapidly. Returns an empty vector when
/// nothing is blocked.
pub(super) async fn blocking_locks(client: &Client) -> Result<Vec<BlockingLock>, String> {
    let rows = client
        .query(BLOCKING_LOCKS_QUERY, &[])
        .await
        .map_err(|e| format_pg_error(&e))?;

    Ok(rows.iter().filter_map(parse_lock_row).collect())
}

/// Safely parses one row of the blocking-locks query.
/// Returns None if the pid columns fail to deserialize.
fn parse_lock_row(row: &tokio_postgres::Row) -> Option<BlockingLock> {
    let blocked_pid: i32 = row.try_get("blocked_pid").ok()?;
    let blocking_pid: i32 = row.try_get("blocking_pid").ok()?;

    Some(BlockingLock {
        blocked_pid,
        blocked_user: row.try_get("blocked_user").unwrap_or_default(),
        blocking_pid,
        blocking_user: row.try_get("blocking_user").unwrap_or_default(),
        lock_mode: row.try_get("lock_mode").unwrap_or_default(),
        locked_object: row.try_get("locked_object").unwrap_or_default(),
        blocked_query: row.try_get("blocked_query").unwrap_or_default(),
        blocking_query: row.try_get("blocking_query").unwrap_or_default(),
    })
}
