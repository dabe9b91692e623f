//! Drill-down listings.
//!
//! Requested outside the regular polling cadence: a full, non-summarized
//! listing for one object kind, reusing the same pooled handle as the
//! stats collection.

use tokio_postgres::Client;

use crate::models::{DetailTable, ObjectKind};

use super::queries::build_detail_query;
use super::{CollectError, format_pg_error};

/// Columns shared by every drill-down listing.
const DETAIL_COLUMNS: [&str; 3] = ["schema", "name", "owner"];

/// Fetches the full listing for one object kind.
///
/// Unlike the stats fan-out this is a single query with no default to
/// fall back on; a failure is surfaced to the requester.
pub async fn fetch_details(client: &Client, kind: ObjectKind) -> Result<DetailTable, CollectError> {
    let rows = client
        .query(build_detail_query(kind), &[])
        .await
        .map_err(|e| CollectError::Query(format_pg_error(&e)))?;

    let rows = rows
        .iter()
        .map(|row| {
            DETAIL_COLUMNS
                .iter()
                .map(|col| row.try_get::<_, String>(*col).unwrap_or_default())
                .collect()
        })
        .collect();

    Ok(DetailTable {
        kind,
        columns: DETAIL_COLUMNS.iter().map(|c| c.to_string()).collect(),
        rows,
    })
}
