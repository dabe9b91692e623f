//! SQL text for the statistics queries.
//!
//! Every nullable column is wrapped in COALESCE so row mapping never
//! trips over NULLs, and timestamps come back as epoch seconds.

use crate::models::ObjectKind;

/// Number of tables reported in the top-by-size list.
pub(super) const TOP_TABLES_LIMIT: i64 = 5;

/// Owner and on-disk size of one database. Parameter: database name.
pub(super) const DATABASE_META_QUERY: &str = r#"
    SELECT
        COALESCE(pg_get_userbyid(d.datdba)::text, '') AS owner,
        COALESCE(pg_database_size(d.oid), 0)::bigint AS size_bytes
    FROM pg_database d
    WHERE d.datname = $1
"#;

/// Connection-state histogram. Parameter: database name.
pub(super) const CONNECTION_STATES_QUERY: &str = r#"
    SELECT
        COALESCE(state, '') AS state,
        count(*)::bigint AS count
    FROM pg_stat_activity
    WHERE datname = $1
    GROUP BY state
    ORDER BY state
"#;

/// Installed extension count.
pub(super) const EXTENSION_COUNT_QUERY: &str = r#"
    SELECT count(*)::bigint AS count FROM pg_extension
"#;

/// User object counts by kind, system schemas excluded.
pub(super) const OBJECT_COUNTS_QUERY: &str = r#"
    SELECT
        (SELECT count(*) FROM pg_namespace
         WHERE nspname NOT LIKE 'pg\_%' AND nspname <> 'information_schema')::bigint AS schemas,
        (SELECT count(*) FROM pg_class c
         JOIN pg_namespace n ON n.oid = c.relnamespace
         WHERE c.relkind = 'r'
           AND n.nspname NOT LIKE 'pg\_%' AND n.nspname <> 'information_schema')::bigint AS tables,
        (SELECT count(*) FROM pg_class c
         JOIN pg_namespace n ON n.oid = c.relnamespace
         WHERE c.relkind = 'v'
           AND n.nspname NOT LIKE 'pg\_%' AND n.nspname <> 'information_schema')::bigint AS views,
        (SELECT count(*) FROM pg_proc p
         JOIN pg_namespace n ON n.oid = p.pronamespace
         WHERE n.nspname NOT LIKE 'pg\_%' AND n.nspname <> 'information_schema')::bigint AS functions,
        (SELECT count(*) FROM pg_class c
         JOIN pg_namespace n ON n.oid = c.relnamespace
         WHERE c.relkind = 'S'
           AND n.nspname NOT LIKE 'pg\_%' AND n.nspname <> 'information_schema')::bigint AS sequences
"#;

/// Cumulative counters for rate derivation. Parameter: database name.
pub(super) const SERVER_COUNTERS_QUERY: &str = r#"
    SELECT
        COALESCE(xact_commit, 0)::bigint AS commits,
        COALESCE(xact_rollback, 0)::bigint AS rollbacks,
        COALESCE(blks_read, 0)::bigint AS blocks_read,
        COALESCE(blks_hit, 0)::bigint AS blocks_hit
    FROM pg_stat_database
    WHERE datname = $1
"#;

/// Currently executing backends, ourselves and idle sessions excluded.
/// Parameter: database name.
pub(super) const ACTIVE_QUERIES_QUERY: &str = r#"
    SELECT
        a.pid,
        COALESCE(a.usename, '') AS usename,
        COALESCE(a.state, '') AS state,
        COALESCE(EXTRACT(EPOCH FROM a.query_start)::bigint, 0) AS query_start,
        COALESCE((now() - a.query_start)::text, '') AS duration,
        COALESCE(a.query, '') AS query
    FROM pg_stat_activity a
    WHERE a.datname = $1
      AND a.state <> 'idle'
      AND a.pid <> pg_backend_pid()
    ORDER BY a.query_start
"#;

/// Blocked/blocking backend pairs from pg_locks. Server-wide: blocking
/// chains can span databases.
pub(super) const BLOCKING_LOCKS_QUERY: &str = r#"
    SELECT
        blocked.pid AS blocked_pid,
        COALESCE(blocked_act.usename, '') AS blocked_user,
        blocking.pid AS blocking_pid,
        COALESCE(blocking_act.usename, '') AS blocking_user,
        blocked.mode AS lock_mode,
        COALESCE(blocked.relation::regclass::text, '') AS locked_object,
        COALESCE(blocked_act.query, '') AS blocked_query,
        COALESCE(blocking_act.query, '') AS blocking_query
    FROM pg_catalog.pg_locks blocked
    JOIN pg_catalog.pg_stat_activity blocked_act ON blocked_act.pid = blocked.pid
    JOIN pg_catalog.pg_locks blocking
        ON blocking.locktype = blocked.locktype
        AND blocking.database IS NOT DISTINCT FROM blocked.database
        AND blocking.relation IS NOT DISTINCT FROM blocked.relation
        AND blocking.page IS NOT DISTINCT FROM blocked.page
        AND blocking.tuple IS NOT DISTINCT FROM blocked.tuple
        AND blocking.transactionid IS NOT DISTINCT FROM blocked.transactionid
        AND blocking.pid <> blocked.pid
    JOIN pg_catalog.pg_stat_activity blocking_act ON blocking_act.pid = blocking.pid
    WHERE NOT blocked.granted
      AND blocking.granted
"#;

/// Builds the top-tables-by-size query.
pub(super) fn build_top_tables_query() -> String {
    format!(
        r#"
            SELECT
                schemaname::text AS schema,
                relname::text AS name,
                COALESCE(pg_total_relation_size(relid), 0)::bigint AS size_bytes
            FROM pg_stat_user_tables
            ORDER BY pg_total_relation_size(relid) DESC
            LIMIT {TOP_TABLES_LIMIT}
        "#
    )
}

/// Builds the full drill-down listing for one object kind.
///
/// All listings share the (schema, name, owner) column shape.
pub(super) fn build_detail_query(kind: ObjectKind) -> &'static str {
    match kind {
        ObjectKind::Tables => {
            r#"
                SELECT
                    schemaname::text AS schema,
                    tablename::text AS name,
                    COALESCE(tableowner::text, '') AS owner
                FROM pg_tables
                WHERE schemaname NOT LIKE 'pg\_%' AND schemaname <> 'information_schema'
                ORDER BY schemaname, tablename
            "#
        }
        ObjectKind::Views => {
            r#"
                SELECT
                    schemaname::text AS schema,
                    viewname::text AS name,
                    COALESCE(viewowner::text, '') AS owner
                FROM pg_views
                WHERE schemaname NOT LIKE 'pg\_%' AND schemaname <> 'information_schema'
                ORDER BY schemaname, viewname
            "#
        }
        ObjectKind::Functions => {
            r#"
                SELECT
                    n.nspname::text AS schema,
                    p.proname::text AS name,
                    COALESCE(pg_get_userbyid(p.proowner)::text, '') AS owner
                FROM pg_proc p
                JOIN pg_namespace n ON n.oid = p.pronamespace
                WHERE n.nspname NOT LIKE 'pg\_%' AND n.nspname <> 'information_schema'
                ORDER BY n.nspname, p.proname
            "#
        }
    }
}
