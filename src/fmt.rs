//! Shared formatting helpers.
//!
//! Pure string formatting only; nothing here touches the database or the
//! presenter state.

/// Format byte count as a compact human-readable size ("1.5G", "512B").
pub fn format_bytes(bytes: i64) -> String {
    const GB: i64 = 1024 * 1024 * 1024;
    const MB: i64 = 1024 * 1024;
    const KB: i64 = 1024;

    if bytes >= GB {
        format!("{:.1}G", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1}M", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}K", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes.max(0))
    }
}

/// Format an ops-per-second rate ("1.2K/s", "10/s", "0.4/s").
pub fn format_rate(rate: f64) -> String {
    if rate < 0.01 {
        return "0".to_string();
    }
    if rate >= 1_000_000.0 {
        format!("{:.1}M/s", rate / 1_000_000.0)
    } else if rate >= 1_000.0 {
        format!("{:.1}K/s", rate / 1_000.0)
    } else if rate >= 10.0 {
        format!("{:.0}/s", rate)
    } else {
        format!("{:.1}/s", rate)
    }
}

/// Truncate an interval string to whole-second precision.
///
/// PostgreSQL renders intervals like `"00:00:05.417683"`; the dashboard
/// shows `"00:00:05"`. Strings without a fractional part pass through
/// unchanged.
pub fn truncate_subseconds(duration: &str) -> String {
    match duration.split_once('.') {
        Some((whole, _)) => whole.to_string(),
        None => duration.to_string(),
    }
}
