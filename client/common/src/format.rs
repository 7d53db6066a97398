//! Human-readable formatting for byte counts, durations and ETAs.

/// Formats a byte count using decimal units (KB = 1000 B).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Formats a duration in seconds as `2h 3m 4s` / `3m 4s` / `4s`.
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Estimates time remaining from byte throughput so far.
pub fn calculate_eta_bytes(elapsed_secs: f64, bytes_done: u64, bytes_total: u64) -> String {
    calculate_eta(elapsed_secs, bytes_done, bytes_total)
}

/// Estimates time remaining from item throughput so far.
pub fn calculate_eta_items(elapsed_secs: f64, items_done: u64, items_total: u64) -> String {
    calculate_eta(elapsed_secs, items_done, items_total)
}

fn calculate_eta(elapsed_secs: f64, done: u64, total: u64) -> String {
    if done == 0 || elapsed_secs <= 0.0 || total <= done {
        return "--".to_string();
    }
    let rate = done as f64 / elapsed_secs;
    let remaining = (total - done) as f64 / rate;
    format_duration(remaining)
}
