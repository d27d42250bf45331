//! Shared formatting helpers for table cells.
//!
//! All pure formatting functions (no terminal styling, no layout) live here.

/// Magnitude suffixes, 1000-based, smallest first.
const SUFFIXES: [&str; 9] = ["", "K", "M", "G", "T", "P", "E", "Z", "Y"];

/// Format a counter with the smallest sufficient magnitude suffix.
///
/// Divides by 1000 and rounds to nearest until the scaled value drops
/// below 1000: `"999"`, `"1K"`, `"2M"`, `"3G"`.
pub fn scale(value: u64) -> String {
    let mut scaled = value;
    let mut index = 0;
    while scaled >= 1000 && index + 1 < SUFFIXES.len() {
        scaled = scaled / 1000 + u64::from(scaled % 1000 >= 500);
        index += 1;
    }
    format!("{}{}", scaled, SUFFIXES[index])
}

/// Format a duration in seconds as a compact single token.
///
/// `"45s"`, `"3m5s"`, `"2h14m"`, `"6d1h"`; `"-"` for negative input.
pub fn duration_compact(secs: i64) -> String {
    if secs < 0 {
        return "-".to_string();
    }
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d{}h", secs / 86400, (secs % 86400) / 3600)
    }
}

/// Format an epoch timestamp as `"YYYY-mm-dd HH:MM:SS"` UTC, `"-"` when
/// out of range.
pub fn epoch_datetime(epoch_secs: i64) -> String {
    match chrono::DateTime::from_timestamp(epoch_secs, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "-".to_string(),
    }
}
