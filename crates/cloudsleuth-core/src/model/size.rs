//! Display helpers for byte totals, item counts and elapsed time.
//!
//! Aggregates stay `u64` bytes everywhere; `f64` appears only here.

use std::time::Duration;

/// Binary-scaled units with short labels, smallest first after bytes.
const UNITS: [(&str, usize); 4] = [("KB", 1), ("MB", 1), ("GB", 2), ("TB", 2)];

/// Render `bytes` with the largest unit that keeps the value at least 1.
///
/// Scaling is by 1024. KB and MB show one decimal, GB and TB two.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    let (label, decimals) = UNITS[unit];
    format!("{value:.decimals$} {label}")
}

/// Render `count` with comma thousand separators.
pub fn format_count(count: u64) -> String {
    let digits = count.to_string();
    let lead = digits.len() % 3;
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.char_indices() {
        if i > 0 && (i + 3 - lead) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Render whole seconds as `1h 02m 03s`, dropping leading zero units.
pub fn format_duration(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    match (h, m) {
        (0, 0) => format!("{s}s"),
        (0, _) => format!("{m}m {s:02}s"),
        _ => format!("{h}h {m:02}m {s:02}s"),
    }
}
