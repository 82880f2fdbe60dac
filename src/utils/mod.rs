use std::time::{Duration, Instant};
use tracing::info;

/// Logs when a long command starts and, on drop, how long it ran.
pub struct Timer {
    label: &'static str,
    started: Instant,
}

impl Timer {
    pub fn start(label: &'static str) -> Self {
        info!("{} started", label);
        Self {
            label,
            started: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!(elapsed = ?self.started.elapsed(), "{} finished", self.label);
    }
}

/// Uniformly random duration in `[min_ms, max_ms]`.
pub fn jitter_between(min_ms: u64, max_ms: u64) -> Duration {
    if max_ms <= min_ms {
        return Duration::from_millis(min_ms);
    }
    let span = (max_ms - min_ms) as f64;
    Duration::from_millis(min_ms + (rand::random::<f64>() * span) as u64)
}

/// Row counts for the stats table: `1234567` → `1,234,567`.
pub fn fmt_number(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let head = digits.len() % 3;
    let mut groups: Vec<&str> = Vec::with_capacity(digits.len() / 3 + 1);
    if head > 0 {
        groups.push(&digits[..head]);
    }
    groups.extend(
        digits.as_bytes()[head..]
            .chunks(3)
            .filter_map(|c| std::str::from_utf8(c).ok()),
    );
    let sign = if n < 0 { "-" } else { "" };
    format!("{sign}{}", groups.join(","))
}
