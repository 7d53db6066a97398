//! Throttled terminal progress output.
//!
//! Long loops call [`ProgressTracker::should_update`] at every unit boundary
//! and only render when the configured interval elapsed, so the terminal is
//! not flooded. [`ProgressBar`] renders an in-place bar for loops with a
//! known total.

use std::io::{self, Write};
use std::time::{Duration, Instant};

/// Rate limiter for progress lines.
pub struct ProgressTracker {
    interval: Duration,
    last_update: Option<Instant>,
}

impl ProgressTracker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_update: None,
        }
    }

    /// Returns true at most once per interval.
    pub fn should_update(&mut self) -> bool {
        let now = Instant::now();
        match self.last_update {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last_update = Some(now);
                true
            }
        }
    }
}

/// In-place progress bar for a loop with a known total.
pub struct ProgressBar {
    total: u64,
    label: String,
    width: usize,
    tracker: ProgressTracker,
    finished: bool,
}

impl ProgressBar {
    pub fn new(total: u64, label: &str) -> Self {
        Self {
            total,
            label: label.to_string(),
            width: 30,
            tracker: ProgressTracker::new(Duration::from_secs(5)),
            finished: false,
        }
    }

    /// Renders the bar when enough time has elapsed (always when `force`).
    pub fn update(&mut self, processed: u64, force: bool) {
        if !force && processed < self.total && !self.tracker.should_update() {
            return;
        }
        let percent = if self.total > 0 {
            processed as f64 / self.total as f64 * 100.0
        } else {
            0.0
        };
        let filled = if self.total > 0 {
            ((self.width as f64 * percent / 100.0) as usize).min(self.width)
        } else {
            0
        };
        let bar: String = "#".repeat(filled) + &"-".repeat(self.width - filled);
        if self.total > 0 {
            print!(
                "\r{}: [{}] {:5.1}% ({}/{})",
                self.label, bar, percent, processed, self.total
            );
        } else {
            print!("\r{}: {} entries processed", self.label, processed);
        }
        let _ = io::stdout().flush();
        if processed >= self.total {
            println!();
            self.finished = true;
        }
    }

    /// Completes the bar and optionally prints a follow-up line.
    pub fn finish(&mut self, message: Option<&str>) {
        if !self.finished {
            self.update(self.total, true);
        }
        if let Some(message) = message {
            println!("{}", message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_always_updates() {
        let mut tracker = ProgressTracker::new(Duration::from_secs(60));
        assert!(tracker.should_update());
    }

    #[test]
    fn second_call_within_interval_is_suppressed() {
        let mut tracker = ProgressTracker::new(Duration::from_secs(60));
        assert!(tracker.should_update());
        assert!(!tracker.should_update());
    }

    #[test]
    fn zero_interval_always_updates() {
        let mut tracker = ProgressTracker::new(Duration::from_secs(0));
        assert!(tracker.should_update());
        assert!(tracker.should_update());
    }
}
