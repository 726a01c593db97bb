//! Wait indicators for operations that block on the wallet user.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner shown while waiting for the wallet
pub struct WaitSpinner {
    bar: ProgressBar,
}

impl WaitSpinner {
    /// Start a spinner with `message`, showing the time left of `timeout`.
    #[must_use]
    pub fn new(message: &str, timeout: Duration) -> Self {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(style);
        bar.set_message(format!("{message} (up to {})", format_duration(timeout)));
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    /// Stop and replace the spinner with `message`
    pub fn finish(&self, message: String) {
        self.bar.finish_with_message(message);
    }

    /// Stop and leave the last message visible (for errors)
    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

/// Format duration in human-readable format
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Format a millisecond Unix timestamp's age relative to `now_ms`
#[must_use]
pub fn format_age(created_at_ms: u64, now_ms: u64) -> String {
    format_duration(Duration::from_millis(now_ms.saturating_sub(created_at_ms)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0s");
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(120)), "2m 0s");
        assert_eq!(format_duration(Duration::from_secs(600)), "10m 0s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m");
    }

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(1_000, 91_000), "1m 30s");
        // Clock skew never goes negative
        assert_eq!(format_age(5_000, 1_000), "0s");
    }
}
