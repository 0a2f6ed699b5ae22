//! Foundational low-level utilities shared across Skein crates.
//!
//! Provides atomic file-write helpers, time utilities, bounded history
//! buffers, and the cooperative cancellation primitive used by every
//! long-running loop in the orchestrator.

pub mod atomic_io;
pub mod cancel;
pub mod recent;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use cancel::{sleep_unless_cancelled, CancelToken};
pub use recent::push_recent_line;
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms, elapsed_seconds_since};

#[cfg(test)]
mod tests {
    use std::fs::read_to_string;
    use std::time::Duration;

    use super::*;

    #[test]
    fn time_utils_round_trip_bounds() {
        let now_s = current_unix_timestamp();
        let now_ms = current_unix_timestamp_ms();
        let now_ms_s = now_ms / 1_000;
        assert!(now_ms_s >= now_s);
        assert!(now_ms_s <= now_s.saturating_add(1));
    }

    #[test]
    fn elapsed_seconds_saturates_on_clock_skew() {
        assert_eq!(elapsed_seconds_since(10_000, 25_000), 15);
        assert_eq!(elapsed_seconds_since(25_000, 10_000), 0);
    }

    #[test]
    fn write_text_atomic_writes_content() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("sample.json");
        write_text_atomic(&path, "{\"ok\":true}").expect("write");
        let contents = read_to_string(&path).expect("read");
        assert_eq!(contents, "{\"ok\":true}");
    }

    #[test]
    fn push_recent_line_evicts_oldest_beyond_cap() {
        let mut lines = Vec::new();
        for index in 0..5 {
            push_recent_line(&mut lines, format!("line-{index}"), 3);
        }
        assert_eq!(lines, vec!["line-2", "line-3", "line-4"]);
    }

    #[tokio::test]
    async fn cancel_token_interrupts_sleep_within_one_slice() {
        let token = CancelToken::new();
        token.cancel();
        let completed = sleep_unless_cancelled(&token, Duration::from_secs(30)).await;
        assert!(!completed);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn uncancelled_sleep_runs_to_completion() {
        let token = CancelToken::new();
        let completed = sleep_unless_cancelled(&token, Duration::from_millis(5)).await;
        assert!(completed);
    }
}
