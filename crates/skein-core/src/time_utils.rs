/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Returns the current Unix timestamp in seconds.
pub fn current_unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Returns whole seconds elapsed between two millisecond timestamps,
/// saturating to zero when the clock moved backwards.
pub fn elapsed_seconds_since(start_unix_ms: u64, now_unix_ms: u64) -> u64 {
    now_unix_ms.saturating_sub(start_unix_ms) / 1_000
}
