use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch. Single wall-clock source for the
/// whole engine so persisted timestamps and emitted frames agree.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
