//! General utilities shared across the engine.

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Logs a per-group diagnostic line.
///
/// Emitted at `info` when `debug_logging` is enabled in the config and at
/// `debug` otherwise, so the lines can be switched on without touching the
/// global log filter.
macro_rules! diag {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            log::info!($($arg)+);
        } else {
            log::debug!($($arg)+);
        }
    };
}

pub(crate) use diag;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_millis_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }
}
