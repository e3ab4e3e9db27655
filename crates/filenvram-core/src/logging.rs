//! Verbose logging switch.
//!
//! All output goes through the `log` facade; the host decides where it ends
//! up. On top of the usual level filtering, per-property traces (every get,
//! set and remove) are only emitted while the [`LoggingFlag`] is on. The
//! flag starts from configuration and can be flipped at runtime through the
//! `EnableLogging` control key.

use std::sync::atomic::{AtomicBool, Ordering};

/// Shared on/off switch for per-property trace logging.
#[derive(Debug, Default)]
pub struct LoggingFlag {
    enabled: AtomicBool,
}

impl LoggingFlag {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Set the flag, returning the previous state.
    pub fn set(&self, enabled: bool) -> bool {
        let previous = self.enabled.swap(enabled, Ordering::Relaxed);
        if previous != enabled {
            log::info!(
                "Setting logging to {}.",
                if enabled { "enabled" } else { "disabled" }
            );
        }
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_disabled() {
        assert!(!LoggingFlag::default().enabled());
    }

    #[test]
    fn set_returns_previous() {
        let flag = LoggingFlag::new(true);
        assert!(flag.set(false));
        assert!(!flag.enabled());
        assert!(!flag.set(false));
    }
}
