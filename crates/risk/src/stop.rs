//! Emergency stop flag.
//!
//! A lock-free boolean consulted on every submission. Engaging the stop
//! halts new order flow immediately; cancels bypass the risk pipeline so
//! the book can still be pulled down while stopped.

use std::sync::atomic::{AtomicBool, Ordering};

/// Runtime-mutable emergency stop.
///
/// The hot-path check (`is_engaged`) is a single atomic load. The engage
/// reason is behind a mutex since it is only written during exceptional
/// events.
pub struct EmergencyStop {
    engaged: AtomicBool,
    reason: parking_lot::Mutex<Option<String>>,
}

impl EmergencyStop {
    /// Create a stop, optionally already engaged (from configuration).
    pub fn new(engaged: bool) -> Self {
        Self {
            engaged: AtomicBool::new(engaged),
            reason: parking_lot::Mutex::new(engaged.then(|| "configured at startup".to_string())),
        }
    }

    /// Returns `true` if new submissions are halted.
    #[inline]
    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::Relaxed)
    }

    /// Engage the stop, halting all new submissions.
    pub fn engage(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.engaged.store(true, Ordering::SeqCst);
        tracing::error!(reason = %reason, "EMERGENCY STOP ENGAGED — new submissions halted");
        *self.reason.lock() = Some(reason);
    }

    /// Release the stop, re-enabling submissions.
    pub fn release(&self) {
        self.engaged.store(false, Ordering::SeqCst);
        tracing::warn!("emergency stop released — submissions re-enabled");
        *self.reason.lock() = None;
    }

    /// The reason the stop was engaged, if it is.
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }
}

impl Default for EmergencyStop {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initially_released() {
        let stop = EmergencyStop::default();
        assert!(!stop.is_engaged());
        assert!(stop.reason().is_none());
    }

    #[test]
    fn test_configured_engaged() {
        let stop = EmergencyStop::new(true);
        assert!(stop.is_engaged());
        assert!(stop.reason().is_some());
    }

    #[test]
    fn test_engage_release_cycle() {
        let stop = EmergencyStop::default();
        stop.engage("daily loss breached");
        assert!(stop.is_engaged());
        assert_eq!(stop.reason().as_deref(), Some("daily loss breached"));

        stop.release();
        assert!(!stop.is_engaged());
        assert!(stop.reason().is_none());
    }

    #[test]
    fn test_latest_reason_wins() {
        let stop = EmergencyStop::default();
        stop.engage("first");
        stop.engage("second");
        assert_eq!(stop.reason().as_deref(), Some("second"));
    }
}
