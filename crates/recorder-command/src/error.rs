//! Errors raised by the command layer itself.
//!
//! Everything the exchange reports to callers is a
//! [`RecorderError`](recorder_core::RecorderError); this enum covers the two
//! failures that originate here rather than on the wire.

use std::time::Duration;

use recorder_core::RecorderError;
use thiserror::Error;

use crate::state::ExchangeState;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The device lock stayed held by another thread for too long.
    #[error("device lock not acquired within {}ms", .waited.as_millis())]
    LockTimeout { waited: Duration },

    #[error("invalid exchange transition: {from} -> {to}")]
    InvalidTransition {
        from: ExchangeState,
        to: ExchangeState,
    },
}

impl CommandError {
    pub fn lock_timeout(waited: Duration) -> Self {
        Self::LockTimeout { waited }
    }

    pub fn invalid_transition(from: ExchangeState, to: ExchangeState) -> Self {
        Self::InvalidTransition { from, to }
    }
}

impl From<CommandError> for RecorderError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::LockTimeout { waited } => RecorderError::busy(waited),
            other => RecorderError::transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_timeout_becomes_busy() {
        let err: RecorderError = CommandError::lock_timeout(Duration::from_millis(40)).into();
        assert!(matches!(err, RecorderError::Busy { waited } if waited == Duration::from_millis(40)));
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = CommandError::invalid_transition(ExchangeState::Idle, ExchangeState::Matched);
        assert_eq!(
            err.to_string(),
            "invalid exchange transition: Idle -> Matched"
        );
    }
}
