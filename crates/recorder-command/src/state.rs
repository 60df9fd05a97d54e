//! Exchange state machine.
//!
//! Every command exchange walks the same small graph:
//!
//! ```text
//! Idle -> Sending -> AwaitingResponse -> Matched        -> Idle
//!                                     -> TimedOut       -> Idle
//!                                     -> ChecksumFailed -> AwaitingResponse
//! ```
//!
//! A full device queue sends the exchange from `AwaitingResponse` back to
//! `Sending` with a fresh index, and a checksum failure may still run out
//! the deadline (`ChecksumFailed -> TimedOut`). Transport failures abandon
//! the exchange from `Sending` or `AwaitingResponse` straight to `Idle`.
//!
//! # Examples
//!
//! ```
//! use recorder_command::{ExchangeState, ExchangeTracker};
//!
//! let mut tracker = ExchangeTracker::new();
//! tracker.transition_to(ExchangeState::Sending).unwrap();
//! tracker.transition_to(ExchangeState::AwaitingResponse).unwrap();
//! tracker.transition_to(ExchangeState::Matched).unwrap();
//! assert!(tracker.transition_to(ExchangeState::Sending).is_err());
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::CommandError;

/// Transitions kept for diagnostics.
const MAX_HISTORY_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeState {
    /// No exchange in flight.
    Idle,

    /// Encoding and writing the command.
    Sending,

    /// Written; reading until a matching response or the deadline.
    AwaitingResponse,

    /// A response with the command's index arrived.
    Matched,

    /// The deadline passed, or the caller cancelled the wait.
    TimedOut,

    /// A frame failed its CRC; the wait continues.
    ChecksumFailed,
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExchangeState::Idle => "Idle",
            ExchangeState::Sending => "Sending",
            ExchangeState::AwaitingResponse => "AwaitingResponse",
            ExchangeState::Matched => "Matched",
            ExchangeState::TimedOut => "TimedOut",
            ExchangeState::ChecksumFailed => "ChecksumFailed",
        };
        write!(f, "{}", name)
    }
}

impl ExchangeState {
    pub fn can_transition_to(&self, target: &ExchangeState) -> bool {
        matches!(
            (self, target),
            (ExchangeState::Idle, ExchangeState::Sending)
                | (ExchangeState::Sending, ExchangeState::AwaitingResponse | ExchangeState::Idle)
                | (
                    ExchangeState::AwaitingResponse,
                    ExchangeState::Matched
                        | ExchangeState::TimedOut
                        | ExchangeState::ChecksumFailed
                        | ExchangeState::Sending
                        | ExchangeState::Idle
                )
                | (
                    ExchangeState::ChecksumFailed,
                    ExchangeState::AwaitingResponse | ExchangeState::TimedOut
                )
                | (ExchangeState::Matched | ExchangeState::TimedOut, ExchangeState::Idle)
        )
    }

    /// `true` for the states an exchange ends in before returning to idle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExchangeState::Matched | ExchangeState::TimedOut)
    }
}

/// One recorded state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeTransition {
    pub from: ExchangeState,
    pub to: ExchangeState,
    #[serde(skip, default = "Instant::now")]
    pub timestamp: Instant,
}

impl ExchangeTransition {
    pub fn new(from: ExchangeState, to: ExchangeState) -> Self {
        Self {
            from,
            to,
            timestamp: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

/// Current exchange state plus a bounded transition history.
#[derive(Debug)]
pub struct ExchangeTracker {
    current: ExchangeState,
    entered_at: Instant,
    history: VecDeque<ExchangeTransition>,
}

impl ExchangeTracker {
    pub fn new() -> Self {
        Self {
            current: ExchangeState::Idle,
            entered_at: Instant::now(),
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
        }
    }

    pub fn current_state(&self) -> ExchangeState {
        self.current
    }

    pub fn time_in_current_state(&self) -> Duration {
        self.entered_at.elapsed()
    }

    /// Recent transitions, oldest first.
    pub fn history(&self) -> &VecDeque<ExchangeTransition> {
        &self.history
    }

    /// Move to `next`, recording the transition.
    ///
    /// # Errors
    /// [`CommandError::InvalidTransition`] if the graph has no such edge;
    /// the state is left unchanged.
    pub fn transition_to(&mut self, next: ExchangeState) -> Result<ExchangeTransition, CommandError> {
        if !self.current.can_transition_to(&next) {
            return Err(CommandError::invalid_transition(self.current, next));
        }
        let transition = ExchangeTransition::new(self.current, next);
        trace!(from = %self.current, to = %next, "exchange transition");
        if self.history.len() >= MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history.push_back(transition.clone());
        self.current = next;
        self.entered_at = transition.timestamp;
        Ok(transition)
    }

    /// Return to `Idle` from wherever an exchange left off.
    ///
    /// Used when an exchange unwinds through an error. Every state has an
    /// edge to `Idle` except `ChecksumFailed`, which is first recorded as a
    /// timeout.
    pub fn finish(&mut self) {
        if self.current == ExchangeState::Idle {
            return;
        }
        if self.current == ExchangeState::ChecksumFailed {
            let _ = self.transition_to(ExchangeState::TimedOut);
        }
        let _ = self.transition_to(ExchangeState::Idle);
    }

    /// Count of checksum failures in the retained history.
    pub fn checksum_failures(&self) -> usize {
        self.history
            .iter()
            .filter(|t| t.to == ExchangeState::ChecksumFailed)
            .count()
    }
}

impl Default for ExchangeTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ExchangeState::Idle, ExchangeState::Sending, true)]
    #[case(ExchangeState::Sending, ExchangeState::AwaitingResponse, true)]
    #[case(ExchangeState::AwaitingResponse, ExchangeState::Matched, true)]
    #[case(ExchangeState::AwaitingResponse, ExchangeState::ChecksumFailed, true)]
    #[case(ExchangeState::AwaitingResponse, ExchangeState::Sending, true)]
    #[case(ExchangeState::ChecksumFailed, ExchangeState::AwaitingResponse, true)]
    #[case(ExchangeState::ChecksumFailed, ExchangeState::TimedOut, true)]
    #[case(ExchangeState::TimedOut, ExchangeState::Idle, true)]
    #[case(ExchangeState::Idle, ExchangeState::Matched, false)]
    #[case(ExchangeState::Matched, ExchangeState::Sending, false)]
    #[case(ExchangeState::ChecksumFailed, ExchangeState::Matched, false)]
    #[case(ExchangeState::Sending, ExchangeState::TimedOut, false)]
    fn test_transition_rules(
        #[case] from: ExchangeState,
        #[case] to: ExchangeState,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(&to), allowed);
    }

    #[test]
    fn test_checksum_retry_path() {
        let mut tracker = ExchangeTracker::new();
        for state in [
            ExchangeState::Sending,
            ExchangeState::AwaitingResponse,
            ExchangeState::ChecksumFailed,
            ExchangeState::AwaitingResponse,
            ExchangeState::Matched,
            ExchangeState::Idle,
        ] {
            tracker.transition_to(state).unwrap();
        }
        assert_eq!(tracker.history().len(), 6);
        assert_eq!(tracker.checksum_failures(), 1);
        assert_eq!(tracker.current_state(), ExchangeState::Idle);
    }

    #[test]
    fn test_invalid_transition_leaves_state() {
        let mut tracker = ExchangeTracker::new();
        let err = tracker.transition_to(ExchangeState::Matched).unwrap_err();
        assert_eq!(
            err,
            CommandError::invalid_transition(ExchangeState::Idle, ExchangeState::Matched)
        );
        assert_eq!(tracker.current_state(), ExchangeState::Idle);
        assert!(tracker.history().is_empty());
    }

    #[test]
    fn test_finish_from_checksum_failure_records_timeout() {
        let mut tracker = ExchangeTracker::new();
        tracker.transition_to(ExchangeState::Sending).unwrap();
        tracker.transition_to(ExchangeState::AwaitingResponse).unwrap();
        tracker.transition_to(ExchangeState::ChecksumFailed).unwrap();
        tracker.finish();
        assert_eq!(tracker.current_state(), ExchangeState::Idle);
        let last: Vec<_> = tracker.history().iter().rev().take(2).map(|t| t.to).collect();
        assert_eq!(last, vec![ExchangeState::Idle, ExchangeState::TimedOut]);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut tracker = ExchangeTracker::new();
        for _ in 0..100 {
            tracker.transition_to(ExchangeState::Sending).unwrap();
            tracker.transition_to(ExchangeState::Idle).unwrap();
        }
        assert_eq!(tracker.history().len(), MAX_HISTORY_SIZE);
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&ExchangeState::AwaitingResponse).unwrap();
        assert_eq!(json, "\"awaiting_response\"");
    }
}
