use std::fmt;
use std::time::Duration;

use clarity_core::error::FailureKind;

/// Bounded retry with exponential backoff: attempt `n` that fails
/// retryably waits `base * 2^(n-1)` before attempt `n + 1`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 1000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff_ms,
        }
    }

    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        Duration::from_millis(self.base_backoff_ms.saturating_mul(1u64 << exponent))
    }

    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }
}

/// Where one `generate` call is in its retry cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    Sending { attempt: u32 },
    RetryWait { attempt: u32, delay: Duration },
    Success { attempts: u32 },
    TerminalFailure { attempts: u32, kind: FailureKind },
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttemptState::Success { .. } | AttemptState::TerminalFailure { .. }
        )
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: AttemptState) -> bool {
        use AttemptState::*;
        match (self, next) {
            (Idle, Sending { attempt }) => attempt == 1,
            (Sending { attempt: a }, Success { attempts }) => a == attempts,
            (Sending { attempt: a }, TerminalFailure { attempts, .. }) => a == attempts,
            (Sending { attempt: a }, RetryWait { attempt: b, .. }) => a == b,
            (RetryWait { attempt: a, .. }, Sending { attempt: b }) => b == a + 1,
            _ => false,
        }
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptState::Idle => write!(f, "idle"),
            AttemptState::Sending { attempt } => write!(f, "sending (attempt {attempt})"),
            AttemptState::RetryWait { attempt, delay } => {
                write!(f, "waiting {}ms after attempt {attempt}", delay.as_millis())
            }
            AttemptState::Success { attempts } => write!(f, "succeeded after {attempts} attempt(s)"),
            AttemptState::TerminalFailure { attempts, kind } => {
                write!(f, "failed ({kind}) after {attempts} attempt(s)")
            }
        }
    }
}
