//! Run context shared by every attempt of one invocation.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// States an invocation moves through.
///
/// `Composing` happens once; `Synthesizing` through `Executing` happen per
/// attempt; `RetryPending` separates attempts; `Succeeded` and `Failed` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Composing,
    Synthesizing,
    Validating,
    Executing,
    Succeeded,
    RetryPending,
    Failed,
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Composing => "composing",
            Self::Synthesizing => "synthesizing",
            Self::Validating => "validating",
            Self::Executing => "executing",
            Self::Succeeded => "succeeded",
            Self::RetryPending => "retry pending",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Sender for reporting state transitions to the caller.
///
/// Wraps a callback that receives the attempt number (0 while composing) and
/// the state just entered.
pub struct ProgressSender {
    callback: Box<dyn Fn(u32, AttemptState) + Send + Sync>,
}

impl ProgressSender {
    /// Create a new sender from the given callback.
    pub fn new(callback: impl Fn(u32, AttemptState) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Create a no-op sender that discards all reports.
    pub fn noop() -> Self {
        Self {
            callback: Box::new(|_, _| {}),
        }
    }

    /// Report a transition.
    pub fn send(&self, attempt: u32, state: AttemptState) {
        (self.callback)(attempt, state);
    }
}

impl fmt::Debug for ProgressSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSender").finish_non_exhaustive()
    }
}

/// Caller-supplied context for one invocation.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// When cancelled, the running subprocess is killed and the attempt's
    /// sandbox removed.
    pub cancellation: CancellationToken,
    /// Channel for reporting state transitions.
    pub progress: Arc<ProgressSender>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            cancellation: CancellationToken::new(),
            progress: Arc::new(ProgressSender::noop()),
        }
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: attach a cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Builder: attach a progress sender.
    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Arc::new(progress);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn progress_sender_forwards_reports() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let ctx = RunContext::new().with_progress(ProgressSender::new(move |attempt, state| {
            sink.lock().unwrap().push((attempt, state));
        }));

        ctx.progress.send(0, AttemptState::Composing);
        ctx.progress.send(1, AttemptState::Synthesizing);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(0, AttemptState::Composing), (1, AttemptState::Synthesizing)]
        );
    }

    #[test]
    fn terminal_states() {
        assert!(AttemptState::Succeeded.is_terminal());
        assert!(AttemptState::Failed.is_terminal());
        assert!(!AttemptState::RetryPending.is_terminal());
        assert_eq!(AttemptState::RetryPending.to_string(), "retry pending");
    }
}
