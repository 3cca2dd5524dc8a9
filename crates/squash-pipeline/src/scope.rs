//! Cancellable, deadline-bearing execution scope.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::FailureCause;
use squash_store::StoreError;

/// Why a scope stopped before its work finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    /// The owning cancellation token fired (drain or forced shutdown).
    Shutdown,
    /// The scope's own deadline elapsed.
    DeadlineExceeded,
}

impl Interruption {
    /// Stable identifier used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Shutdown => "shutdown",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

/// Cancellation plus optional deadline for one unit of work.
///
/// The scope carries no domain data. Token cancellation is always reported as
/// [`Interruption::Shutdown`] and deadline expiry as
/// [`Interruption::DeadlineExceeded`], so callers can tell the two apart.
#[derive(Debug, Clone)]
pub struct ExecutionScope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl ExecutionScope {
    /// Scope bounded only by `token`.
    #[must_use]
    pub const fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Scope bounded by `token` and by `timeout` from now.
    #[must_use]
    pub fn with_timeout(token: CancellationToken, timeout: Duration) -> Self {
        Self {
            token,
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Non-blocking check for an interruption that has already happened.
    #[must_use]
    pub fn check(&self) -> Option<Interruption> {
        if self.token.is_cancelled() {
            return Some(Interruption::Shutdown);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Interruption::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolve once the scope is interrupted.
    pub async fn interrupted(&self) -> Interruption {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    () = self.token.cancelled() => Interruption::Shutdown,
                    () = tokio::time::sleep_until(deadline) => Interruption::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                Interruption::Shutdown
            }
        }
    }

    /// Run a store call, abandoning it if the scope is interrupted first.
    ///
    /// # Errors
    ///
    /// Returns [`FailureCause::Interrupted`] when the scope ends first and
    /// [`FailureCause::Store`] when the call itself fails.
    pub async fn guard<T, F>(&self, operation: F) -> Result<T, FailureCause>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        if let Some(interruption) = self.check() {
            return Err(FailureCause::Interrupted(interruption));
        }
        tokio::select! {
            biased;
            interruption = self.interrupted() => Err(FailureCause::Interrupted(interruption)),
            result = operation => result.map_err(FailureCause::Store),
        }
    }
}
