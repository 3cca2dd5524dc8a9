//! Two-level cancellation and the signal-driven shutdown sequence.
//!
//! # Design
//!
//! - The root token outlives the pool token; the pool token is a child, so
//!   cancelling the root always cancels the pool too.
//! - Only the coordinator sequences the grace period between the two.

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Termination request delivered to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Interactive interrupt (SIGINT / Ctrl-C).
    Interrupt,
    /// Termination request (SIGTERM).
    Terminate,
}

impl Display for ShutdownSignal {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Interrupt => "interrupt",
            Self::Terminate => "terminate",
        })
    }
}

/// Coordinator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownState {
    /// Serving normally.
    Running,
    /// Pool scope cancelled; grace period running.
    Draining,
    /// Root scope cancelled.
    Terminated,
}

/// Root scope plus the worker-pool scope derived from it.
#[derive(Debug, Clone)]
pub struct ScopeTree {
    root: CancellationToken,
    pool: CancellationToken,
}

impl ScopeTree {
    /// Derive a pool scope from `root`.
    #[must_use]
    pub fn new(root: CancellationToken) -> Self {
        let pool = root.child_token();
        Self { root, pool }
    }

    /// Long-lived scope for the dispatcher, redelivery and the process.
    #[must_use]
    pub const fn root(&self) -> &CancellationToken {
        &self.root
    }

    /// Scope for worker execution; cancelled first on shutdown.
    #[must_use]
    pub const fn pool(&self) -> &CancellationToken {
        &self.pool
    }
}

/// Drives Running, then Draining, then Terminated.
pub struct ShutdownCoordinator {
    scopes: ScopeTree,
    grace: Duration,
    state: Arc<watch::Sender<ShutdownState>>,
}

impl ShutdownCoordinator {
    /// Create a coordinator publishing its state on `state`.
    #[must_use]
    pub const fn new(
        scopes: ScopeTree,
        grace: Duration,
        state: Arc<watch::Sender<ShutdownState>>,
    ) -> Self {
        Self {
            scopes,
            grace,
            state,
        }
    }

    /// Run the state machine until the root scope is cancelled.
    ///
    /// The first signal cancels the pool scope and starts the grace timer;
    /// timer expiry or a second signal cancels the root scope. A root
    /// cancellation from elsewhere ends the machine in any state.
    pub async fn run(self, mut signals: mpsc::Receiver<ShutdownSignal>) -> ShutdownState {
        let root = self.scopes.root();

        let first = tokio::select! {
            biased;
            () = root.cancelled() => None,
            signal = wait_for_signal(&mut signals) => Some(signal),
        };
        if let Some(signal) = first {
            info!(signal = %signal, grace_ms = duration_ms(self.grace), "draining workers");
            self.scopes.pool().cancel();
            self.state.send_replace(ShutdownState::Draining);

            tokio::select! {
                biased;
                () = root.cancelled() => {}
                Some(signal) = signals.recv() => {
                    warn!(signal = %signal, "second signal received; terminating immediately");
                }
                () = tokio::time::sleep(self.grace) => {
                    info!("grace period elapsed; terminating");
                }
            }
        }

        root.cancel();
        self.state.send_replace(ShutdownState::Terminated);
        ShutdownState::Terminated
    }
}

async fn wait_for_signal(signals: &mut mpsc::Receiver<ShutdownSignal>) -> ShutdownSignal {
    match signals.recv().await {
        Some(signal) => signal,
        None => std::future::pending().await,
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Forward process signals into `signals` until the receiver goes away.
#[cfg(unix)]
#[must_use]
pub fn spawn_signal_listener(signals: mpsc::Sender<ShutdownSignal>) -> JoinHandle<()> {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let (mut interrupt, mut terminate) =
            match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                (Ok(interrupt), Ok(terminate)) => (interrupt, terminate),
                (Err(err), _) | (_, Err(err)) => {
                    warn!(error = %err, "failed to install signal handlers");
                    return;
                }
            };
        loop {
            let received = tokio::select! {
                Some(()) = interrupt.recv() => ShutdownSignal::Interrupt,
                Some(()) = terminate.recv() => ShutdownSignal::Terminate,
                else => return,
            };
            if signals.send(received).await.is_err() {
                return;
            }
        }
    })
}

/// Forward process signals into `signals` until the receiver goes away.
#[cfg(not(unix))]
#[must_use]
pub fn spawn_signal_listener(signals: mpsc::Sender<ShutdownSignal>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if signals.send(ShutdownSignal::Interrupt).await.is_err() {
                return;
            }
        }
        warn!("failed to listen for ctrl-c");
    })
}
