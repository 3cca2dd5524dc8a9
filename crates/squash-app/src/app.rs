//! Application wiring for both entry modes.

use std::sync::Arc;

use squash_config::{RunConfig, RunMode};
use squash_pipeline::{ExecutionScope, Pipeline, TransferDescriptor};
use squash_store::{ObjectLocation, ObjectStore};
use squash_telemetry::{Metrics, job_span};
use squash_transport::MessageTransport;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info};

use crate::dispatcher::{DispatchSummary, Dispatcher, NotificationFilter};
use crate::error::{AppError, AppResult};
use crate::failure::FailureHandler;
use crate::shutdown::{ScopeTree, ShutdownCoordinator, ShutdownSignal, ShutdownState};
use crate::worker::{JobOutcome, WorkerPool, WorkerSettings, compress_then_delete};

/// Worker name used in direct-mode logs.
pub const DIRECT_WORKER: &str = "[direct]";

/// What a completed run did.
#[derive(Debug, Clone, PartialEq)]
pub enum RunSummary {
    /// Direct mode processed its single object.
    Direct(JobOutcome),
    /// Event-driven mode shut down cleanly.
    EventDriven(DispatchSummary),
}

/// Collaborators and scopes for one process run.
pub struct Application {
    config: RunConfig,
    store: Arc<dyn ObjectStore>,
    transport: Arc<dyn MessageTransport>,
    metrics: Metrics,
    scopes: ScopeTree,
    state: Arc<watch::Sender<ShutdownState>>,
}

impl Application {
    /// Wire an application around validated settings and its collaborators.
    #[must_use]
    pub fn new(
        config: RunConfig,
        store: Arc<dyn ObjectStore>,
        transport: Arc<dyn MessageTransport>,
        metrics: Metrics,
    ) -> Self {
        let (state, _) = watch::channel(ShutdownState::Running);
        Self {
            config,
            store,
            transport,
            metrics,
            scopes: ScopeTree::new(CancellationToken::new()),
            state: Arc::new(state),
        }
    }

    /// Root scope; cancelling it terminates the run.
    #[must_use]
    pub fn root(&self) -> CancellationToken {
        self.scopes.root().clone()
    }

    /// Observe the shutdown state machine.
    #[must_use]
    pub fn shutdown_state(&self) -> watch::Receiver<ShutdownState> {
        self.state.subscribe()
    }

    /// Metrics shared with every component.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Run the configured mode to completion.
    ///
    /// # Errors
    ///
    /// Direct mode returns the first pipeline error; event-driven mode only
    /// fails on subscribe/receive errors or a crashed task.
    pub async fn run(&self, signals: mpsc::Receiver<ShutdownSignal>) -> AppResult<RunSummary> {
        match &self.config.mode {
            RunMode::Direct {
                source_object,
                destination_object,
            } => self
                .run_direct(source_object, destination_object, signals)
                .await
                .map(RunSummary::Direct),
            RunMode::EventDriven {
                subscription,
                topic,
            } => self
                .run_event_driven(subscription, topic, signals)
                .await
                .map(RunSummary::EventDriven),
        }
    }

    /// Compress one object, then delete it. A signal cancels the root scope.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Pipeline`] with the first pipeline error.
    pub async fn run_direct(
        &self,
        source_object: &str,
        destination_object: &str,
        mut signals: mpsc::Receiver<ShutdownSignal>,
    ) -> AppResult<JobOutcome> {
        let root = self.root();
        let signal_watch = tokio::spawn(async move {
            if let Some(signal) = signals.recv().await {
                info!(signal = %signal, "signal received; cancelling direct transfer");
                root.cancel();
            }
        });

        let descriptor = TransferDescriptor::new(
            ObjectLocation::new(self.config.source_bucket.clone(), source_object),
            ObjectLocation::new(self.config.destination_bucket.clone(), destination_object),
            self.config.compression,
        );
        let scope = ExecutionScope::with_timeout(
            self.scopes.root().child_token(),
            self.config.tunables.job_timeout,
        );
        let pipeline = Pipeline::new(Arc::clone(&self.store));

        self.metrics.job_started();
        let outcome = compress_then_delete(&pipeline, &descriptor, &scope, DIRECT_WORKER)
            .instrument(job_span(DIRECT_WORKER, source_object))
            .await;
        self.metrics.job_finished();
        signal_watch.abort();

        match outcome {
            Ok(outcome) => {
                self.metrics.inc_job(match &outcome {
                    JobOutcome::Completed(_) => "completed",
                    JobOutcome::Resumed => "resumed",
                });
                Ok(outcome)
            }
            Err(source) => {
                self.metrics.inc_job("failed");
                self.metrics.inc_pipeline_failure(source.kind());
                error!(
                    worker = DIRECT_WORKER,
                    object = source_object,
                    kind = source.kind(),
                    error = %source,
                    detail = ?source,
                    "direct transfer failed"
                );
                Err(AppError::Pipeline {
                    operation: "direct.compress_then_delete",
                    source,
                })
            }
        }
    }

    /// Serve notifications until the root scope is cancelled.
    ///
    /// # Errors
    ///
    /// Returns the dispatcher's fatal transport error, or [`AppError::Task`]
    /// if a worker or the coordinator crashed.
    pub async fn run_event_driven(
        &self,
        subscription: &str,
        topic: &str,
        signals: mpsc::Receiver<ShutdownSignal>,
    ) -> AppResult<DispatchSummary> {
        let tunables = &self.config.tunables;
        let root = self.scopes.root();
        let pool = self.scopes.pool();

        let coordinator = ShutdownCoordinator::new(
            self.scopes.clone(),
            tunables.grace_period,
            Arc::clone(&self.state),
        );
        let coordinator_task = tokio::spawn(coordinator.run(signals));

        let (jobs, queue) = mpsc::channel(tunables.workers.get());
        let failures = FailureHandler::new(
            Arc::clone(&self.transport),
            topic,
            tunables.republish_timeout,
            root.clone(),
            self.metrics.clone(),
        );
        let settings = WorkerSettings {
            source_bucket: self.config.source_bucket.clone(),
            destination_bucket: self.config.destination_bucket.clone(),
            compression: self.config.compression,
            job_timeout: tunables.job_timeout,
        };
        let workers = WorkerPool::new(
            Pipeline::new(Arc::clone(&self.store)),
            settings,
            failures.clone(),
            pool.clone(),
            root.clone(),
            self.metrics.clone(),
        )
        .start(tunables.workers, queue);

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.transport),
            subscription,
            NotificationFilter::new(
                self.config.source_bucket.clone(),
                tunables.temp_marker.clone(),
            ),
            jobs,
            failures,
            root.clone(),
            pool.clone(),
            self.metrics.clone(),
        );
        info!(
            subscription,
            topic,
            workers = tunables.workers.get(),
            source_bucket = %self.config.source_bucket,
            destination_bucket = %self.config.destination_bucket,
            "event-driven mode started"
        );

        let dispatched = dispatcher.run().await;
        if dispatched.is_err() {
            root.cancel();
        }
        let joined = workers.join().await;
        root.cancelled().await;
        let final_state = coordinator_task
            .await
            .map_err(|err| AppError::task("shutdown_coordinator", err))?;
        info!(state = ?final_state, "event-driven mode stopped");

        joined?;
        dispatched
    }
}
