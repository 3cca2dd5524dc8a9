//! Fixed-size worker pool draining the bounded job queue.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use squash_config::CompressionLevel;
use squash_pipeline::{
    ExecutionScope, Interruption, Pipeline, PipelineError, PipelineResult, Provenance,
    TransferDescriptor, TransferReport,
};
use squash_store::ObjectLocation;
use squash_telemetry::{Metrics, job_span};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::failure::{FailureHandler, JobFailure};
use crate::job::Job;

/// How a compress-then-delete run ended successfully.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Compressed and deleted the source.
    Completed(TransferReport),
    /// Found this source's output from an earlier run and only deleted the source.
    Resumed,
}

/// Compress the source, then delete it.
///
/// A destination carrying this source's provenance marker means an earlier
/// run committed but never deleted; the deletion is completed instead of
/// failing.
///
/// # Errors
///
/// Returns the first [`PipelineError`] from either step.
pub async fn compress_then_delete(
    pipeline: &Pipeline,
    descriptor: &TransferDescriptor,
    scope: &ExecutionScope,
    worker: &str,
) -> PipelineResult<JobOutcome> {
    match pipeline.transfer(descriptor, scope, worker).await {
        Ok(report) => {
            pipeline.delete_source(descriptor, scope, worker).await?;
            Ok(JobOutcome::Completed(report))
        }
        Err(PipelineError::DestinationAlreadyExists {
            location,
            provenance: Provenance::PriorRun,
        }) => {
            info!(
                worker,
                destination = %location,
                "destination written by an earlier run; completing source deletion"
            );
            pipeline.delete_source(descriptor, scope, worker).await?;
            Ok(JobOutcome::Resumed)
        }
        Err(err) => Err(err),
    }
}

/// Settings every job shares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Bucket holding uncompressed objects.
    pub source_bucket: String,
    /// Bucket receiving compressed objects.
    pub destination_bucket: String,
    /// Compression intensity.
    pub compression: CompressionLevel,
    /// Wall-clock bound for one job.
    pub job_timeout: Duration,
}

impl WorkerSettings {
    /// Resolve the transfer for one object; the destination keeps the name.
    #[must_use]
    pub fn descriptor_for(&self, object: &str) -> TransferDescriptor {
        TransferDescriptor::new(
            ObjectLocation::new(self.source_bucket.clone(), object),
            ObjectLocation::new(self.destination_bucket.clone(), object),
            self.compression,
        )
    }
}

struct WorkerShared {
    pipeline: Pipeline,
    settings: WorkerSettings,
    failures: FailureHandler,
    pool: CancellationToken,
    root: CancellationToken,
    metrics: Metrics,
    jobs: Mutex<mpsc::Receiver<Job>>,
}

/// Pool of workers sharing one job queue.
pub struct WorkerPool {
    pipeline: Pipeline,
    settings: WorkerSettings,
    failures: FailureHandler,
    pool: CancellationToken,
    root: CancellationToken,
    metrics: Metrics,
}

/// Running workers.
pub struct WorkerPoolHandle {
    tasks: JoinSet<()>,
}

impl WorkerPoolHandle {
    /// Wait for every worker to exit.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Task`] if a worker panicked.
    pub async fn join(mut self) -> AppResult<()> {
        while let Some(joined) = self.tasks.join_next().await {
            joined.map_err(|err| AppError::task("worker", err))?;
        }
        Ok(())
    }
}

impl WorkerPool {
    /// Build a pool. `pool` is the worker scope; `root` outlives it.
    #[must_use]
    pub const fn new(
        pipeline: Pipeline,
        settings: WorkerSettings,
        failures: FailureHandler,
        pool: CancellationToken,
        root: CancellationToken,
        metrics: Metrics,
    ) -> Self {
        Self {
            pipeline,
            settings,
            failures,
            pool,
            root,
            metrics,
        }
    }

    /// Spawn `pool_size` workers consuming `jobs` until it closes.
    #[must_use]
    pub fn start(self, pool_size: NonZeroUsize, jobs: mpsc::Receiver<Job>) -> WorkerPoolHandle {
        let shared = Arc::new(WorkerShared {
            pipeline: self.pipeline,
            settings: self.settings,
            failures: self.failures,
            pool: self.pool,
            root: self.root,
            metrics: self.metrics,
            jobs: Mutex::new(jobs),
        });
        let mut tasks = JoinSet::new();
        for index in 1..=pool_size.get() {
            let name = format!("[worker-{index}]");
            tasks.spawn(run_worker(name, Arc::clone(&shared)));
        }
        info!(workers = pool_size.get(), "worker pool started");
        WorkerPoolHandle { tasks }
    }
}

async fn next_job(shared: &WorkerShared) -> Option<Job> {
    let mut jobs = shared.jobs.lock().await;
    let job = jobs.recv().await;
    shared.metrics.set_queue_depth(jobs.len());
    job
}

async fn run_worker(name: String, shared: Arc<WorkerShared>) {
    debug!(worker = %name, "worker started");
    loop {
        let job = tokio::select! {
            biased;
            () = shared.root.cancelled() => {
                release_queued(&name, &shared).await;
                break;
            }
            job = next_job(&shared) => job,
        };
        let Some(job) = job else {
            break;
        };
        let job = job.assign_worker(&name);
        let span = job_span(&name, job.object_name());

        if shared.pool.is_cancelled() {
            shared
                .failures
                .handle_failure(&job, &JobFailure::NotStarted(Interruption::Shutdown))
                .instrument(span)
                .await;
            continue;
        }
        execute(&shared, &job).instrument(span).await;
    }
    debug!(worker = %name, "worker stopped");
}

/// Close the queue and hand every job still in it to the failure handler.
///
/// `recv` keeps returning buffered jobs after `close` and only yields `None`
/// once outstanding send permits are released, so nothing acked is dropped.
async fn release_queued(name: &str, shared: &WorkerShared) {
    let mut jobs = shared.jobs.lock().await;
    jobs.close();
    while let Some(job) = jobs.recv().await {
        let job = job.assign_worker(name);
        let span = job_span(name, job.object_name());
        shared
            .failures
            .handle_failure(&job, &JobFailure::NotStarted(Interruption::Shutdown))
            .instrument(span)
            .await;
    }
    shared.metrics.set_queue_depth(0);
}

async fn execute(shared: &WorkerShared, job: &Job) {
    let worker = job.worker_name();
    let descriptor = shared.settings.descriptor_for(job.object_name());
    let token = shared.pool.child_token();
    let _job_guard = token.clone().drop_guard();
    let scope = ExecutionScope::with_timeout(token, shared.settings.job_timeout);

    shared.metrics.job_started();
    let outcome = compress_then_delete(&shared.pipeline, &descriptor, &scope, worker).await;
    shared.metrics.job_finished();

    match outcome {
        Ok(JobOutcome::Completed(report)) => {
            shared.metrics.inc_job("completed");
            shared
                .metrics
                .add_transfer_bytes(report.bytes_processed, report.destination_size);
            info!(worker, object = job.object_name(), "job completed");
        }
        Ok(JobOutcome::Resumed) => {
            shared.metrics.inc_job("resumed");
            info!(worker, object = job.object_name(), "job resumed");
        }
        Err(err) => {
            shared.metrics.inc_job("failed");
            shared.metrics.inc_pipeline_failure(err.kind());
            if matches!(err.interruption(), Some(Interruption::DeadlineExceeded)) {
                warn!(
                    worker,
                    object = job.object_name(),
                    timeout_secs = shared.settings.job_timeout.as_secs(),
                    "job exceeded its deadline"
                );
            }
            shared
                .failures
                .handle_failure(job, &JobFailure::from(err))
                .await;
        }
    }
}
