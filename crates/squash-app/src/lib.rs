#![forbid(unsafe_code)]
#![warn(
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Squash compression relay.
//!
//! Layout: `dispatcher.rs` (notification filtering and enqueue), `worker.rs`
//! (bounded worker pool), `failure.rs` (failure logging and redelivery),
//! `shutdown.rs` (scope tree and drain sequencing), `app.rs` (wiring for both
//! entry modes), `bootstrap.rs`/`cli.rs`/`http.rs` (process surface).

/// Application wiring for direct and event-driven modes.
pub mod app;
/// Process bootstrap for the binary.
pub mod bootstrap;
/// Command-line flags.
pub mod cli;
/// Notification filtering and job enqueueing.
pub mod dispatcher;
/// Application error type.
pub mod error;
/// Failure handling and redelivery.
pub mod failure;
/// Health and metrics endpoints.
pub mod http;
/// Job model.
pub mod job;
/// Shutdown coordination.
pub mod shutdown;
/// Worker pool.
pub mod worker;

pub use app::{Application, DIRECT_WORKER, RunSummary};
pub use bootstrap::run_app;
pub use dispatcher::{DispatchSummary, Dispatcher, NotificationFilter, Rejection};
pub use error::{AppError, AppResult};
pub use failure::{FailureHandler, FailureOutcome, JobFailure, PublishFailed};
pub use job::Job;
pub use shutdown::{ScopeTree, ShutdownCoordinator, ShutdownSignal, ShutdownState};
pub use worker::{JobOutcome, WorkerPool, WorkerPoolHandle, WorkerSettings, compress_then_delete};
