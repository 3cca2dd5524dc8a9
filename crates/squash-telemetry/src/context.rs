//! Span helpers for the application and per-job contexts.
//!
//! # Design
//! - An application-level span carries mode and build info for every log line.
//! - Job spans carry only correlation fields; domain data travels in the job itself.

use tracing::{Span, span::Entered};

use crate::init::build_sha;

/// Guard that keeps the application-level span entered for the lifetime of the process.
pub struct GlobalContextGuard {
    _guard: Entered<'static>,
}

impl GlobalContextGuard {
    /// Enter the application-level tracing span for the lifetime of the guard.
    #[must_use]
    pub fn new(mode: impl Into<String>) -> Self {
        let mode = mode.into();
        let span: &'static Span = Box::leak(Box::new(
            tracing::info_span!("app", mode = %mode, build_sha = %build_sha()),
        ));
        let guard = span.enter();
        Self { _guard: guard }
    }
}

/// Span wrapping one compress-then-delete job.
#[must_use]
pub fn job_span(worker: &str, object: &str) -> Span {
    tracing::info_span!("job", worker = %worker, object = %object)
}
