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

//! Object transfer pipeline.
//!
//! [`Pipeline::transfer`] streams one source object through a gzip encoder into
//! one destination object, refusing to overwrite an existing destination, and
//! [`Pipeline::delete_source`] removes the source afterwards. Every store call
//! runs under an [`ExecutionScope`] so a shutdown or a job deadline interrupts
//! the copy promptly and is reported as such.

pub mod error;
pub mod scope;
pub mod transfer;

pub use error::{FailureCause, PipelineError, PipelineResult, Provenance};
pub use scope::{ExecutionScope, Interruption};
pub use transfer::{
    CONTENT_ENCODING, Pipeline, SOURCE_GENERATION_KEY, SOURCE_MARKER_KEY, TransferDescriptor,
    TransferReport,
};
