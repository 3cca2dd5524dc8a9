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

//! Run configuration for the squash compression relay.
//!
//! Layout: `model.rs` (typed settings and defaults), `validate.rs` (raw to
//! typed conversion and cross-field rules), `error.rs` (`ConfigError`).

pub mod error;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use model::{
    CompressionLevel, DEFAULT_GRACE_PERIOD, DEFAULT_JOB_TIMEOUT, DEFAULT_PROJECT_ID,
    DEFAULT_REPUBLISH_TIMEOUT, DEFAULT_TEMP_MARKER, RawSettings, RunConfig, RunMode, Tunables,
    default_worker_count,
};
