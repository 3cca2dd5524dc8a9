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

//! Object store collaborator for the squash relay.
//!
//! The relay only needs four primitives from an object store: streamed reads,
//! attribute lookups, streamed writes that become visible on commit, and
//! deletes. [`ObjectStore`] captures exactly that surface so the transfer
//! pipeline can run against the in-memory backend in tests and the
//! filesystem backend in production.

pub mod error;
pub mod fs;
pub mod memory;
pub mod model;
pub mod service;

pub use error::{StoreError, StoreResult};
pub use fs::FsObjectStore;
pub use memory::{JournalEntry, MemoryObjectStore};
pub use model::{ObjectAttrs, ObjectLocation, StoreOperation, WriteOptions};
pub use service::{ObjectReader, ObjectStore, ObjectWriter};
