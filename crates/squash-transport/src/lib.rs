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

//! Message transport collaborator for the squash relay.
//!
//! A transport delivers notifications from a subscription one at a time as
//! [`Delivery`] values that must be settled with `ack` or `nack`, and accepts
//! publishes onto a topic. Two backends ship with the crate: an in-memory
//! transport for tests and a spool-directory transport for single-host
//! deployments.

pub mod error;
pub mod memory;
pub mod model;
pub mod service;
pub mod spool;

pub use error::{TransportError, TransportResult};
pub use memory::{MemoryTransport, PublishedMessage};
pub use model::{Attributes, Message, MessageId};
pub use service::{AckHandle, Delivery, MessageTransport, Subscription};
pub use spool::{DEFAULT_POLL_INTERVAL, SpoolTransport};
