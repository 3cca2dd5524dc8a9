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

//! Binary entrypoint for the squash compression relay.

use squash_app::{AppResult, run_app};

/// Runs the relay in the configured mode; a non-zero exit reports the error.
#[tokio::main]
async fn main() -> AppResult<()> {
    run_app().await
}
