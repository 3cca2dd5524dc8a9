//! Command-line and environment surface of the `squash` binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use squash_config::RawSettings;

/// Compress objects from a source bucket into a destination bucket, either a
/// single named object or continuously from storage notifications.
#[derive(Debug, Clone, Parser)]
#[command(name = "squash", version, about)]
pub struct Cli {
    /// Compression intensity: -1 library default, 0 none through 9 best.
    #[arg(
        long,
        short = 'l',
        env = "SQUASH_COMPRESSION_LEVEL",
        default_value_t = -1,
        allow_negative_numbers = true
    )]
    pub compression_level: i32,

    /// Bucket holding uncompressed objects.
    #[arg(long, env = "SQUASH_SOURCE_BUCKET", default_value = "")]
    pub source_bucket: String,

    /// Bucket receiving compressed objects.
    #[arg(long, env = "SQUASH_DESTINATION_BUCKET", default_value = "")]
    pub destination_bucket: String,

    /// Compress this single object and exit.
    #[arg(long, env = "SQUASH_SOURCE_OBJECT")]
    pub source_object: Option<String>,

    /// Destination name in direct mode; defaults to the source name.
    #[arg(long, env = "SQUASH_DESTINATION_OBJECT")]
    pub destination_object: Option<String>,

    /// Subscription delivering storage notifications.
    #[arg(long, env = "SQUASH_SUBSCRIPTION")]
    pub subscription: Option<String>,

    /// Topic that receives notifications of jobs interrupted by shutdown.
    #[arg(long, env = "SQUASH_TOPIC")]
    pub topic: Option<String>,

    /// Project owning the subscription and topic.
    #[arg(long, env = "SQUASH_PROJECT_ID")]
    pub project_id: Option<String>,

    /// Object names containing this marker are ignored.
    #[arg(long, env = "SQUASH_TEMP_MARKER")]
    pub temp_marker: Option<String>,

    /// Worker count; defaults to available parallelism minus one.
    #[arg(long, env = "SQUASH_WORKERS")]
    pub workers: Option<usize>,

    /// Per-object timeout in seconds.
    #[arg(long, env = "SQUASH_JOB_TIMEOUT_SECS")]
    pub job_timeout_secs: Option<u64>,

    /// Drain period after the first shutdown signal, in seconds.
    #[arg(long, env = "SQUASH_GRACE_PERIOD_SECS")]
    pub grace_period_secs: Option<u64>,

    /// Deadline for republishing an interrupted notification, in seconds.
    #[arg(long, env = "SQUASH_REPUBLISH_TIMEOUT_SECS")]
    pub republish_timeout_secs: Option<u64>,

    /// Directory whose subdirectories are the buckets.
    #[arg(long, env = "SQUASH_STORE_ROOT", default_value = "buckets")]
    pub store_root: PathBuf,

    /// Directory holding notification spools, one subdirectory per project.
    #[arg(long, env = "SQUASH_SPOOL_ROOT", default_value = "spool")]
    pub spool_root: PathBuf,

    /// Log level used when `RUST_LOG` is unset.
    #[arg(long, env = "SQUASH_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output: `json` or `pretty`.
    #[arg(long, env = "SQUASH_LOG_FORMAT")]
    pub log_format: Option<String>,

    /// Serve `/health` and `/metrics` on this address.
    #[arg(long, env = "SQUASH_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

impl Cli {
    /// Unvalidated settings for [`squash_config::RunConfig::from_raw`].
    #[must_use]
    pub fn raw_settings(&self) -> RawSettings {
        RawSettings {
            compression_level: self.compression_level,
            source_bucket: self.source_bucket.clone(),
            destination_bucket: self.destination_bucket.clone(),
            source_object: self.source_object.clone(),
            destination_object: self.destination_object.clone(),
            subscription: self.subscription.clone(),
            topic: self.topic.clone(),
            project_id: self.project_id.clone(),
            temp_marker: self.temp_marker.clone(),
            workers: self.workers,
            job_timeout: self.job_timeout_secs.map(Duration::from_secs),
            grace_period: self.grace_period_secs.map(Duration::from_secs),
            republish_timeout: self.republish_timeout_secs.map(Duration::from_secs),
        }
    }
}
