//! Typed configuration models and defaults.
//!
//! # Design
//! - Pure data carriers; all cross-field checks live in `validate.rs`.
//! - `RawSettings` mirrors the command line one-to-one so the CLI layer stays thin.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Wall-clock bound for a single compress-then-delete job.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(60 * 60);
/// Time between cancelling the workers and cancelling everything else.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(7);
/// Deadline for republishing an interrupted notification.
pub const DEFAULT_REPUBLISH_TIMEOUT: Duration = Duration::from_secs(5);
/// Object names containing this marker are transient artifacts and never compressed.
pub const DEFAULT_TEMP_MARKER: &str = "dax-tmp";
/// Project used when none is configured.
pub const DEFAULT_PROJECT_ID: &str = "default";

/// Deflate intensity applied to the destination stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum CompressionLevel {
    /// Backend default (level 6 for deflate).
    #[default]
    Default,
    /// Explicit level between 0 (store only) and 9 (best compression).
    Level(u8),
}

impl CompressionLevel {
    /// Store blocks without compressing them.
    pub const NONE: Self = Self::Level(0);
    /// Fastest compression.
    pub const BEST_SPEED: Self = Self::Level(1);
    /// Smallest output.
    pub const BEST_COMPRESSION: Self = Self::Level(9);

    const DEFAULT_FLAG: i32 = -1;
    const HUFFMAN_ONLY_FLAG: i32 = -2;
    const DEFLATE_DEFAULT: u32 = 6;

    /// Parse the integer form used on the command line.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] for values outside `-1..=9`.
    pub fn from_flag(value: i32) -> Result<Self, ConfigError> {
        match value {
            Self::DEFAULT_FLAG => Ok(Self::Default),
            Self::HUFFMAN_ONLY_FLAG => Err(ConfigError::InvalidField {
                field: "compression_level",
                reason: "huffman_only_unsupported",
                value: Some(value.to_string()),
            }),
            0..=9 => u8::try_from(value)
                .map(Self::Level)
                .map_err(|_| ConfigError::InvalidField {
                    field: "compression_level",
                    reason: "out_of_range",
                    value: Some(value.to_string()),
                }),
            _ => Err(ConfigError::InvalidField {
                field: "compression_level",
                reason: "out_of_range",
                value: Some(value.to_string()),
            }),
        }
    }

    /// Integer form used on the command line.
    #[must_use]
    pub const fn as_flag(self) -> i32 {
        match self {
            Self::Default => Self::DEFAULT_FLAG,
            Self::Level(level) => level as i32,
        }
    }

    /// Level handed to the deflate encoder.
    #[must_use]
    pub const fn deflate_level(self) -> u32 {
        match self {
            Self::Default => Self::DEFLATE_DEFAULT,
            Self::Level(level) => level as u32,
        }
    }
}

impl TryFrom<i32> for CompressionLevel {
    type Error = ConfigError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::from_flag(value)
    }
}

impl From<CompressionLevel> for i32 {
    fn from(level: CompressionLevel) -> Self {
        level.as_flag()
    }
}

/// Unvalidated settings as provided by the command line or environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawSettings {
    /// Compression intensity flag (`-1` default, `0..=9`).
    pub compression_level: i32,
    /// Bucket to read uncompressed objects from.
    pub source_bucket: String,
    /// Bucket to write compressed objects to.
    pub destination_bucket: String,
    /// Single object to compress (direct mode).
    pub source_object: Option<String>,
    /// Destination object name for direct mode; defaults to the source name.
    pub destination_object: Option<String>,
    /// Subscription delivering storage notifications (event-driven mode).
    pub subscription: Option<String>,
    /// Topic used to republish interrupted notifications.
    pub topic: Option<String>,
    /// Project that owns the subscription and topic.
    pub project_id: Option<String>,
    /// Substring marking transient objects that must be ignored.
    pub temp_marker: Option<String>,
    /// Worker count override; measured parallelism is used otherwise.
    pub workers: Option<usize>,
    /// Per-job timeout override.
    pub job_timeout: Option<Duration>,
    /// Drain grace period override.
    pub grace_period: Option<Duration>,
    /// Republish deadline override.
    pub republish_timeout: Option<Duration>,
}

/// Entry mode selected by the settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// Compress one named object and exit.
    Direct {
        /// Object read from the source bucket.
        source_object: String,
        /// Object written to the destination bucket.
        destination_object: String,
    },
    /// Consume storage notifications until shut down.
    EventDriven {
        /// Subscription delivering notifications.
        subscription: String,
        /// Recovery topic for interrupted jobs.
        topic: String,
    },
}

impl RunMode {
    /// Short label recorded on the application span.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Direct { .. } => "direct",
            Self::EventDriven { .. } => "event_driven",
        }
    }
}

/// Timing and sizing knobs for the event-driven engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tunables {
    /// Deadline applied to each job.
    pub job_timeout: Duration,
    /// Delay between worker cancellation and root cancellation.
    pub grace_period: Duration,
    /// Deadline for a single republish attempt.
    pub republish_timeout: Duration,
    /// Number of concurrent workers; also the job queue capacity.
    pub workers: NonZeroUsize,
    /// Substring marking transient objects.
    pub temp_marker: String,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            job_timeout: DEFAULT_JOB_TIMEOUT,
            grace_period: DEFAULT_GRACE_PERIOD,
            republish_timeout: DEFAULT_REPUBLISH_TIMEOUT,
            workers: default_worker_count(),
            temp_marker: DEFAULT_TEMP_MARKER.to_string(),
        }
    }
}

/// Validated configuration consumed by the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Compression intensity for every transfer.
    pub compression: CompressionLevel,
    /// Bucket holding uncompressed objects.
    pub source_bucket: String,
    /// Bucket receiving compressed objects.
    pub destination_bucket: String,
    /// Project owning the messaging resources.
    pub project_id: String,
    /// Selected entry mode.
    pub mode: RunMode,
    /// Engine tunables.
    pub tunables: Tunables,
}

/// Available compute units minus one, floored at one.
#[must_use]
pub fn default_worker_count() -> NonZeroUsize {
    let measured = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
    NonZeroUsize::new(measured.saturating_sub(1)).unwrap_or(NonZeroUsize::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_level_parses_flag_range() {
        assert_eq!(CompressionLevel::from_flag(-1), Ok(CompressionLevel::Default));
        assert_eq!(CompressionLevel::from_flag(0), Ok(CompressionLevel::NONE));
        assert_eq!(CompressionLevel::from_flag(1), Ok(CompressionLevel::BEST_SPEED));
        assert_eq!(
            CompressionLevel::from_flag(9),
            Ok(CompressionLevel::BEST_COMPRESSION)
        );
        assert!(matches!(
            CompressionLevel::from_flag(-2),
            Err(ConfigError::InvalidField {
                reason: "huffman_only_unsupported",
                ..
            })
        ));
        assert!(matches!(
            CompressionLevel::from_flag(10),
            Err(ConfigError::InvalidField {
                reason: "out_of_range",
                ..
            })
        ));
    }

    #[test]
    fn compression_level_maps_to_deflate() {
        assert_eq!(CompressionLevel::Default.deflate_level(), 6);
        assert_eq!(CompressionLevel::BEST_SPEED.deflate_level(), 1);
        assert_eq!(CompressionLevel::Default.as_flag(), -1);
        assert_eq!(CompressionLevel::BEST_COMPRESSION.as_flag(), 9);
    }

    #[test]
    fn compression_level_serde_uses_flag_form() -> Result<(), serde_json::Error> {
        let encoded = serde_json::to_string(&CompressionLevel::BEST_SPEED)?;
        assert_eq!(encoded, "1");
        let decoded: CompressionLevel = serde_json::from_str("-1")?;
        assert_eq!(decoded, CompressionLevel::Default);
        assert!(serde_json::from_str::<CompressionLevel>("42").is_err());
        Ok(())
    }

    #[test]
    fn default_worker_count_is_at_least_one() {
        assert!(default_worker_count().get() >= 1);
        assert_eq!(Tunables::default().temp_marker, DEFAULT_TEMP_MARKER);
    }
}
