//! Conversion from raw settings into a validated [`RunConfig`].

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{
    CompressionLevel, DEFAULT_GRACE_PERIOD, DEFAULT_JOB_TIMEOUT, DEFAULT_PROJECT_ID,
    DEFAULT_REPUBLISH_TIMEOUT, DEFAULT_TEMP_MARKER, RawSettings, RunConfig, RunMode, Tunables,
    default_worker_count,
};

impl RunConfig {
    /// Validate raw settings and derive the run mode.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] describing the first rule the settings violate.
    pub fn from_raw(raw: RawSettings) -> ConfigResult<Self> {
        let compression = CompressionLevel::from_flag(raw.compression_level)?;
        let source_bucket = required("source_bucket", Some(raw.source_bucket))?;
        let destination_bucket = required("destination_bucket", Some(raw.destination_bucket))?;

        let source_object = present(raw.source_object);
        let subscription = non_blank(raw.subscription);
        let mode = match (source_object, subscription) {
            (Some(_), Some(_)) | (None, None) => {
                return Err(ConfigError::Conflict {
                    first: "source_object",
                    second: "subscription",
                    reason: "exactly_one_required",
                });
            }
            (Some(source_object), None) => {
                let destination_object =
                    present(raw.destination_object).unwrap_or_else(|| source_object.clone());
                if source_bucket == destination_bucket && source_object == destination_object {
                    return Err(ConfigError::Conflict {
                        first: "destination_object",
                        second: "source_object",
                        reason: "same_bucket_requires_distinct_names",
                    });
                }
                RunMode::Direct {
                    source_object,
                    destination_object,
                }
            }
            (None, Some(subscription)) => {
                if source_bucket == destination_bucket {
                    return Err(ConfigError::Conflict {
                        first: "subscription",
                        second: "destination_bucket",
                        reason: "same_bucket_unsupported_for_notifications",
                    });
                }
                let topic = non_blank(raw.topic).ok_or(ConfigError::MissingField { field: "topic" })?;
                RunMode::EventDriven {
                    subscription,
                    topic,
                }
            }
        };

        let tunables = Tunables {
            job_timeout: positive("job_timeout", raw.job_timeout, DEFAULT_JOB_TIMEOUT)?,
            grace_period: raw.grace_period.unwrap_or(DEFAULT_GRACE_PERIOD),
            republish_timeout: positive(
                "republish_timeout",
                raw.republish_timeout,
                DEFAULT_REPUBLISH_TIMEOUT,
            )?,
            workers: raw
                .workers
                .and_then(NonZeroUsize::new)
                .unwrap_or_else(default_worker_count),
            temp_marker: non_blank(raw.temp_marker)
                .unwrap_or_else(|| DEFAULT_TEMP_MARKER.to_string()),
        };

        Ok(Self {
            compression,
            source_bucket,
            destination_bucket,
            project_id: non_blank(raw.project_id)
                .unwrap_or_else(|| DEFAULT_PROJECT_ID.to_string()),
            mode,
            tunables,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Object names are kept verbatim; surrounding whitespace is part of the name.
fn present(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn required(field: &'static str, value: Option<String>) -> ConfigResult<String> {
    non_blank(value).ok_or(ConfigError::MissingField { field })
}

fn positive(
    field: &'static str,
    value: Option<Duration>,
    default: Duration,
) -> ConfigResult<Duration> {
    match value {
        None => Ok(default),
        Some(duration) if duration.is_zero() => Err(ConfigError::InvalidField {
            field,
            reason: "must_be_positive",
            value: Some(format!("{duration:?}")),
        }),
        Some(duration) => Ok(duration),
    }
}
