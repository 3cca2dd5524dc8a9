//! # Design
//!
//! - Constant error messages; the offending field and value travel as context.
//! - Validation reasons are machine-readable static strings so tests can match on them.

use thiserror::Error;

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while turning raw settings into a [`crate::RunConfig`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required setting was absent or blank.
    #[error("missing required setting")]
    MissingField {
        /// Name of the missing setting.
        field: &'static str,
    },
    /// A setting held a value outside its accepted range.
    #[error("invalid setting")]
    InvalidField {
        /// Name of the offending setting.
        field: &'static str,
        /// Machine-readable reason for the rejection.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// Two settings cannot be combined.
    #[error("conflicting settings")]
    Conflict {
        /// First setting involved in the conflict.
        first: &'static str,
        /// Second setting involved in the conflict.
        second: &'static str,
        /// Machine-readable reason for the rejection.
        reason: &'static str,
    },
}

impl ConfigError {
    /// Setting name primarily responsible for the error.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::MissingField { field } | Self::InvalidField { field, .. } => field,
            Self::Conflict { first, .. } => first,
        }
    }

    /// Render the error with its context for operator-facing output.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::MissingField { field } => format!("{self}: {field} is required"),
            Self::InvalidField {
                field,
                reason,
                value,
            } => value.as_ref().map_or_else(
                || format!("{self}: {field} ({reason})"),
                |value| format!("{self}: {field}={value} ({reason})"),
            ),
            Self::Conflict {
                first,
                second,
                reason,
            } => format!("{self}: {first} / {second} ({reason})"),
        }
    }
}
