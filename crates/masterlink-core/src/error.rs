//! Configuration error types.

use thiserror::Error;

/// Result type alias for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors found while validating a relay configuration.
///
/// These are startup errors; the daemon treats every one as fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid duration for `{key}`: {value:?}")]
    InvalidDuration { key: &'static str, value: String },

    #[error("master name is required (set `master` in the config or pass --master)")]
    MissingMaster,

    #[error("invalid address for `{key}`: {value:?}")]
    InvalidAddress { key: &'static str, value: String },

    #[error("`{0}` must allow at least one attempt")]
    ZeroAttempts(&'static str),
}
