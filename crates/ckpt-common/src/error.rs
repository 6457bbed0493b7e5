//! Error types for checkpoint and config conversion

use thiserror::Error;

/// Errors raised while converting a checkpoint or config record.
///
/// Every variant is fatal for the conversion call that produced it; the
/// engine never retries and never hands back a partially built target.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("shape mismatch at '{key}': got {actual:?}, {expected}")]
    ShapeMismatch { key: String, actual: Vec<usize>, expected: String },

    #[error("unsupported layout at '{key}': {reason}")]
    UnsupportedLayout { key: String, reason: String },

    #[error("missing required key '{key}': {reason}")]
    MissingRequiredKey { key: String, reason: String },

    #[error("{} source key(s) matched no conversion rule: {}", keys.len(), keys.join(", "))]
    UnmatchedKey { keys: Vec<String> },

    #[error("config conversion error: {0}")]
    ConfigConversion(String),

    #[error("ambiguous rules for '{key}': matched both `{first}` and `{second}`")]
    AmbiguousRule { key: String, first: String, second: String },

    #[error("invalid rule for '{key}': {reason}")]
    InvalidRule { key: String, reason: String },

    #[error("type mismatch at '{key}': expected {expected}, found {found}")]
    TypeMismatch { key: String, expected: &'static str, found: &'static str },

    #[error(transparent)]
    Tensor(#[from] candle_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl ConversionError {
    pub fn config(reason: impl Into<String>) -> Self {
        Self::ConfigConversion(reason.into())
    }

    pub fn missing(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MissingRequiredKey { key: key.into(), reason: reason.into() }
    }

    pub fn unsupported(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedLayout { key: key.into(), reason: reason.into() }
    }

    pub fn invalid_rule(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRule { key: key.into(), reason: reason.into() }
    }

    /// True for the config-level errors that must abort before tensor work.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigConversion(_))
    }
}

/// Result type used across the conversion crates
pub type Result<T> = std::result::Result<T, ConversionError>;
