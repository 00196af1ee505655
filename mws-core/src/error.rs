use std::fmt::Display;
use std::path::Path;
use thiserror::Error;

/// Error type shared by every multiworkspace crate.
///
/// Payloads are plain strings so an error can be recorded once and handed to
/// several completion callbacks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MwsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Filesystem error: {0}")]
    Filesystem(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Instance {0} does not exist")]
    InstanceMissing(String),

    #[error("Resolution error: {0}")]
    Resolution(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MwsError {
    /// Filesystem failure annotated with the path and the operation that failed.
    pub fn filesystem(err: impl Display, path: impl AsRef<Path>, operation: &str) -> Self {
        MwsError::Filesystem(format!(
            "{} {}: {}",
            operation,
            path.as_ref().display(),
            err
        ))
    }

    pub fn executor(message: impl Into<String>) -> Self {
        MwsError::Executor(message.into())
    }

    pub fn is_instance_missing(&self) -> bool {
        matches!(self, MwsError::InstanceMissing(_))
    }
}

impl From<std::io::Error> for MwsError {
    fn from(err: std::io::Error) -> Self {
        MwsError::Filesystem(err.to_string())
    }
}

impl From<serde_json::Error> for MwsError {
    fn from(err: serde_json::Error) -> Self {
        MwsError::Serialization(err.to_string())
    }
}

impl From<serde_yaml_ng::Error> for MwsError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        MwsError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MwsError>;
