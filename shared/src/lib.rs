// shared/src/lib.rs

use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("connection: {0}")]
    Connection(String),
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("invalidation of tag '{tag}' failed: {reason}")]
    Invalidation { tag: String, reason: String },
    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Connection and timeout failures mean the remote tier is unreachable.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Timeout(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TtlSecs(pub u64);

impl TtlSecs {
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0)
    }
}

pub mod config;
