//! Binding Engine Error Hierarchy
//!
//! Errors are split by how the watch loop reacts to them: per-event failures
//! (decode, delete, diff shape) are contained inside `apply`, while store and
//! connection failures terminate the affected binding's loop.

use std::time::Duration;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Store connection could not be established or was lost
    #[error("Store connection error: {0}")]
    Connection(String),

    /// Store answered but refused to serve the request
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Snapshot read or connection attempt exceeded its deadline
    #[error("Store request timed out after {0:?}")]
    Timeout(Duration),

    /// Watch start revision is older than the store's retained history
    #[error("Revision {requested} is compacted, oldest retained is {oldest}")]
    Compacted { requested: u64, oldest: u64 },

    /// A decode handler could not interpret a stored value
    #[error("Failed to decode value of {key}: {message}")]
    Decode { key: String, message: String },

    /// A watched key, or an entry under a watched prefix, was deleted
    #[error("Key is deleted: {key}")]
    DeletedKey { key: String },

    /// Old and new values of a diff have incompatible shapes
    #[error("Incompatible shapes at {path}: {message}")]
    DiffShape { path: String, message: String },

    /// Malformed dotted/indexed field path
    #[error("Invalid field path {path:?}: {message}")]
    InvalidPath { path: String, message: String },

    /// Caller misuse detected at bind time
    #[error("Invalid binding: {0}")]
    InvalidBinding(String),

    /// Settings failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Layered configuration loading failures
    #[error("Configuration load failed: {0}")]
    Config(String),

    /// Malformed store location
    #[error("Invalid store url {url}: {message}")]
    InvalidUrl { url: String, message: String },

    /// Unrecoverable handler failure, stops the binding's loop
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Error {
    /// Whether the watch loop must stop after observing this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Connection(_)
                | Error::StoreUnavailable(_)
                | Error::Compacted { .. }
                | Error::Timeout(_)
                | Error::Fatal(_)
        )
    }

    pub(crate) fn decode(
        key: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Error::Decode {
            key: key.into(),
            message: message.to_string(),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}
