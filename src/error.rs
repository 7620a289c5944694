//! Error types for chatrelay.

use thiserror::Error;

/// Common error type for chatrelay.
///
/// Faults raised while a message is in flight (handler, renderer and
/// delivery failures) have their own types in the `chat` module and are
/// never surfaced through this enum.
#[derive(Error, Debug)]
pub enum RelayError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed or is semantically invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Two channels were registered with the same id.
    #[error("duplicate channel id: {0}")]
    DuplicateChannel(String),

    /// Two channels were registered with the same quick prefix.
    #[error("quick prefix {prefix:?} is used by both {first} and {second}")]
    DuplicateQuickPrefix {
        /// The shared prefix.
        prefix: String,
        /// Channel that registered the prefix first.
        first: String,
        /// Channel that tried to register it again.
        second: String,
    },

    /// The configured default channel is not registered.
    #[error("default channel {0} is not registered")]
    MissingDefaultChannel(String),

    /// A channel definition is malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// The logging subscriber could not be installed.
    #[error("logging error: {0}")]
    Logging(String),
}

/// Result type alias for chatrelay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
