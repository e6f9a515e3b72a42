use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::network::codec::CodecError;

/// This enum contains all error messages this library can return. Most API functions will generally return a [`Result<(), NetplayError>`].
///
/// Transport I/O problems during a running session are never returned as errors; they are
/// reported as [`TransportEvent`]s instead.
///
/// [`Result<(), NetplayError>`]: std::result::Result
/// [`TransportEvent`]: crate::TransportEvent
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum NetplayError {
    /// You made an invalid request, usually by using wrong parameters for function calls.
    InvalidRequest {
        /// Further specifies why the request was invalid.
        info: String,
    },
    /// The transport has no socket. Either `configure` failed (an `RxFailed` event was raised)
    /// or it was never called.
    NotConfigured,
    /// The transport worker is already running.
    AlreadyStarted,
    /// Serialization or deserialization of data failed.
    SerializationError {
        /// A description of what failed to serialize/deserialize.
        context: String,
    },
    /// An internal error occurred that should not happen under normal operation.
    /// If you encounter this error, please report it as a bug.
    InternalError {
        /// A description of the internal error.
        context: String,
    },
}

impl Display for NetplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetplayError::InvalidRequest { info } => {
                write!(f, "Invalid Request: {}", info)
            },
            NetplayError::NotConfigured => {
                write!(
                    f,
                    "The transport has no socket; configure it before starting the worker."
                )
            },
            NetplayError::AlreadyStarted => {
                write!(f, "The transport worker is already running.")
            },
            NetplayError::SerializationError { context } => {
                write!(f, "Serialization error: {}", context)
            },
            NetplayError::InternalError { context } => {
                write!(f, "Internal error (please report as bug): {}", context)
            },
        }
    }
}

impl Error for NetplayError {}

impl From<CodecError> for NetplayError {
    fn from(err: CodecError) -> Self {
        NetplayError::SerializationError {
            context: err.to_string(),
        }
    }
}
