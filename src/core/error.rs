//! Error taxonomy and wire code mapping.
//!
//! The protocol engines distinguish three kinds of outcome: success, the
//! `Forward` control signal ("not authoritative here, retry one hop closer to
//! the root"), and real errors. `Forward` is deliberately *not* an error
//! variant; local attempts return `Result<ClassOutcome, IvError>` so that the
//! control signal can never leak to a caller.
//!
//! Replies and broadcast aggregation carry [`ErrorCode`], a compact wire enum
//! with a bidirectional mapping to [`IvError`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the incast variable layer.
///
/// Transport-origin conditions (timeout, unreachable, canceled) are passed
/// through verbatim from the collaborating RPC/bulk layers.
#[derive(Debug, Clone, Error)]
pub enum IvError {
    /// Bad namespace, class, key, or a forward attempted from the root rank.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Allocation failure reported by a value class.
    #[error("out of memory")]
    OutOfMemory,

    /// Namespace or class lookup miss, or a key absent at its root.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// Remote operation timed out (transport-origin).
    #[error("operation timed out")]
    Timeout,

    /// Destination rank unreachable (transport-origin).
    #[error("destination unreachable")]
    Unreachable,

    /// Operation canceled by the transport (transport-origin).
    #[error("operation canceled")]
    Canceled,

    /// A bulk transfer backing a fetch or update failed mid-flight.
    #[error("bulk transfer failed: {message}")]
    TransferFailed { message: String },
}

impl IvError {
    /// Create an InvalidArgument error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a NotFound error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create a TransferFailed error.
    pub fn transfer(message: impl Into<String>) -> Self {
        Self::TransferFailed {
            message: message.into(),
        }
    }

    /// The wire code delivered to remote peers for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Self::OutOfMemory => ErrorCode::OutOfMemory,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Timeout => ErrorCode::Timeout,
            Self::Unreachable => ErrorCode::Unreachable,
            Self::Canceled => ErrorCode::Canceled,
            Self::TransferFailed { .. } => ErrorCode::TransferFailed,
        }
    }
}

/// Result type using IvError.
pub type IvResult<T> = Result<T, IvError>;

/// Compact result code carried in replies and sync broadcasts.
///
/// `Ok` is the success code; the collective broadcast aggregation rule keeps
/// the first non-`Ok` code observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Ok,
    InvalidArgument,
    OutOfMemory,
    NotFound,
    Timeout,
    Unreachable,
    Canceled,
    TransferFailed,
}

impl ErrorCode {
    /// True for the success code.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Convert a local result into a wire code.
    pub fn from_result<T>(result: &IvResult<T>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(e) => e.code(),
        }
    }

    /// Convert a wire code back into a local result.
    ///
    /// The textual detail of the remote error does not travel on the wire;
    /// reconstructed errors carry a generic message.
    pub fn into_result(self) -> IvResult<()> {
        match self {
            Self::Ok => Ok(()),
            Self::InvalidArgument => Err(IvError::invalid("reported by remote")),
            Self::OutOfMemory => Err(IvError::OutOfMemory),
            Self::NotFound => Err(IvError::not_found("reported by remote")),
            Self::Timeout => Err(IvError::Timeout),
            Self::Unreachable => Err(IvError::Unreachable),
            Self::Canceled => Err(IvError::Canceled),
            Self::TransferFailed => Err(IvError::transfer("reported by remote")),
        }
    }

    /// Aggregation rule for collective broadcast replies: keep the first
    /// non-Ok code observed, default to Ok.
    pub fn merge(self, other: ErrorCode) -> ErrorCode {
        if self.is_ok() {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ok => "Ok",
            Self::InvalidArgument => "InvalidArgument",
            Self::OutOfMemory => "OutOfMemory",
            Self::NotFound => "NotFound",
            Self::Timeout => "Timeout",
            Self::Unreachable => "Unreachable",
            Self::Canceled => "Canceled",
            Self::TransferFailed => "TransferFailed",
        };
        write!(f, "{}", s)
    }
}
