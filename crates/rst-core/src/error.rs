//! Error and status types shared by every adapter.

use std::fmt;

use thiserror::Error;

use crate::protocol::header::HeaderError;
use crate::transport::TransportError;

/// Failure of an RST firmware or passthrough operation.
#[derive(Error, Debug)]
pub enum RstError {
    #[error("Bad parameter: {0}")]
    BadParameter(String),

    #[error("Failed to allocate {size} byte request buffer")]
    MemoryFailure { size: usize },

    #[error("Passthrough could not be issued: {0}")]
    PassthroughFailure(#[from] TransportError),

    #[error("Device reported failure (os error {os_error})")]
    Failure { os_error: u32 },

    #[error("Command not available through RST: {0}")]
    CommandNotAvailable(String),
}

impl RstError {
    pub(crate) fn bad_parameter(msg: impl Into<String>) -> Self {
        Self::BadParameter(msg.into())
    }

    pub(crate) fn not_available(msg: impl Into<String>) -> Self {
        Self::CommandNotAvailable(msg.into())
    }

    /// Coarse status code for callers that only deal in status values.
    pub fn status(&self) -> Status {
        match self {
            RstError::BadParameter(_) => Status::BadParameter,
            RstError::MemoryFailure { .. } => Status::MemoryFailure,
            RstError::PassthroughFailure(_) => Status::PassthroughFailure,
            RstError::Failure { .. } => Status::Failure,
            RstError::CommandNotAvailable(_) => Status::CommandNotAvailable,
        }
    }
}

impl From<HeaderError> for RstError {
    fn from(e: HeaderError) -> Self {
        RstError::BadParameter(e.to_string())
    }
}

/// Status values returned to the generic passthrough layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status {
    Success,
    Failure,
    BadParameter,
    MemoryFailure,
    PassthroughFailure,
    CommandNotAvailable,
}

impl Status {
    pub fn from_result<T>(result: &Result<T, RstError>) -> Self {
        match result {
            Ok(_) => Status::Success,
            Err(e) => e.status(),
        }
    }

    pub fn is_success(&self) -> bool {
        *self == Status::Success
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success => write!(f, "SUCCESS"),
            Status::Failure => write!(f, "FAILURE"),
            Status::BadParameter => write!(f, "BAD_PARAMETER"),
            Status::MemoryFailure => write!(f, "MEMORY_FAILURE"),
            Status::PassthroughFailure => write!(f, "OS_PASSTHROUGH_FAILURE"),
            Status::CommandNotAvailable => write!(f, "OS_COMMAND_NOT_AVAILABLE"),
        }
    }
}
