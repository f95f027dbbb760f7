//! IOCTL transport abstraction.
//!
//! Defines the `IoctlTransport` trait for the in/out miniport call,
//! allowing different implementations (Windows overlapped I/O, mock, etc.).

use thiserror::Error;

/// Win32 `ERROR_IO_PENDING`.
pub const ERROR_IO_PENDING: u32 = 997;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open device {path}: {message}")]
    OpenFailed { path: String, message: String },

    #[error("Failed to create completion event: {0}")]
    SyncResource(String),

    #[error("Not supported on this platform: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of issuing, or waiting on, a single device control call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// The call finished and the buffer holds the driver's response.
    Complete { bytes_returned: u32 },
    /// Overlapped call still in flight; wait on the completion handle.
    Pending,
    /// The platform rejected or failed the call.
    Failed { os_error: u32 },
}

/// Abstract miniport IOCTL interface.
///
/// The request and response share one buffer: the driver reads the request
/// from it and writes its answer back in place.
pub trait IoctlTransport {
    /// Per-call synchronization resource, released when dropped.
    type Completion;

    /// Create the synchronization resource for one call.
    fn create_completion(&self) -> Result<Self::Completion, TransportError>;

    /// Issue the call. May return `Pending` for overlapped handles.
    fn device_io_control(
        &self,
        control_code: u32,
        buffer: &mut [u8],
        completion: &mut Self::Completion,
    ) -> IoStatus;

    /// Block until a pending call finishes.
    fn wait_for_completion(&self, completion: &mut Self::Completion) -> IoStatus;
}
