//! The single submit-and-wait path shared by every request type.

use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use super::traits::{ERROR_IO_PENDING, IoStatus, IoctlTransport};
use crate::error::RstError;

/// What the platform reported for one miniport call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoctlOutcome {
    pub success: bool,
    /// Platform error code; 0 on success.
    pub last_error: u32,
    pub bytes_returned: u32,
    pub elapsed: Duration,
}

impl IoctlOutcome {
    /// Convert a platform failure into `RstError::Failure`.
    pub fn into_result(self) -> Result<Self, RstError> {
        if self.success {
            Ok(self)
        } else {
            Err(RstError::Failure {
                os_error: self.last_error,
            })
        }
    }
}

/// Submit `buffer` in place through the miniport control code.
///
/// Only fails outright when the completion resource cannot be created; a call
/// that was issued but failed comes back as an unsuccessful outcome. The vendor
/// return code inside the buffer is left for the caller to read.
#[instrument(level = "debug", skip(transport, buffer), fields(len = buffer.len(), control_code = %format!("0x{:08X}", control_code)))]
pub fn submit<T: IoctlTransport>(
    transport: &T,
    control_code: u32,
    buffer: &mut [u8],
) -> Result<IoctlOutcome, RstError> {
    let mut completion = transport.create_completion().map_err(|e| {
        warn!(error = %e, "Could not create completion event");
        RstError::PassthroughFailure(e)
    })?;

    let start = Instant::now();
    let status = match transport.device_io_control(control_code, buffer, &mut completion) {
        IoStatus::Pending => {
            debug!("IOCTL pending, waiting for completion");
            transport.wait_for_completion(&mut completion)
        }
        other => other,
    };
    let elapsed = start.elapsed();
    drop(completion);

    let outcome = match status {
        IoStatus::Complete { bytes_returned } => IoctlOutcome {
            success: true,
            last_error: 0,
            bytes_returned,
            elapsed,
        },
        IoStatus::Failed { os_error } => {
            warn!(os_error, "IOCTL failed");
            IoctlOutcome {
                success: false,
                last_error: os_error,
                bytes_returned: 0,
                elapsed,
            }
        }
        IoStatus::Pending => {
            warn!("Completion wait returned without finishing");
            IoctlOutcome {
                success: false,
                last_error: ERROR_IO_PENDING,
                bytes_returned: 0,
                elapsed,
            }
        }
    };

    debug!(
        success = outcome.success,
        bytes_returned = outcome.bytes_returned,
        elapsed_us = outcome.elapsed.as_micros() as u64,
        "IOCTL complete"
    );
    Ok(outcome)
}
