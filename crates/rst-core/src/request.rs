//! Firmware function request builder.
//!
//! Every firmware operation, whatever protocol it arrived in, ends up here as a
//! [`FirmwareOperation`] and leaves as one RAID firmware envelope submitted
//! through the miniport.

use tracing::{debug, instrument};

use crate::device::RstDevice;
use crate::error::RstError;
use crate::protocol::constants::{
    FIRMWARE_FUNCTION_ACTIVATE, FIRMWARE_FUNCTION_DOWNLOAD, FIRMWARE_FUNCTION_GET_INFO,
    FIRMWARE_REQUEST_FLAG_CONTROLLER, FIRMWARE_REQUEST_FLAG_FIRST_SEGMENT,
    FIRMWARE_REQUEST_FLAG_LAST_SEGMENT, FIRMWARE_REQUEST_FLAG_SWITCH_TO_EXISTING_FIRMWARE,
    IOCTL_SCSI_MINIPORT,
};
use crate::protocol::envelope::{EnvelopeParams, FirmwareEnvelope};
use crate::protocol::firmware::{FirmwareActivate, FirmwareDownload, FirmwareInfo};
use crate::transport::{IoctlTransport, submit};

/// A logical firmware request, independent of the protocol it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareOperation<'a> {
    QueryInfo {
        controller: bool,
    },
    Download {
        slot: u8,
        offset: u64,
        image: &'a [u8],
        first_segment: bool,
        last_segment: bool,
        controller: bool,
    },
    Activate {
        slot: u8,
        switch_to_existing: bool,
        controller: bool,
    },
}

impl FirmwareOperation<'_> {
    pub fn function(&self) -> u32 {
        match self {
            FirmwareOperation::QueryInfo { .. } => FIRMWARE_FUNCTION_GET_INFO,
            FirmwareOperation::Download { .. } => FIRMWARE_FUNCTION_DOWNLOAD,
            FirmwareOperation::Activate { .. } => FIRMWARE_FUNCTION_ACTIVATE,
        }
    }

    pub fn flags(&self) -> u32 {
        let mut flags = 0;
        match *self {
            FirmwareOperation::QueryInfo { controller } => {
                if controller {
                    flags |= FIRMWARE_REQUEST_FLAG_CONTROLLER;
                }
            }
            FirmwareOperation::Download {
                first_segment,
                last_segment,
                controller,
                ..
            } => {
                if controller {
                    flags |= FIRMWARE_REQUEST_FLAG_CONTROLLER;
                }
                if first_segment {
                    flags |= FIRMWARE_REQUEST_FLAG_FIRST_SEGMENT;
                }
                if last_segment {
                    flags |= FIRMWARE_REQUEST_FLAG_LAST_SEGMENT;
                }
            }
            FirmwareOperation::Activate {
                switch_to_existing,
                controller,
                ..
            } => {
                if controller {
                    flags |= FIRMWARE_REQUEST_FLAG_CONTROLLER;
                }
                if switch_to_existing {
                    flags |= FIRMWARE_REQUEST_FLAG_SWITCH_TO_EXISTING_FIRMWARE;
                }
            }
        }
        flags
    }

    /// Function-specific payload placed after the request block.
    pub fn payload(&self) -> Vec<u8> {
        match *self {
            FirmwareOperation::QueryInfo { .. } => FirmwareInfo::request_payload(),
            FirmwareOperation::Download {
                slot,
                offset,
                image,
                ..
            } => FirmwareDownload {
                offset,
                slot,
                image,
            }
            .to_bytes(),
            FirmwareOperation::Activate { slot, .. } => FirmwareActivate { slot }.to_bytes().to_vec(),
        }
    }

    /// Only GetInfo reads anything back from the payload region.
    pub fn reads_back(&self) -> bool {
        matches!(self, FirmwareOperation::QueryInfo { .. })
    }
}

/// Result of an issued firmware operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareResponse {
    /// SRB return code written by the driver. Not interpreted.
    pub return_code: u32,
    /// Payload as returned by the driver; empty unless the operation reads back.
    pub payload: Vec<u8>,
}

/// Build the envelope a request would be submitted with, without sending it.
pub fn build_envelope<T>(
    device: &RstDevice<T>,
    payload: Option<&[u8]>,
    timeout_secs: u32,
    function: u32,
    flags: u32,
) -> Result<FirmwareEnvelope, RstError> {
    device.transport()?;
    let params = EnvelopeParams {
        timeout_secs: device.resolve_timeout(timeout_secs),
        path_id: device.path_id(),
        function,
        flags,
    };
    FirmwareEnvelope::build(&params, payload, device.info.minimum_alignment)
}

/// Wrap `payload` in a firmware envelope, submit it and return the driver's return code.
///
/// With `copy_back` the payload region of the completed request is copied back
/// over `payload`.
#[instrument(level = "debug", skip(device, payload), fields(payload_len = payload.as_ref().map_or(0, |p| p.len())))]
pub fn build_and_issue<T: IoctlTransport>(
    device: &RstDevice<T>,
    payload: Option<&mut [u8]>,
    timeout_secs: u32,
    function: u32,
    flags: u32,
    copy_back: bool,
) -> Result<u32, RstError> {
    let transport = device.transport()?;
    let mut envelope = build_envelope(device, payload.as_deref(), timeout_secs, function, flags)?;
    debug!(
        size = envelope.len(),
        function,
        flags = %format!("0x{:08X}", flags),
        "Firmware request built"
    );

    submit(transport, IOCTL_SCSI_MINIPORT, envelope.as_bytes_mut())?.into_result()?;

    let return_code = envelope.return_code();
    if copy_back && let Some(out) = payload {
        out.copy_from_slice(envelope.payload());
    }
    debug!(return_code, "Firmware request complete");
    Ok(return_code)
}

/// Encode `op` and issue it through [`build_and_issue`].
#[instrument(level = "debug", skip(device, op), fields(function = op.function()))]
pub fn issue_firmware_operation<T: IoctlTransport>(
    device: &RstDevice<T>,
    op: &FirmwareOperation<'_>,
    timeout_secs: u32,
) -> Result<FirmwareResponse, RstError> {
    device.transport()?;
    let mut payload = op.payload();
    let reads_back = op.reads_back();
    let return_code = build_and_issue(
        device,
        Some(&mut payload),
        timeout_secs,
        op.function(),
        op.flags(),
        reads_back,
    )?;
    if !reads_back {
        payload.clear();
    }
    Ok(FirmwareResponse {
        return_code,
        payload,
    })
}
