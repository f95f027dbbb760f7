//! Firmware capability discovery.

use tracing::{info, instrument, warn};

use crate::device::{CapabilityRecord, RstDevice};
use crate::error::RstError;
use crate::protocol::constants::{
    DEFAULT_COMMAND_TIMEOUT_SECS, FIRMWARE_FUNCTION_GET_INFO, FIRMWARE_REQUEST_FLAG_CONTROLLER,
};
use crate::protocol::firmware::FirmwareInfo;
use crate::request::build_and_issue;
use crate::transport::IoctlTransport;

/// Issue GetInfo and decode the driver's answer.
#[instrument(level = "debug", skip(device), fields(flags = %format!("0x{:08X}", flags)))]
pub fn query_firmware_info<T: IoctlTransport>(
    device: &RstDevice<T>,
    flags: u32,
) -> Result<FirmwareInfo, RstError> {
    device.transport()?;
    let mut payload = FirmwareInfo::request_payload();
    build_and_issue(
        device,
        Some(&mut payload),
        DEFAULT_COMMAND_TIMEOUT_SECS,
        FIRMWARE_FUNCTION_GET_INFO,
        flags,
        true,
    )?;
    Ok(FirmwareInfo::from_bytes(&payload)?)
}

/// Probe whether the device takes firmware updates through RST.
///
/// On success the answer is cached on the RAID address, when the device has
/// one, for later classification. Failures report `false` and cache nothing.
#[instrument(skip(device))]
pub fn supports_firmware_download<T: IoctlTransport>(device: &mut RstDevice<T>) -> bool {
    let flags = if device.is_nvme() {
        FIRMWARE_REQUEST_FLAG_CONTROLLER
    } else {
        0
    };

    let fw_info = match query_firmware_info(device, flags) {
        Ok(fw_info) => fw_info,
        Err(e) => {
            warn!(error = %e, "Firmware info query failed");
            return false;
        }
    };

    info!(
        supported = fw_info.upgrade_support,
        max_size = fw_info.image_payload_max_size,
        alignment = fw_info.image_payload_alignment,
        "Firmware capability"
    );

    if let Some(raid) = device.raid.as_mut() {
        raid.firmware_support = Some(CapabilityRecord {
            supported: fw_info.upgrade_support,
            max_transfer_size: fw_info.image_payload_max_size,
            payload_alignment: fw_info.image_payload_alignment,
        });
    }
    fw_info.upgrade_support
}
