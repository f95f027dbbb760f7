//! NVMe admin firmware commands to RAID firmware requests.

use tracing::{debug, instrument};

use crate::command::{NvmeCmdCtx, NvmeCommandSet};
use crate::device::RstDevice;
use crate::error::RstError;
use crate::protocol::constants::{
    FIRMWARE_INFO_INVALID_SLOT, NVME_ADMIN_CMD_ACTIVATE_FW, NVME_ADMIN_CMD_DOWNLOAD_FW,
    NVME_CA_ACTIVATE_IMMEDIATE, NVME_CA_ACTIVATE_ON_RST,
};
use crate::request::{FirmwareOperation, issue_firmware_operation};
use crate::transport::IoctlTransport;

/// Commit action, CDW10 bits 5:3.
pub fn commit_action(cdw10: u32) -> u8 {
    ((cdw10 >> 3) & 0x7) as u8
}

/// Firmware slot, CDW10 bits 2:0.
pub fn commit_slot(cdw10: u32) -> u8 {
    (cdw10 & 0x7) as u8
}

/// Actions that switch to an image already on the drive.
pub fn switches_to_existing(action: u8) -> bool {
    action == NVME_CA_ACTIVATE_ON_RST || action == NVME_CA_ACTIVATE_IMMEDIATE
}

/// Map an admin Download/Activate Firmware command onto a firmware operation.
///
/// Download reads CDW10 as the byte length and CDW11 as the byte offset.
pub fn firmware_operation(ctx: &NvmeCmdCtx) -> Result<FirmwareOperation<'_>, RstError> {
    if ctx.command_set != NvmeCommandSet::Admin {
        return Err(RstError::bad_parameter("firmware commands must be admin commands"));
    }

    match ctx.cmd.opcode() {
        NVME_ADMIN_CMD_DOWNLOAD_FW => {
            let len = ctx.cmd.cdw10() as usize;
            let image = ctx.data.get(..len).ok_or_else(|| {
                RstError::bad_parameter(format!(
                    "download length {len} exceeds {} byte data buffer",
                    ctx.data.len()
                ))
            })?;
            Ok(FirmwareOperation::Download {
                slot: FIRMWARE_INFO_INVALID_SLOT,
                offset: ctx.cmd.cdw11() as u64,
                image,
                first_segment: ctx.fwdl_first_segment,
                last_segment: ctx.fwdl_last_segment,
                controller: true,
            })
        }
        NVME_ADMIN_CMD_ACTIVATE_FW => {
            let cdw10 = ctx.cmd.cdw10();
            Ok(FirmwareOperation::Activate {
                slot: commit_slot(cdw10),
                switch_to_existing: switches_to_existing(commit_action(cdw10)),
                controller: true,
            })
        }
        opcode => Err(RstError::bad_parameter(format!(
            "opcode 0x{opcode:02X} is not a firmware command"
        ))),
    }
}

/// Issue an NVMe Download/Activate Firmware command as a RAID firmware request.
#[instrument(level = "debug", skip(device, ctx), fields(opcode = ctx.cmd.opcode()))]
pub fn send_firmware_download<T: IoctlTransport>(
    device: &RstDevice<T>,
    ctx: &mut NvmeCmdCtx,
) -> Result<(), RstError> {
    device.transport()?;
    let op = firmware_operation(ctx)?;
    debug!(function = op.function(), flags = op.flags(), "NVMe firmware request");

    let response = issue_firmware_operation(device, &op, ctx.timeout_secs)?;
    ctx.vendor_return_code = Some(response.return_code);
    Ok(())
}
