//! Command adapters: native SCSI/ATA/NVMe commands in, RST requests out.

pub mod nvme;
pub mod passthrough;
pub mod scsi;

use tracing::instrument;

use crate::command::{NvmeCmdCtx, NvmeCommandSet};
use crate::device::RstDevice;
use crate::error::RstError;
use crate::protocol::constants::{NVME_ADMIN_CMD_ACTIVATE_FW, NVME_ADMIN_CMD_DOWNLOAD_FW};
use crate::transport::IoctlTransport;

pub use passthrough::send_passthrough;

/// Route an NVMe command: firmware admin commands use the RAID firmware
/// request, everything else goes through generic passthrough.
#[instrument(level = "debug", skip(device, ctx))]
pub fn send_nvme_command<T: IoctlTransport>(
    device: &RstDevice<T>,
    ctx: &mut NvmeCmdCtx,
) -> Result<(), RstError> {
    device.transport()?;
    match (ctx.command_set, ctx.cmd.opcode()) {
        (NvmeCommandSet::Admin, NVME_ADMIN_CMD_DOWNLOAD_FW | NVME_ADMIN_CMD_ACTIVATE_FW) => {
            nvme::send_firmware_download(device, ctx)
        }
        _ => passthrough::send_passthrough(device, ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{DataDirection, NvmeCommand};
    use crate::device::DriveInfo;
    use crate::protocol::constants::{IOCTL_NVME_PASSTHROUGH, IOCTL_RAID_FIRMWARE};
    use crate::transport::MockTransport;

    fn srb_control_code(req: &[u8]) -> u32 {
        u32::from_le_bytes([req[16], req[17], req[18], req[19]])
    }

    #[test]
    fn test_dispatch() {
        let mock = MockTransport::new();
        let dev = RstDevice::new(mock.clone(), DriveInfo::default());

        let mut fw = NvmeCmdCtx::admin(
            NvmeCommand::new(NVME_ADMIN_CMD_ACTIVATE_FW),
            DataDirection::None,
            Vec::new(),
        );
        send_nvme_command(&dev, &mut fw).unwrap();

        let mut identify =
            NvmeCmdCtx::admin(NvmeCommand::new(0x06), DataDirection::FromDevice, vec![0; 64]);
        send_nvme_command(&dev, &mut identify).unwrap();

        // Opcode 0x10 in the IO set is a plain IO command.
        let mut io = NvmeCmdCtx::io(
            NvmeCommand::new(NVME_ADMIN_CMD_ACTIVATE_FW),
            DataDirection::None,
            Vec::new(),
        );
        send_nvme_command(&dev, &mut io).unwrap();

        let subs = mock.submissions();
        assert_eq!(srb_control_code(&subs[0].request), IOCTL_RAID_FIRMWARE);
        assert_eq!(srb_control_code(&subs[1].request), IOCTL_NVME_PASSTHROUGH);
        assert_eq!(srb_control_code(&subs[2].request), IOCTL_NVME_PASSTHROUGH);
    }

    #[test]
    fn test_detached_device() {
        let dev: RstDevice<MockTransport> = RstDevice::detached(DriveInfo::default());
        let mut ctx = NvmeCmdCtx::admin(NvmeCommand::new(0x06), DataDirection::None, Vec::new());
        assert!(matches!(
            send_nvme_command(&dev, &mut ctx),
            Err(RstError::BadParameter(_))
        ));
    }
}
