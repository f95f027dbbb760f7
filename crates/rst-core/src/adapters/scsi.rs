//! SCSI WRITE BUFFER / ATA DOWNLOAD MICROCODE to RAID firmware requests.

use tracing::{debug, instrument};

use crate::classify::{FirmwareCommand, classify, firmware_command};
use crate::command::ScsiIoCtx;
use crate::device::RstDevice;
use crate::error::RstError;
use crate::protocol::constants::{LEGACY_DRIVE_SEC_SIZE, NVME_T10_VENDOR_ID};
use crate::request::{FirmwareOperation, issue_firmware_operation};
use crate::transport::IoctlTransport;

/// Translate an already classified command into a firmware operation and its timeout.
///
/// Returns `None` when `ctx` is not a firmware command at all.
pub fn firmware_operation<'a, T>(
    device: &RstDevice<T>,
    ctx: &'a ScsiIoCtx,
) -> Option<(FirmwareOperation<'a>, u32)> {
    // NVMe behind the SCSI translation layer is addressed as a controller.
    let controller = device.info.t10_vendor_ident == NVME_T10_VENDOR_ID;
    let timeout = ctx.ata.as_ref().map_or(ctx.timeout_secs, |ata| ata.timeout_secs);

    let op = match firmware_command(ctx)? {
        FirmwareCommand::Activate => FirmwareOperation::Activate {
            slot: match ctx.ata {
                Some(_) => 0,
                None => ctx.cdb.get(2).copied().unwrap_or(0),
            },
            switch_to_existing: false,
            controller,
        },
        FirmwareCommand::Download { .. } => {
            let (slot, offset, image) = match &ctx.ata {
                Some(ata) => {
                    let sectors = u16::from_be_bytes([ata.tfr.lba_hi, ata.tfr.lba_mid]) as u64;
                    (0, sectors * LEGACY_DRIVE_SEC_SIZE as u64, ata.data.as_slice())
                }
                None => (
                    ctx.cdb[2],
                    u32::from_be_bytes([0, ctx.cdb[3], ctx.cdb[4], ctx.cdb[5]]) as u64,
                    ctx.data.as_slice(),
                ),
            };
            FirmwareOperation::Download {
                slot,
                offset,
                image,
                first_segment: ctx.fwdl_first_segment,
                last_segment: ctx.fwdl_last_segment,
                controller,
            }
        }
    };
    Some((op, timeout))
}

/// Issue a firmware download or activate carried in a SCSI/ATA command.
///
/// The driver's return code is left on `ctx`; no sense data or ATA result
/// registers are produced from it.
#[instrument(level = "debug", skip(device, ctx))]
pub fn send_firmware_download<T: IoctlTransport>(
    device: &RstDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<(), RstError> {
    device.transport()?;
    if !classify(device, ctx).compatible {
        return Err(RstError::not_available(
            "command is not a supported firmware download shape",
        ));
    }
    let (op, timeout) = firmware_operation(device, ctx)
        .ok_or_else(|| RstError::not_available("command is not a firmware command"))?;
    debug!(function = op.function(), flags = op.flags(), timeout, "SCSI firmware request");

    let response = issue_firmware_operation(device, &op, timeout)?;
    ctx.vendor_return_code = Some(response.return_code);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{AtaCmdOpts, TaskFileRegisters};
    use crate::device::{CapabilityRecord, DriveInfo, RaidAddress};
    use crate::protocol::constants::*;
    use crate::protocol::envelope::FIRMWARE_ENVELOPE_SIZE;
    use crate::transport::{MockReply, MockTransport};

    fn device(mock: &MockTransport, vendor: &str) -> RstDevice<MockTransport> {
        let info = DriveInfo {
            t10_vendor_ident: vendor.to_string(),
            ..Default::default()
        };
        RstDevice::new(mock.clone(), info).with_raid_address(RaidAddress {
            port_identifier: 0,
            info_valid: true,
            firmware_support: Some(CapabilityRecord {
                supported: true,
                max_transfer_size: 0x1_0000,
                payload_alignment: 512,
            }),
        })
    }

    fn request_block_flags(req: &[u8]) -> u32 {
        u32::from_le_bytes([req[44], req[45], req[46], req[47]])
    }

    #[test]
    fn test_write_buffer_download() {
        let mock = MockTransport::new();
        mock.queue_reply(MockReply::success().with_return_code(3));
        let dev = device(&mock, "NVMe");

        let mut ctx = ScsiIoCtx::write_buffer(
            SCSI_WB_DL_MICROCODE_OFFSETS_SAVE_DEFER,
            2,
            0x000400,
            vec![0xA5; 512],
        )
        .unwrap();
        ctx.fwdl_first_segment = true;
        ctx.timeout_secs = 40;
        send_firmware_download(&dev, &mut ctx).unwrap();
        assert_eq!(ctx.vendor_return_code, Some(3));

        let req = &mock.submissions()[0].request;
        assert_eq!(&req[12..16], &40u32.to_le_bytes());
        assert_eq!(&req[40..44], &FIRMWARE_FUNCTION_DOWNLOAD.to_le_bytes());
        assert_eq!(
            request_block_flags(req),
            FIRMWARE_REQUEST_FLAG_CONTROLLER | FIRMWARE_REQUEST_FLAG_FIRST_SEGMENT
        );
        let payload = &req[FIRMWARE_ENVELOPE_SIZE..];
        assert_eq!(&payload[8..16], &0x400u64.to_le_bytes());
        assert_eq!(payload[24], 2);
        assert_eq!(&payload[32..], &[0xA5; 512][..]);
    }

    #[test]
    fn test_write_buffer_activate_uses_buffer_id_slot() {
        let mock = MockTransport::new();
        let dev = device(&mock, "ATA");

        let mut ctx =
            ScsiIoCtx::write_buffer(SCSI_WB_ACTIVATE_DEFERRED_MICROCODE, 3, 0, Vec::new()).unwrap();
        send_firmware_download(&dev, &mut ctx).unwrap();

        let req = &mock.submissions()[0].request;
        assert_eq!(&req[40..44], &FIRMWARE_FUNCTION_ACTIVATE.to_le_bytes());
        assert_eq!(request_block_flags(req), 0);
        assert_eq!(req[FIRMWARE_ENVELOPE_SIZE + 8], 3);
    }

    #[test]
    fn test_ata_download_offset_and_timeout() {
        let mock = MockTransport::new();
        let dev = device(&mock, "ATA");

        let mut ctx = ScsiIoCtx::ata(AtaCmdOpts {
            tfr: TaskFileRegisters {
                error_feature: ATA_DL_MICROCODE_OFFSETS_SAVE_FUTURE,
                sector_count: 2,
                lba_low: 0,
                lba_mid: 4,
                lba_hi: 0,
                command_status: ATA_DOWNLOAD_MICROCODE_DMA,
                ..Default::default()
            },
            data: vec![0x11; 1024],
            timeout_secs: 60,
        });
        ctx.timeout_secs = 5;
        ctx.fwdl_last_segment = true;
        send_firmware_download(&dev, &mut ctx).unwrap();

        let req = &mock.submissions()[0].request;
        assert_eq!(&req[12..16], &60u32.to_le_bytes());
        assert_eq!(request_block_flags(req), FIRMWARE_REQUEST_FLAG_LAST_SEGMENT);
        let payload = &req[FIRMWARE_ENVELOPE_SIZE..];
        assert_eq!(&payload[8..16], &(4u64 * 512).to_le_bytes());
        assert_eq!(payload[24], 0);
        assert_eq!(payload.len(), 32 + 1024);
    }

    #[test]
    fn test_ata_activate_uses_slot_zero() {
        let mock = MockTransport::new();
        mock.queue_reply(MockReply::success().with_return_code(1));
        let dev = device(&mock, "ATA");

        let mut ctx = ScsiIoCtx::ata(AtaCmdOpts {
            tfr: TaskFileRegisters {
                error_feature: ATA_DL_MICROCODE_ACTIVATE,
                lba_mid: 7,
                command_status: ATA_DOWNLOAD_MICROCODE,
                ..Default::default()
            },
            data: Vec::new(),
            timeout_secs: 45,
        });
        ctx.timeout_secs = 5;
        send_firmware_download(&dev, &mut ctx).unwrap();
        assert_eq!(ctx.vendor_return_code, Some(1));

        let subs = mock.submissions();
        assert_eq!(subs.len(), 1);
        let req = &subs[0].request;
        assert_eq!(&req[12..16], &45u32.to_le_bytes());
        assert_eq!(&req[40..44], &FIRMWARE_FUNCTION_ACTIVATE.to_le_bytes());
        assert_eq!(request_block_flags(req), 0);
        assert_eq!(req[FIRMWARE_ENVELOPE_SIZE + 8], 0);
    }

    #[test]
    fn test_incompatible_command_not_sent() {
        let mock = MockTransport::new();
        let dev = device(&mock, "ATA");

        // Misaligned length.
        let mut ctx =
            ScsiIoCtx::write_buffer(SCSI_WB_DL_MICROCODE_OFFSETS_SAVE_DEFER, 0, 0, vec![0; 100])
                .unwrap();
        let err = send_firmware_download(&dev, &mut ctx).unwrap_err();
        assert!(matches!(err, RstError::CommandNotAvailable(_)));

        let mut ctx = ScsiIoCtx::write_buffer(0x05, 0, 0, vec![0; 512]).unwrap();
        assert!(send_firmware_download(&dev, &mut ctx).is_err());
        assert!(mock.submissions().is_empty());
        assert_eq!(ctx.vendor_return_code, None);
    }

    #[test]
    fn test_platform_failure_surfaces() {
        let mock = MockTransport::new();
        mock.queue_reply(MockReply::failed(21));
        let dev = device(&mock, "ATA");

        let mut ctx =
            ScsiIoCtx::write_buffer(SCSI_WB_ACTIVATE_DEFERRED_MICROCODE, 0, 0, Vec::new()).unwrap();
        let err = send_firmware_download(&dev, &mut ctx).unwrap_err();
        assert!(matches!(err, RstError::Failure { os_error: 21 }));
    }
}
