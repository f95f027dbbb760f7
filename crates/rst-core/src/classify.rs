//! Decide whether a SCSI or ATA command can be carried by the RAID firmware channel.

use tracing::debug;

use crate::command::ScsiIoCtx;
use crate::device::{CapabilityRecord, RstDevice};
use crate::protocol::constants::{
    ATA_DL_MICROCODE_ACTIVATE, ATA_DL_MICROCODE_OFFSETS_SAVE_FUTURE, ATA_DOWNLOAD_MICROCODE,
    ATA_DOWNLOAD_MICROCODE_DMA, LEGACY_DRIVE_SEC_SIZE, SCSI_WB_ACTIVATE_DEFERRED_MICROCODE,
    SCSI_WB_DL_MICROCODE_OFFSETS_SAVE_DEFER, WRITE_BUFFER_CMD,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Classification {
    pub compatible: bool,
    pub is_activate: bool,
}

/// Firmware command shape recognized in a SCSI context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FirmwareCommand {
    /// Download segment with its declared transfer length in bytes.
    Download { transfer_length: u32 },
    Activate,
}

/// Match the command shape only; no capability checks.
pub(crate) fn firmware_command(ctx: &ScsiIoCtx) -> Option<FirmwareCommand> {
    if ctx.operation_code() == Some(WRITE_BUFFER_CMD) {
        let mode = *ctx.cdb.get(1)? & 0x1F;
        return match mode {
            SCSI_WB_DL_MICROCODE_OFFSETS_SAVE_DEFER => {
                let len = ctx.cdb.get(6..9)?;
                Some(FirmwareCommand::Download {
                    transfer_length: u32::from_be_bytes([0, len[0], len[1], len[2]]),
                })
            }
            SCSI_WB_ACTIVATE_DEFERRED_MICROCODE => Some(FirmwareCommand::Activate),
            _ => None,
        };
    }

    let ata = ctx.ata.as_ref()?;
    let tfr = &ata.tfr;
    if tfr.command_status != ATA_DOWNLOAD_MICROCODE && tfr.command_status != ATA_DOWNLOAD_MICROCODE_DMA {
        return None;
    }
    match tfr.error_feature {
        ATA_DL_MICROCODE_OFFSETS_SAVE_FUTURE => {
            let sectors = u16::from_be_bytes([tfr.lba_low, tfr.sector_count]) as u32;
            Some(FirmwareCommand::Download {
                transfer_length: sectors * LEGACY_DRIVE_SEC_SIZE,
            })
        }
        ATA_DL_MICROCODE_ACTIVATE => Some(FirmwareCommand::Activate),
        _ => None,
    }
}

/// A download fits when it is below the maximum and a multiple of the alignment.
fn within_limits(transfer_length: u32, capability: Option<CapabilityRecord>) -> bool {
    match capability {
        Some(cap) if cap.payload_alignment != 0 => {
            transfer_length < cap.max_transfer_size
                && transfer_length % cap.payload_alignment == 0
        }
        _ => false,
    }
}

/// Classify `ctx` against the device's cached firmware capability.
///
/// Downloads are rejected when nothing has been probed yet.
pub fn classify<T>(device: &RstDevice<T>, ctx: &ScsiIoCtx) -> Classification {
    let classification = match firmware_command(ctx) {
        Some(FirmwareCommand::Activate) => Classification {
            compatible: true,
            is_activate: true,
        },
        Some(FirmwareCommand::Download { transfer_length }) => Classification {
            compatible: within_limits(transfer_length, device.capability()),
            is_activate: false,
        },
        None => Classification::default(),
    };
    debug!(
        compatible = classification.compatible,
        is_activate = classification.is_activate,
        "Classified firmware command"
    );
    classification
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{AtaCmdOpts, TaskFileRegisters};
    use crate::device::{DriveInfo, RaidAddress};

    fn device(cap: Option<CapabilityRecord>) -> RstDevice<()> {
        RstDevice::new((), DriveInfo::default()).with_raid_address(RaidAddress {
            port_identifier: 0,
            info_valid: true,
            firmware_support: cap,
        })
    }

    fn cap(max: u32, align: u32) -> Option<CapabilityRecord> {
        Some(CapabilityRecord {
            supported: true,
            max_transfer_size: max,
            payload_alignment: align,
        })
    }

    fn wb_download(len: usize) -> ScsiIoCtx {
        ScsiIoCtx::write_buffer(SCSI_WB_DL_MICROCODE_OFFSETS_SAVE_DEFER, 0, 0, vec![0; len])
            .unwrap()
    }

    fn ata(feature: u8, sector_count: u8, lba_low: u8) -> ScsiIoCtx {
        ScsiIoCtx::ata(AtaCmdOpts {
            tfr: TaskFileRegisters {
                error_feature: feature,
                sector_count,
                lba_low,
                command_status: ATA_DOWNLOAD_MICROCODE,
                ..Default::default()
            },
            ..Default::default()
        })
    }

    #[test]
    fn test_write_buffer_download_bounds() {
        let dev = device(cap(4096, 512));
        for (len, ok) in [
            (0, true),
            (512, true),
            (3584, true),
            (4096, false),
            (8192, false),
            (100, false),
        ] {
            let c = classify(&dev, &wb_download(len));
            assert_eq!(c.compatible, ok, "len {len}");
            assert!(!c.is_activate);
        }
    }

    #[test]
    fn test_write_buffer_mode_uses_low_bits() {
        let dev = device(cap(4096, 512));
        let mut ctx = wb_download(512);
        ctx.cdb[1] |= 0xE0;
        assert!(classify(&dev, &ctx).compatible);

        ctx.cdb[1] = 0x05;
        assert_eq!(classify(&dev, &ctx), Classification::default());
    }

    #[test]
    fn test_activate_skips_limits() {
        let dev = device(None);
        let ctx =
            ScsiIoCtx::write_buffer(SCSI_WB_ACTIVATE_DEFERRED_MICROCODE, 1, 0, Vec::new()).unwrap();
        assert_eq!(
            classify(&dev, &ctx),
            Classification {
                compatible: true,
                is_activate: true
            }
        );
        assert!(classify(&dev, &ata(0x0F, 0xFF, 0xFF)).is_activate);
    }

    #[test]
    fn test_no_capability_fails_closed() {
        let dev = RstDevice::new((), DriveInfo::default());
        assert!(!classify(&dev, &wb_download(512)).compatible);
        assert!(!classify(&device(cap(4096, 0)), &wb_download(512)).compatible);
    }

    #[test]
    fn test_ata_length_in_sectors() {
        let dev = device(cap(0x2_0000, 512));
        // (lba_low << 8 | sector_count) * 512
        let c = classify(&dev, &ata(0x0E, 8, 0));
        assert!(c.compatible);
        assert!(!c.is_activate);
        assert!(classify(&dev, &ata(0x0E, 0xFF, 0)).compatible);
        // 0x100 sectors = 128 KiB, not below the maximum.
        assert!(!classify(&dev, &ata(0x0E, 0, 1)).compatible);

        let dev = device(cap(0x2_0000, 4096));
        assert!(!classify(&dev, &ata(0x0E, 1, 0)).compatible);
        assert!(classify(&dev, &ata(0x0E, 8, 0)).compatible);
    }

    #[test]
    fn test_ata_unrelated_commands() {
        let dev = device(cap(4096, 512));
        assert!(!classify(&dev, &ata(0x03, 1, 0)).compatible);

        let mut ctx = ata(0x0E, 1, 0);
        if let Some(opts) = ctx.ata.as_mut() {
            opts.tfr.command_status = 0xEC;
        }
        assert!(!classify(&dev, &ctx).compatible);
        assert!(!classify(&dev, &ScsiIoCtx::default()).compatible);
    }
}
