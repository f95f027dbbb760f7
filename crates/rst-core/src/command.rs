//! Generic SCSI/ATA/NVMe command contexts handed in by the passthrough layer.

use std::time::Duration;

use crate::error::RstError;
use crate::protocol::constants::WRITE_BUFFER_CMD;

const ATA_PASS_THROUGH_16: u8 = 0x85;

/// Largest value the 3-byte WRITE BUFFER offset and length fields hold.
pub const WRITE_BUFFER_FIELD_MAX: u32 = 0x00FF_FFFF;

/// ATA task file registers (28-bit layout).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskFileRegisters {
    pub error_feature: u8,
    pub sector_count: u8,
    pub lba_low: u8,
    pub lba_mid: u8,
    pub lba_hi: u8,
    pub device_head: u8,
    pub command_status: u8,
}

/// ATA options carried alongside a SCSI context when the command is really ATA.
#[derive(Debug, Clone, Default)]
pub struct AtaCmdOpts {
    pub tfr: TaskFileRegisters,
    pub data: Vec<u8>,
    pub timeout_secs: u32,
}

/// A SCSI command (optionally wrapping an ATA command) as built upstream.
#[derive(Debug, Clone, Default)]
pub struct ScsiIoCtx {
    pub cdb: Vec<u8>,
    pub data: Vec<u8>,
    pub timeout_secs: u32,
    pub ata: Option<AtaCmdOpts>,
    pub fwdl_first_segment: bool,
    pub fwdl_last_segment: bool,
    /// Vendor return code of the last request, when one was issued.
    pub vendor_return_code: Option<u32>,
}

impl ScsiIoCtx {
    pub fn operation_code(&self) -> Option<u8> {
        self.cdb.first().copied()
    }

    /// WRITE BUFFER CDB: mode, buffer id, 24-bit offset, 24-bit length.
    pub fn write_buffer(
        mode: u8,
        buffer_id: u8,
        offset: u32,
        data: Vec<u8>,
    ) -> Result<Self, RstError> {
        let len = u32::try_from(data.len())
            .ok()
            .filter(|&len| len <= WRITE_BUFFER_FIELD_MAX)
            .ok_or_else(|| {
                RstError::bad_parameter(format!(
                    "{} byte buffer does not fit the WRITE BUFFER length field",
                    data.len()
                ))
            })?;
        if offset > WRITE_BUFFER_FIELD_MAX {
            return Err(RstError::bad_parameter(format!(
                "offset 0x{offset:X} does not fit the WRITE BUFFER offset field"
            )));
        }
        let cdb = vec![
            WRITE_BUFFER_CMD,
            mode & 0x1F,
            buffer_id,
            (offset >> 16) as u8,
            (offset >> 8) as u8,
            offset as u8,
            (len >> 16) as u8,
            (len >> 8) as u8,
            len as u8,
            0,
        ];
        Ok(Self {
            cdb,
            data,
            ..Default::default()
        })
    }

    /// Wrap an ATA task file behind an ATA PASS-THROUGH (16) CDB.
    pub fn ata(opts: AtaCmdOpts) -> Self {
        let mut cdb = vec![0u8; 16];
        cdb[0] = ATA_PASS_THROUGH_16;
        Self {
            cdb,
            ata: Some(opts),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NvmeCommandSet {
    #[default]
    Admin,
    Io,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataDirection {
    #[default]
    None,
    /// Host to device.
    ToDevice,
    /// Device to host.
    FromDevice,
    /// Both directions; the RST passthrough cannot express this.
    Bidirectional,
}

/// The sixteen submission queue entry dwords.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NvmeCommand {
    pub cdw: [u32; 16],
}

impl NvmeCommand {
    pub fn new(opcode: u8) -> Self {
        let mut cdw = [0u32; 16];
        cdw[0] = opcode as u32;
        Self { cdw }
    }

    pub fn opcode(&self) -> u8 {
        (self.cdw[0] & 0xFF) as u8
    }

    pub fn nsid(&self) -> u32 {
        self.cdw[1]
    }

    pub fn cdw10(&self) -> u32 {
        self.cdw[10]
    }

    pub fn cdw11(&self) -> u32 {
        self.cdw[11]
    }
}

/// Completion queue entry dwords returned by the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionData {
    pub dw0_valid: bool,
    pub dw1_valid: bool,
    pub dw2_valid: bool,
    pub dw3_valid: bool,
    pub command_specific: u32,
    pub dw1_reserved: u32,
    pub sq_id_and_head_ptr: u32,
    pub status_and_cid: u32,
}

impl CompletionData {
    pub fn from_dwords(dw: [u32; 4]) -> Self {
        Self {
            dw0_valid: true,
            dw1_valid: true,
            dw2_valid: true,
            dw3_valid: true,
            command_specific: dw[0],
            dw1_reserved: dw[1],
            sq_id_and_head_ptr: dw[2],
            status_and_cid: dw[3],
        }
    }

    /// Status field (DW3 bits 31:17).
    pub fn status_field(&self) -> u16 {
        (self.status_and_cid >> 17) as u16
    }
}

/// An NVMe command as built upstream, plus its output slots.
#[derive(Debug, Clone, Default)]
pub struct NvmeCmdCtx {
    pub command_set: NvmeCommandSet,
    pub cmd: NvmeCommand,
    pub direction: DataDirection,
    pub data: Vec<u8>,
    pub timeout_secs: u32,
    pub fwdl_first_segment: bool,
    pub fwdl_last_segment: bool,
    pub completion: CompletionData,
    pub command_time: Option<Duration>,
    pub vendor_return_code: Option<u32>,
}

impl NvmeCmdCtx {
    pub fn admin(cmd: NvmeCommand, direction: DataDirection, data: Vec<u8>) -> Self {
        Self {
            command_set: NvmeCommandSet::Admin,
            cmd,
            direction,
            data,
            ..Default::default()
        }
    }

    pub fn io(cmd: NvmeCommand, direction: DataDirection, data: Vec<u8>) -> Self {
        Self {
            command_set: NvmeCommandSet::Io,
            ..Self::admin(cmd, direction, data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_buffer_cdb() {
        let ctx = ScsiIoCtx::write_buffer(0x0E, 1, 0x012345, vec![0; 0x200]).unwrap();
        assert_eq!(ctx.operation_code(), Some(WRITE_BUFFER_CMD));
        assert_eq!(ctx.cdb[1], 0x0E);
        assert_eq!(ctx.cdb[2], 1);
        assert_eq!(&ctx.cdb[3..6], &[0x01, 0x23, 0x45]);
        assert_eq!(&ctx.cdb[6..9], &[0x00, 0x02, 0x00]);
    }

    #[test]
    fn test_write_buffer_field_limits() {
        let max = WRITE_BUFFER_FIELD_MAX as usize;
        let ctx = ScsiIoCtx::write_buffer(0x0E, 0, WRITE_BUFFER_FIELD_MAX, vec![0; max]).unwrap();
        assert_eq!(&ctx.cdb[3..9], &[0xFF; 6]);

        assert!(matches!(
            ScsiIoCtx::write_buffer(0x0E, 0, 0, vec![0; max + 1]),
            Err(RstError::BadParameter(_))
        ));
        assert!(matches!(
            ScsiIoCtx::write_buffer(0x0E, 0, WRITE_BUFFER_FIELD_MAX + 1, Vec::new()),
            Err(RstError::BadParameter(_))
        ));
    }

    #[test]
    fn test_completion_dwords() {
        let c = CompletionData::from_dwords([1, 2, 3, 0x0002_0000 | 7]);
        assert!(c.dw0_valid && c.dw3_valid);
        assert_eq!(c.command_specific, 1);
        assert_eq!(c.status_field(), 1);
    }

    #[test]
    fn test_nvme_command_accessors() {
        let mut cmd = NvmeCommand::new(0x11);
        cmd.cdw[10] = 0x200;
        cmd.cdw[11] = 0x1000;
        assert_eq!(cmd.opcode(), 0x11);
        assert_eq!(cmd.cdw10(), 0x200);
        assert_eq!(cmd.cdw11(), 0x1000);
    }
}
