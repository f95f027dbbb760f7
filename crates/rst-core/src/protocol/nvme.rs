//! NVMe passthrough envelope.
//!
//! Layout (all little-endian):
//!
//! ```text
//! 0x00  SRB_IO_CONTROL            28 bytes
//! 0x1C  version/path/target/lun    4 bytes
//! 0x20  command dwords 0..15      64 bytes
//! 0x60  IsIOCommandSet             1 byte (+3 pad)
//! 0x64  completion dwords 0..3    16 bytes
//! 0x74  DataBufferOffset           4 bytes
//! 0x78  DataBufferLength           4 bytes
//! 0x7C  reserved                  40 bytes
//! 0xA4  data
//! ```

use byteorder::{ByteOrder, LittleEndian};

use crate::buffer::AlignedBuffer;
use crate::error::RstError;
use crate::protocol::constants::{
    INTEL_NVM_SIGNATURE, IOCTL_NVME_PASSTHROUGH, NVME_PASS_THROUGH_VERSION,
};
use crate::protocol::header::{AddressBlock, SrbIoControl};

pub const COMMAND_OFFSET: usize = SrbIoControl::SIZE + AddressBlock::SIZE;
pub const IS_IO_COMMAND_SET_OFFSET: usize = COMMAND_OFFSET + 64;
pub const COMPLETION_OFFSET: usize = IS_IO_COMMAND_SET_OFFSET + 4;
pub const DATA_BUFFER_OFFSET_FIELD: usize = COMPLETION_OFFSET + 16;
pub const DATA_BUFFER_LENGTH_FIELD: usize = DATA_BUFFER_OFFSET_FIELD + 4;
const RESERVED_DWORDS: usize = 10;

/// Bytes preceding the data region; also the declared data offset.
pub const NVME_PASSTHROUGH_SIZE: usize = DATA_BUFFER_LENGTH_FIELD + 4 + RESERVED_DWORDS * 4;

// Driver requires a DWORD aligned data offset.
const _: () = assert!(NVME_PASSTHROUGH_SIZE % 4 == 0);

/// How the data region of a passthrough request is populated.
#[derive(Debug, Clone, Copy)]
pub enum Transfer<'a> {
    None,
    /// Host to device; bytes are copied in before submission.
    ToDevice(&'a [u8]),
    /// Device to host; a zeroed region of this many bytes is reserved.
    FromDevice(usize),
}

impl Transfer<'_> {
    pub fn len(&self) -> usize {
        match self {
            Transfer::None => 0,
            Transfer::ToDevice(data) => data.len(),
            Transfer::FromDevice(len) => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NvmeEnvelopeParams {
    pub timeout_secs: u32,
    pub path_id: u8,
    pub io_command_set: bool,
}

#[derive(Debug)]
pub struct NvmePassthroughEnvelope {
    buf: AlignedBuffer,
}

impl NvmePassthroughEnvelope {
    pub fn build(
        params: &NvmeEnvelopeParams,
        cdw: &[u32; 16],
        transfer: Transfer<'_>,
        alignment: usize,
    ) -> Result<Self, RstError> {
        let data_len = transfer.len();
        let declared_len = u32::try_from(data_len).map_err(|_| {
            RstError::bad_parameter(format!("data transfer of {data_len} bytes is too large"))
        })?;
        let total = NVME_PASSTHROUGH_SIZE
            .checked_add(data_len)
            .ok_or(RstError::MemoryFailure { size: usize::MAX })?;

        let mut buf = AlignedBuffer::zeroed(total, alignment)?;

        SrbIoControl::new(
            INTEL_NVM_SIGNATURE,
            params.timeout_secs,
            IOCTL_NVME_PASSTHROUGH,
            (total - SrbIoControl::SIZE) as u32,
        )
        .write_to(&mut buf[..])?;
        AddressBlock::new(NVME_PASS_THROUGH_VERSION, params.path_id)
            .write_to(&mut buf[SrbIoControl::SIZE..])?;

        for (i, dword) in cdw.iter().enumerate() {
            let at = COMMAND_OFFSET + i * 4;
            LittleEndian::write_u32(&mut buf[at..at + 4], *dword);
        }
        buf[IS_IO_COMMAND_SET_OFFSET] = params.io_command_set as u8;

        let (offset, length) = match transfer {
            Transfer::None => (0, 0),
            Transfer::ToDevice(data) => {
                buf[NVME_PASSTHROUGH_SIZE..].copy_from_slice(data);
                (NVME_PASSTHROUGH_SIZE as u32, declared_len)
            }
            Transfer::FromDevice(_) => (NVME_PASSTHROUGH_SIZE as u32, declared_len),
        };
        LittleEndian::write_u32(
            &mut buf[DATA_BUFFER_OFFSET_FIELD..DATA_BUFFER_OFFSET_FIELD + 4],
            offset,
        );
        LittleEndian::write_u32(
            &mut buf[DATA_BUFFER_LENGTH_FIELD..DATA_BUFFER_LENGTH_FIELD + 4],
            length,
        );

        Ok(Self { buf })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn header(&self) -> Result<SrbIoControl, RstError> {
        Ok(SrbIoControl::from_bytes(&self.buf)?)
    }

    pub fn command_dword(&self, index: usize) -> u32 {
        let at = COMMAND_OFFSET + index * 4;
        LittleEndian::read_u32(&self.buf[at..at + 4])
    }

    pub fn is_io_command_set(&self) -> bool {
        self.buf[IS_IO_COMMAND_SET_OFFSET] != 0
    }

    pub fn data_buffer_offset(&self) -> u32 {
        LittleEndian::read_u32(&self.buf[DATA_BUFFER_OFFSET_FIELD..DATA_BUFFER_OFFSET_FIELD + 4])
    }

    pub fn data_buffer_length(&self) -> u32 {
        LittleEndian::read_u32(&self.buf[DATA_BUFFER_LENGTH_FIELD..DATA_BUFFER_LENGTH_FIELD + 4])
    }

    /// Completion queue entry dwords 0..3 as written back by the driver.
    pub fn completion(&self) -> [u32; 4] {
        let mut out = [0u32; 4];
        for (i, dw) in out.iter_mut().enumerate() {
            let at = COMPLETION_OFFSET + i * 4;
            *dw = LittleEndian::read_u32(&self.buf[at..at + 4]);
        }
        out
    }

    pub fn data(&self) -> &[u8] {
        &self.buf[NVME_PASSTHROUGH_SIZE..]
    }
}
