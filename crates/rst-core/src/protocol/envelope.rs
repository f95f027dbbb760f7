//! RAID firmware request envelope.
//!
//! Layout (all little-endian):
//!
//! ```text
//! 0x00  SRB_IO_CONTROL          28 bytes
//! 0x1C  version/path/target/lun  4 bytes
//! 0x20  firmware request block  24 bytes
//! 0x38  payload                  DataBufferLength bytes
//! ```

use byteorder::{ByteOrder, LittleEndian};

use crate::buffer::AlignedBuffer;
use crate::error::RstError;
use crate::protocol::constants::{
    FIRMWARE_REQUEST_BLOCK_STRUCTURE_VERSION, INTEL_RAID_FW_SIGNATURE, IOCTL_RAID_FIRMWARE,
    RAID_FIRMWARE_REQUEST_BLOCK_VERSION,
};
use crate::protocol::header::{AddressBlock, FirmwareRequestBlock, SrbIoControl};

pub const ADDRESS_BLOCK_OFFSET: usize = SrbIoControl::SIZE;
pub const REQUEST_BLOCK_OFFSET: usize = ADDRESS_BLOCK_OFFSET + AddressBlock::SIZE;

/// Bytes preceding the payload; also the payload's declared offset.
pub const FIRMWARE_ENVELOPE_SIZE: usize = REQUEST_BLOCK_OFFSET + FirmwareRequestBlock::SIZE;

// The driver requires the payload offset to be a multiple of the pointer size.
const _: () = assert!(FIRMWARE_ENVELOPE_SIZE % std::mem::size_of::<usize>() == 0);

/// Per-request values written into the envelope headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeParams {
    pub timeout_secs: u32,
    pub path_id: u8,
    pub function: u32,
    pub flags: u32,
}

/// A fully built firmware request, ready to be submitted in place.
#[derive(Debug)]
pub struct FirmwareEnvelope {
    buf: AlignedBuffer,
    has_payload: bool,
}

impl FirmwareEnvelope {
    pub fn build(
        params: &EnvelopeParams,
        payload: Option<&[u8]>,
        alignment: usize,
    ) -> Result<Self, RstError> {
        let payload_len = payload.map_or(0, <[u8]>::len);
        let declared_len = u32::try_from(payload_len).map_err(|_| {
            RstError::bad_parameter(format!("payload of {payload_len} bytes is too large"))
        })?;
        let total = FIRMWARE_ENVELOPE_SIZE
            .checked_add(payload_len)
            .ok_or(RstError::MemoryFailure { size: usize::MAX })?;

        let mut buf = AlignedBuffer::zeroed(total, alignment)?;

        SrbIoControl::new(
            INTEL_RAID_FW_SIGNATURE,
            params.timeout_secs,
            IOCTL_RAID_FIRMWARE,
            (total - SrbIoControl::SIZE) as u32,
        )
        .write_to(&mut buf[..])?;

        AddressBlock::new(RAID_FIRMWARE_REQUEST_BLOCK_VERSION, params.path_id)
            .write_to(&mut buf[ADDRESS_BLOCK_OFFSET..])?;

        let mut block = FirmwareRequestBlock {
            version: FIRMWARE_REQUEST_BLOCK_STRUCTURE_VERSION,
            size: FirmwareRequestBlock::SIZE as u32,
            function: params.function,
            flags: params.flags,
            data_buffer_offset: 0,
            data_buffer_length: 0,
        };
        if let Some(data) = payload {
            block.data_buffer_offset = FIRMWARE_ENVELOPE_SIZE as u32;
            block.data_buffer_length = declared_len;
            buf[FIRMWARE_ENVELOPE_SIZE..].copy_from_slice(data);
        }
        block.write_to(&mut buf[REQUEST_BLOCK_OFFSET..])?;

        Ok(Self {
            buf,
            has_payload: payload.is_some(),
        })
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

    pub fn request_block(&self) -> Result<FirmwareRequestBlock, RstError> {
        Ok(FirmwareRequestBlock::from_bytes(
            &self.buf[REQUEST_BLOCK_OFFSET..],
        )?)
    }

    /// Vendor return code the driver wrote into the SRB header.
    pub fn return_code(&self) -> u32 {
        LittleEndian::read_u32(
            &self.buf[SrbIoControl::RETURN_CODE_OFFSET..SrbIoControl::RETURN_CODE_OFFSET + 4],
        )
    }

    /// Trailing payload region, or an empty slice when none was supplied.
    pub fn payload(&self) -> &[u8] {
        if self.has_payload {
            &self.buf[FIRMWARE_ENVELOPE_SIZE..]
        } else {
            &[]
        }
    }
}
