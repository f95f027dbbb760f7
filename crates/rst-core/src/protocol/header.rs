//! Fixed headers shared by every RST miniport request.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn check_len(data: &[u8], expected: usize) -> Result<(), HeaderError> {
    if data.len() < expected {
        return Err(HeaderError::BufferTooSmall {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// SRB_IO_CONTROL (28 bytes / 0x1C)
///
/// Leads every miniport request. `length` counts the bytes that follow it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SrbIoControl {
    pub signature: [u8; 8],
    pub timeout: u32,
    pub control_code: u32,
    pub return_code: u32,
    pub length: u32,
}

impl SrbIoControl {
    pub const SIZE: usize = 28;
    pub const RETURN_CODE_OFFSET: usize = 20;

    pub fn new(signature: &[u8; 8], timeout: u32, control_code: u32, length: u32) -> Self {
        Self {
            signature: *signature,
            timeout,
            control_code,
            return_code: 0,
            length,
        }
    }

    pub fn write_to(&self, buf: &mut [u8]) -> Result<(), HeaderError> {
        check_len(buf, Self::SIZE)?;
        LittleEndian::write_u32(&mut buf[0..4], Self::SIZE as u32);
        buf[4..12].copy_from_slice(&self.signature);
        LittleEndian::write_u32(&mut buf[12..16], self.timeout);
        LittleEndian::write_u32(&mut buf[16..20], self.control_code);
        LittleEndian::write_u32(&mut buf[20..24], self.return_code);
        LittleEndian::write_u32(&mut buf[24..28], self.length);
        Ok(())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        check_len(data, Self::SIZE)?;
        let mut signature = [0u8; 8];
        signature.copy_from_slice(&data[4..12]);
        let mut cursor = Cursor::new(&data[12..Self::SIZE]);
        Ok(Self {
            signature,
            timeout: cursor.read_u32::<LittleEndian>()?,
            control_code: cursor.read_u32::<LittleEndian>()?,
            return_code: cursor.read_u32::<LittleEndian>()?,
            length: cursor.read_u32::<LittleEndian>()?,
        })
    }
}

/// Version byte plus SCSI address (4 bytes).
///
/// Only `path_id` is meaningful to the RST driver; target and lun are reserved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddressBlock {
    pub version: u8,
    pub path_id: u8,
    pub target_id: u8,
    pub lun: u8,
}

impl AddressBlock {
    pub const SIZE: usize = 4;

    pub fn new(version: u8, path_id: u8) -> Self {
        Self {
            version,
            path_id,
            target_id: 0,
            lun: 0,
        }
    }

    pub fn write_to(&self, buf: &mut [u8]) -> Result<(), HeaderError> {
        check_len(buf, Self::SIZE)?;
        buf[0] = self.version;
        buf[1] = self.path_id;
        buf[2] = self.target_id;
        buf[3] = self.lun;
        Ok(())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        check_len(data, Self::SIZE)?;
        Ok(Self {
            version: data[0],
            path_id: data[1],
            target_id: data[2],
            lun: data[3],
        })
    }
}

/// Firmware request block (24 bytes / 0x18)
///
/// `data_buffer_offset` is measured from the start of the SRB header; 0 means no payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FirmwareRequestBlock {
    pub version: u32,
    pub size: u32,
    pub function: u32,
    pub flags: u32,
    pub data_buffer_offset: u32,
    pub data_buffer_length: u32,
}

impl FirmwareRequestBlock {
    pub const SIZE: usize = 24;

    pub fn write_to(&self, buf: &mut [u8]) -> Result<(), HeaderError> {
        check_len(buf, Self::SIZE)?;
        LittleEndian::write_u32(&mut buf[0..4], self.version);
        LittleEndian::write_u32(&mut buf[4..8], self.size);
        LittleEndian::write_u32(&mut buf[8..12], self.function);
        LittleEndian::write_u32(&mut buf[12..16], self.flags);
        LittleEndian::write_u32(&mut buf[16..20], self.data_buffer_offset);
        LittleEndian::write_u32(&mut buf[20..24], self.data_buffer_length);
        Ok(())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        check_len(data, Self::SIZE)?;
        let mut cursor = Cursor::new(data);
        Ok(Self {
            version: cursor.read_u32::<LittleEndian>()?,
            size: cursor.read_u32::<LittleEndian>()?,
            function: cursor.read_u32::<LittleEndian>()?,
            flags: cursor.read_u32::<LittleEndian>()?,
            data_buffer_offset: cursor.read_u32::<LittleEndian>()?,
            data_buffer_length: cursor.read_u32::<LittleEndian>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::*;

    #[test]
    fn test_srb_header_layout() {
        let header = SrbIoControl::new(INTEL_RAID_FW_SIGNATURE, 30, IOCTL_RAID_FIRMWARE, 0x1234);
        let mut buf = [0u8; SrbIoControl::SIZE];
        header.write_to(&mut buf).unwrap();

        assert_eq!(&buf[0..4], &28u32.to_le_bytes());
        assert_eq!(&buf[4..12], b"INTELFW ");
        assert_eq!(&buf[12..16], &30u32.to_le_bytes());
        assert_eq!(&buf[16..20], &IOCTL_RAID_FIRMWARE.to_le_bytes());
        assert_eq!(&buf[24..28], &0x1234u32.to_le_bytes());

        let parsed = SrbIoControl::from_bytes(&buf).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let mut buf = [0u8; 10];
        let err = FirmwareRequestBlock::default().write_to(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            HeaderError::BufferTooSmall {
                expected: 24,
                actual: 10
            }
        ));
        assert!(AddressBlock::from_bytes(&buf[..3]).is_err());
    }
}
