//! Payload structures carried by RAID firmware function requests.
//!
//! These mirror the Windows `STORAGE_HW_FIRMWARE_*` V2 layouts used by the RST driver.

use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

use crate::protocol::constants::{
    FIRMWARE_ACTIVATE_STRUCTURE_VERSION, FIRMWARE_DOWNLOAD_STRUCTURE_VERSION_V2,
    FIRMWARE_INFO_MAX_SLOTS, FIRMWARE_INFO_STRUCTURE_VERSION_V2,
};
use crate::protocol::header::HeaderError;

/// One firmware slot entry (24 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareSlotInfo {
    pub slot_number: u8,
    pub read_only: bool,
    pub revision: [u8; 16],
}

impl FirmwareSlotInfo {
    pub const SIZE: usize = 24;

    /// Revision as printable text with trailing padding removed.
    pub fn revision_str(&self) -> String {
        String::from_utf8_lossy(&self.revision)
            .trim_end_matches(['\0', ' '])
            .to_string()
    }

    fn write_to(&self, buf: &mut [u8]) {
        buf[0] = self.slot_number;
        buf[1] = self.read_only as u8;
        buf[8..24].copy_from_slice(&self.revision);
    }

    fn from_bytes(data: &[u8]) -> Self {
        let mut revision = [0u8; 16];
        revision.copy_from_slice(&data[8..24]);
        Self {
            slot_number: data[0],
            read_only: data[1] != 0,
            revision,
        }
    }
}

/// Firmware info V2 (24 byte header followed by slot entries).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirmwareInfo {
    pub upgrade_support: bool,
    pub slot_count: u8,
    pub active_slot: u8,
    pub pending_activate_slot: u8,
    pub firmware_shared: bool,
    pub image_payload_alignment: u32,
    pub image_payload_max_size: u32,
    pub slots: Vec<FirmwareSlotInfo>,
}

impl FirmwareInfo {
    pub const HEADER_SIZE: usize = 24;
    /// Buffer size sent with a GetInfo request.
    pub const REQUEST_SIZE: usize = Self::HEADER_SIZE + FirmwareSlotInfo::SIZE * FIRMWARE_INFO_MAX_SLOTS;

    /// Zeroed GetInfo payload with only version and size filled in.
    pub fn request_payload() -> Vec<u8> {
        let mut buf = vec![0u8; Self::REQUEST_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], FIRMWARE_INFO_STRUCTURE_VERSION_V2);
        LittleEndian::write_u32(&mut buf[4..8], Self::HEADER_SIZE as u32);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        if data.len() < Self::HEADER_SIZE {
            return Err(HeaderError::BufferTooSmall {
                expected: Self::HEADER_SIZE,
                actual: data.len(),
            });
        }

        let slot_count = data[9];
        let slots = data[Self::HEADER_SIZE..]
            .chunks_exact(FirmwareSlotInfo::SIZE)
            .take((slot_count as usize).min(FIRMWARE_INFO_MAX_SLOTS))
            .map(FirmwareSlotInfo::from_bytes)
            .collect();

        Ok(Self {
            upgrade_support: data[8] != 0,
            slot_count,
            active_slot: data[10],
            pending_activate_slot: data[11],
            firmware_shared: data[12] != 0,
            image_payload_alignment: LittleEndian::read_u32(&data[16..20]),
            image_payload_max_size: LittleEndian::read_u32(&data[20..24]),
            slots,
        })
    }

    /// Encode as the driver would return it.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Self::request_payload();
        buf[8] = self.upgrade_support as u8;
        buf[9] = self.slot_count;
        buf[10] = self.active_slot;
        buf[11] = self.pending_activate_slot;
        buf[12] = self.firmware_shared as u8;
        LittleEndian::write_u32(&mut buf[16..20], self.image_payload_alignment);
        LittleEndian::write_u32(&mut buf[20..24], self.image_payload_max_size);
        for (i, slot) in self.slots.iter().take(FIRMWARE_INFO_MAX_SLOTS).enumerate() {
            let at = Self::HEADER_SIZE + i * FirmwareSlotInfo::SIZE;
            slot.write_to(&mut buf[at..at + FirmwareSlotInfo::SIZE]);
        }
        buf
    }
}

impl fmt::Display for FirmwareInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Upgrade supported:  {}", self.upgrade_support)?;
        writeln!(f, "Slot count:         {}", self.slot_count)?;
        writeln!(f, "Active slot:        {}", self.active_slot)?;
        writeln!(f, "Pending activate:   {}", self.pending_activate_slot)?;
        writeln!(f, "Firmware shared:    {}", self.firmware_shared)?;
        writeln!(f, "Payload alignment:  {} bytes", self.image_payload_alignment)?;
        writeln!(f, "Max payload size:   {} bytes", self.image_payload_max_size)?;
        for slot in &self.slots {
            writeln!(
                f,
                "  Slot {}: {:<16} {}",
                slot.slot_number,
                slot.revision_str(),
                if slot.read_only { "(read-only)" } else { "" }
            )?;
        }
        Ok(())
    }
}

/// Firmware download V2 (32 byte header followed by image bytes).
#[derive(Debug, Clone, Copy)]
pub struct FirmwareDownload<'a> {
    pub offset: u64,
    pub slot: u8,
    pub image: &'a [u8],
}

impl FirmwareDownload<'_> {
    pub const HEADER_SIZE: usize = 32;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::HEADER_SIZE + self.image.len()];
        LittleEndian::write_u32(&mut buf[0..4], FIRMWARE_DOWNLOAD_STRUCTURE_VERSION_V2);
        LittleEndian::write_u32(&mut buf[4..8], Self::HEADER_SIZE as u32);
        LittleEndian::write_u64(&mut buf[8..16], self.offset);
        LittleEndian::write_u64(&mut buf[16..24], self.image.len() as u64);
        buf[24] = self.slot;
        LittleEndian::write_u32(&mut buf[28..32], self.image.len() as u32);
        buf[Self::HEADER_SIZE..].copy_from_slice(self.image);
        buf
    }
}

/// Firmware activate (12 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareActivate {
    pub slot: u8,
}

impl FirmwareActivate {
    pub const SIZE: usize = 12;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_u32(&mut buf[0..4], FIRMWARE_ACTIVATE_STRUCTURE_VERSION);
        LittleEndian::write_u32(&mut buf[4..8], Self::SIZE as u32);
        buf[8] = self.slot;
        buf
    }
}
