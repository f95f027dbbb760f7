//! Device handle and the per-device state this crate reads and caches.

use crate::error::RstError;
use crate::protocol::constants::DEFAULT_COMMAND_TIMEOUT_SECS;

/// Protocol family of the attached drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriveType {
    Ata,
    Scsi,
    Nvme,
    #[default]
    Unknown,
}

/// Native OS SCSI address of the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScsiAddress {
    pub port_number: u8,
    pub path_id: u8,
    pub target_id: u8,
    pub lun: u8,
}

/// Cached answer to "can this device take vendor firmware requests, and how".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityRecord {
    pub supported: bool,
    pub max_transfer_size: u32,
    pub payload_alignment: u32,
}

/// RAID/CSMI port addressing discovered during enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RaidAddress {
    pub port_identifier: u8,
    /// Set when enumeration filled in `port_identifier`.
    pub info_valid: bool,
    /// Written once by the capability probe.
    pub firmware_support: Option<CapabilityRecord>,
}

/// Static description of an open device.
#[derive(Debug, Clone)]
pub struct DriveInfo {
    pub drive_type: DriveType,
    /// T10 vendor identification from INQUIRY.
    pub t10_vendor_ident: String,
    /// Device default timeout; 0 means none.
    pub default_timeout_secs: u32,
    /// Minimum DMA alignment for request buffers.
    pub minimum_alignment: usize,
    pub scsi_address: ScsiAddress,
}

impl Default for DriveInfo {
    fn default() -> Self {
        Self {
            drive_type: DriveType::Unknown,
            t10_vendor_ident: String::new(),
            default_timeout_secs: 0,
            minimum_alignment: 1,
            scsi_address: ScsiAddress::default(),
        }
    }
}

/// An open storage device reachable through the RST miniport.
///
/// A device without a transport stands in for a null/closed handle: every
/// operation on it fails with `BadParameter` before doing any work.
pub struct RstDevice<T> {
    transport: Option<T>,
    pub info: DriveInfo,
    pub raid: Option<RaidAddress>,
}

impl<T> RstDevice<T> {
    pub fn new(transport: T, info: DriveInfo) -> Self {
        Self {
            transport: Some(transport),
            info,
            raid: None,
        }
    }

    /// A device record with no open handle.
    pub fn detached(info: DriveInfo) -> Self {
        Self {
            transport: None,
            info,
            raid: None,
        }
    }

    pub fn with_raid_address(mut self, raid: RaidAddress) -> Self {
        self.raid = Some(raid);
        self
    }

    pub fn transport(&self) -> Result<&T, RstError> {
        self.transport
            .as_ref()
            .ok_or_else(|| RstError::bad_parameter("device handle is not open"))
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Path id for request addressing: the RAID port when known, else the OS path.
    pub fn path_id(&self) -> u8 {
        match &self.raid {
            Some(raid) if raid.info_valid => raid.port_identifier,
            _ => self.info.scsi_address.path_id,
        }
    }

    /// Effective timeout for a request asking for `requested_secs`.
    pub fn resolve_timeout(&self, requested_secs: u32) -> u32 {
        resolve_timeout(self.info.default_timeout_secs, requested_secs)
    }

    pub fn capability(&self) -> Option<CapabilityRecord> {
        self.raid.as_ref().and_then(|r| r.firmware_support)
    }

    pub fn is_nvme(&self) -> bool {
        self.info.drive_type == DriveType::Nvme
    }
}

/// A longer device default wins; otherwise the request, or 15s when both are 0.
pub fn resolve_timeout(device_default_secs: u32, requested_secs: u32) -> u32 {
    if device_default_secs > 0 && device_default_secs > requested_secs {
        device_default_secs
    } else if requested_secs != 0 {
        requested_secs
    } else {
        DEFAULT_COMMAND_TIMEOUT_SECS
    }
}
