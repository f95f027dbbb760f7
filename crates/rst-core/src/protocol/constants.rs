//! Protocol constants for the Intel RST miniport IOCTL channel.
//!
//! Values are fixed by the RST driver ABI and the SCSI/ATA/NVMe command sets.

// ============================================================================
// Device Control Codes
// ============================================================================

/// Outer `DeviceIoControl` code carrying every SRB_IO_CONTROL request.
pub const IOCTL_SCSI_MINIPORT: u32 = 0x0004_D008;

/// SRB control code for RAID firmware function requests.
/// CTL_CODE(0xF000, 0x010, METHOD_BUFFERED, FILE_ANY_ACCESS)
pub const IOCTL_RAID_FIRMWARE: u32 = 0xF000_0040;

/// SRB control code for NVMe command passthrough.
/// CTL_CODE(0xF000, 0xA02, METHOD_BUFFERED, FILE_ANY_ACCESS)
pub const IOCTL_NVME_PASSTHROUGH: u32 = 0xF000_2808;

// ============================================================================
// Signatures
// ============================================================================

pub const INTEL_RAID_FW_SIGNATURE: &[u8; 8] = b"INTELFW ";
pub const INTEL_NVM_SIGNATURE: &[u8; 8] = b"IntelNvm";

// ============================================================================
// Structure Versions
// ============================================================================

pub const RAID_FIRMWARE_REQUEST_BLOCK_VERSION: u8 = 0x92;
pub const FIRMWARE_REQUEST_BLOCK_STRUCTURE_VERSION: u32 = 0x1;
pub const NVME_PASS_THROUGH_VERSION: u8 = 0x1;

pub const FIRMWARE_INFO_STRUCTURE_VERSION_V2: u32 = 0x2;
pub const FIRMWARE_DOWNLOAD_STRUCTURE_VERSION_V2: u32 = 0x2;
pub const FIRMWARE_ACTIVATE_STRUCTURE_VERSION: u32 = 0x1;

// ============================================================================
// Firmware Functions and Flags
// ============================================================================

pub const FIRMWARE_FUNCTION_GET_INFO: u32 = 0x01;
pub const FIRMWARE_FUNCTION_DOWNLOAD: u32 = 0x02;
pub const FIRMWARE_FUNCTION_ACTIVATE: u32 = 0x03;

/// Request targets the controller rather than a namespace.
pub const FIRMWARE_REQUEST_FLAG_CONTROLLER: u32 = 0x0000_0001;
pub const FIRMWARE_REQUEST_FLAG_LAST_SEGMENT: u32 = 0x0000_0002;
pub const FIRMWARE_REQUEST_FLAG_FIRST_SEGMENT: u32 = 0x0000_0004;
/// Activate an image already present in the slot.
pub const FIRMWARE_REQUEST_FLAG_SWITCH_TO_EXISTING_FIRMWARE: u32 = 0x8000_0000;

/// Slot value the driver treats as "not specified".
pub const FIRMWARE_INFO_INVALID_SLOT: u8 = 0xFF;

/// Slot entries reserved in a GetInfo response.
pub const FIRMWARE_INFO_MAX_SLOTS: usize = 7;

// ============================================================================
// Timeouts
// ============================================================================

pub const DEFAULT_COMMAND_TIMEOUT_SECS: u32 = 15;

// ============================================================================
// SCSI / ATA
// ============================================================================

pub const WRITE_BUFFER_CMD: u8 = 0x3B;
/// WRITE BUFFER mode: download microcode with offsets, save, and defer activate.
pub const SCSI_WB_DL_MICROCODE_OFFSETS_SAVE_DEFER: u8 = 0x0E;
/// WRITE BUFFER mode: activate deferred microcode.
pub const SCSI_WB_ACTIVATE_DEFERRED_MICROCODE: u8 = 0x0F;

pub const ATA_DOWNLOAD_MICROCODE: u8 = 0x92;
pub const ATA_DOWNLOAD_MICROCODE_DMA: u8 = 0x93;
/// DOWNLOAD MICROCODE subcommand: download with offsets and save for future use.
pub const ATA_DL_MICROCODE_OFFSETS_SAVE_FUTURE: u8 = 0x0E;
/// DOWNLOAD MICROCODE subcommand: activate downloaded microcode.
pub const ATA_DL_MICROCODE_ACTIVATE: u8 = 0x0F;

pub const LEGACY_DRIVE_SEC_SIZE: u32 = 512;

/// T10 vendor identification reported by the SCSI-to-NVMe translation layer.
pub const NVME_T10_VENDOR_ID: &str = "NVMe";

// ============================================================================
// NVMe
// ============================================================================

pub const NVME_ADMIN_CMD_ACTIVATE_FW: u8 = 0x10;
pub const NVME_ADMIN_CMD_DOWNLOAD_FW: u8 = 0x11;

/// Firmware commit actions (CDW10 bits 5:3).
pub const NVME_CA_REPLACE_NOT_ACTIVATE: u8 = 0;
pub const NVME_CA_REPLACE_ACTIVATE_ON_RST: u8 = 1;
pub const NVME_CA_ACTIVATE_ON_RST: u8 = 2;
pub const NVME_CA_ACTIVATE_IMMEDIATE: u8 = 3;
