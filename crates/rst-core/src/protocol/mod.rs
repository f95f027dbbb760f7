//! Protocol module - RST miniport request layouts.

pub mod constants;
pub mod envelope;
pub mod firmware;
pub mod header;
pub mod nvme;

pub use constants::*;
pub use envelope::{EnvelopeParams, FIRMWARE_ENVELOPE_SIZE, FirmwareEnvelope};
pub use firmware::{FirmwareActivate, FirmwareDownload, FirmwareInfo, FirmwareSlotInfo};
pub use header::{AddressBlock, FirmwareRequestBlock, HeaderError, SrbIoControl};
pub use nvme::{NVME_PASSTHROUGH_SIZE, NvmeEnvelopeParams, NvmePassthroughEnvelope, Transfer};
