//! RST-Core: firmware update and NVMe passthrough through the Intel RST driver.
//!
//! Drives behind an Intel Rapid Storage Technology controller cannot be sent
//! SCSI WRITE BUFFER, ATA DOWNLOAD MICROCODE or NVMe firmware commands
//! directly. This crate translates them into the driver's vendor SRB requests
//! and maps the single firmware return path back to each calling convention.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, SRB headers, envelope and payload layouts
//! - **Transport**: Miniport IOCTL abstraction (Windows, mock) and the invoker
//! - **Request**: Firmware operation builder
//! - **Classify**: SCSI/ATA firmware command recognition
//! - **Adapters**: SCSI/ATA, NVMe admin and NVMe passthrough translators
//! - **Probe**: Firmware capability discovery
//! - **Session**: Segmented firmware update orchestrator
//! - **Events**: Observer pattern for progress reporting
//!
//! # Example
//!
//! ```no_run
//! use rst_core::{DriveInfo, DriveType, RstDevice, supports_firmware_download};
//! use rst_core::session::{FirmwareUpdater, UpdateConfig};
//! # fn open() -> rst_core::MockTransport { rst_core::MockTransport::new() }
//!
//! let info = DriveInfo {
//!     drive_type: DriveType::Nvme,
//!     ..Default::default()
//! };
//! let mut device = RstDevice::new(open(), info);
//! if supports_firmware_download(&mut device) {
//!     let updater = FirmwareUpdater::new(UpdateConfig::default());
//!     updater.run(&device, &std::fs::read("fw.bin")?)?;
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod adapters;
pub mod buffer;
pub mod classify;
pub mod command;
pub mod device;
pub mod error;
pub mod events;
pub mod probe;
pub mod protocol;
pub mod request;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use adapters::{send_nvme_command, send_passthrough};
pub use classify::{Classification, classify};
pub use command::{
    AtaCmdOpts, CompletionData, DataDirection, NvmeCmdCtx, NvmeCommand, NvmeCommandSet, ScsiIoCtx,
    TaskFileRegisters,
};
pub use device::{CapabilityRecord, DriveInfo, DriveType, RaidAddress, RstDevice, ScsiAddress};
pub use error::{RstError, Status};
pub use events::{TracingObserver, UpdateEvent, UpdateObserver, UpdatePhase};
pub use probe::{query_firmware_info, supports_firmware_download};
pub use protocol::{FirmwareInfo, FirmwareSlotInfo};
pub use request::{FirmwareOperation, FirmwareResponse, build_and_issue, issue_firmware_operation};
pub use session::{FirmwareUpdater, SegmentPlan, UpdateConfig};
pub use transport::{IoctlTransport, MockTransport, TransportError};
#[cfg(windows)]
pub use transport::WindowsTransport;
