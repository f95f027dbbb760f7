//! Firmware update session - segments an image and drives it through the NVMe adapter.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail, ensure};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::adapters::send_nvme_command;
use crate::command::{DataDirection, NvmeCmdCtx, NvmeCommand};
use crate::device::RstDevice;
use crate::events::{TracingObserver, UpdateEvent, UpdateObserver, UpdatePhase};
use crate::protocol::constants::{
    NVME_ADMIN_CMD_ACTIVATE_FW, NVME_ADMIN_CMD_DOWNLOAD_FW, NVME_CA_REPLACE_ACTIVATE_ON_RST,
};
use crate::transport::IoctlTransport;

/// Segment size when neither the config nor the device says otherwise.
pub const DEFAULT_SEGMENT_SIZE: usize = 64 * 1024;

/// Configuration for a firmware update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Path to the firmware image.
    pub image_path: Option<String>,
    /// Slot to commit to (0 lets the controller choose).
    pub slot: u8,
    /// NVMe commit action, 0..=7.
    pub commit_action: u8,
    /// Bytes per download segment; derived from the device when unset.
    pub segment_size: Option<usize>,
    /// Per-command timeout in seconds; 0 uses the device default.
    pub timeout_secs: u32,
    /// Issue Activate Firmware after the last segment.
    pub activate: bool,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            image_path: None,
            slot: 0,
            commit_action: NVME_CA_REPLACE_ACTIVATE_ON_RST,
            segment_size: None,
            timeout_secs: 0,
            activate: true,
        }
    }
}

impl UpdateConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: UpdateConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.slot <= 7, "slot {} out of range 0..=7", self.slot);
        ensure!(
            self.commit_action <= 7,
            "commit action {} out of range 0..=7",
            self.commit_action
        );
        if self.segment_size == Some(0) {
            bail!("segment size must be non-zero");
        }
        Ok(())
    }

    /// CDW10 of the Activate Firmware command.
    pub fn activate_cdw10(&self) -> u32 {
        ((self.commit_action as u32 & 0x7) << 3) | (self.slot as u32 & 0x7)
    }
}

/// One download segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub offset: usize,
    pub len: usize,
    pub first: bool,
    pub last: bool,
}

/// Splits an image into fixed-size segments with a short residual at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentPlan {
    image_len: usize,
    segment_size: usize,
}

impl SegmentPlan {
    pub fn new(image_len: usize, segment_size: usize) -> Result<Self> {
        ensure!(image_len > 0, "firmware image is empty");
        ensure!(segment_size > 0, "segment size must be non-zero");
        Ok(Self {
            image_len,
            segment_size,
        })
    }

    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// Number of segments (including a partial one).
    pub fn total(&self) -> usize {
        self.image_len.div_ceil(self.segment_size)
    }

    pub fn segments(&self) -> impl Iterator<Item = Segment> + '_ {
        let total = self.total();
        (0..total).map(move |i| {
            let offset = i * self.segment_size;
            Segment {
                offset,
                len: (self.image_len - offset).min(self.segment_size),
                first: i == 0,
                last: i + 1 == total,
            }
        })
    }
}

/// What an update did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub segments: usize,
    pub bytes: usize,
    pub activated: bool,
    pub activate_return_code: Option<u32>,
}

/// Drives a complete NVMe firmware update through the RST channel.
pub struct FirmwareUpdater<O: UpdateObserver> {
    config: UpdateConfig,
    observer: Arc<O>,
}

impl FirmwareUpdater<TracingObserver> {
    /// Create an updater with the default tracing observer.
    pub fn new(config: UpdateConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: UpdateObserver> FirmwareUpdater<O> {
    pub fn with_observer(config: UpdateConfig, observer: Arc<O>) -> Self {
        Self { config, observer }
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// Segment size for `device`: the configured one, else the largest
    /// aligned size the device accepts, else [`DEFAULT_SEGMENT_SIZE`].
    pub fn resolve_segment_size<T>(&self, device: &RstDevice<T>) -> Result<usize> {
        let cap = device.capability();
        let alignment = cap.map_or(0, |c| c.payload_alignment as usize);
        let max = cap.map_or(0, |c| c.max_transfer_size as usize);

        if let Some(size) = self.config.segment_size {
            if alignment != 0 && size % alignment != 0 {
                bail!("segment size {size} is not a multiple of the {alignment} byte payload alignment");
            }
            if max != 0 && size > max {
                bail!("segment size {size} exceeds the {max} byte maximum payload");
            }
            return Ok(size);
        }

        match (max, alignment) {
            (0, _) => Ok(DEFAULT_SEGMENT_SIZE),
            (max, 0) => Ok(max),
            (max, alignment) => {
                let size = max - max % alignment;
                ensure!(
                    size > 0,
                    "maximum payload {max} is smaller than the {alignment} byte alignment"
                );
                Ok(size)
            }
        }
    }

    /// Load the configured image and run the update.
    pub fn run_from_config<T: IoctlTransport>(&self, device: &RstDevice<T>) -> Result<UpdateReport> {
        let path = self
            .config
            .image_path
            .as_deref()
            .ok_or_else(|| anyhow!("no firmware image path configured"))?;
        info!(path = %path, "Loading firmware image");
        let image = std::fs::read(path).with_context(|| format!("reading {path}"))?;
        self.run(device, &image)
    }

    /// Download `image` segment by segment, then activate if configured.
    #[instrument(skip(self, device, image), fields(image_len = image.len()))]
    pub fn run<T: IoctlTransport>(&self, device: &RstDevice<T>, image: &[u8]) -> Result<UpdateReport> {
        self.config.validate()?;
        let result = self.run_inner(device, image);
        if let Err(e) = &result {
            self.observer.on_event(&UpdateEvent::Error {
                message: format!("{e:#}"),
            });
        }
        result
    }

    fn run_inner<T: IoctlTransport>(&self, device: &RstDevice<T>, image: &[u8]) -> Result<UpdateReport> {
        device.transport()?;
        let plan = SegmentPlan::new(image.len(), self.resolve_segment_size(device)?)?;
        self.observer.on_event(&UpdateEvent::Plan {
            image_len: image.len(),
            segment_size: plan.segment_size(),
            segments: plan.total(),
        });

        self.observer.on_event(&UpdateEvent::PhaseChanged {
            from: UpdatePhase::Idle,
            to: UpdatePhase::Download,
        });

        let mut report = UpdateReport::default();
        for segment in plan.segments() {
            let mut ctx = self.download_command(image, &segment)?;
            send_nvme_command(device, &mut ctx)
                .with_context(|| format!("downloading segment at offset 0x{:X}", segment.offset))?;

            report.segments += 1;
            report.bytes += segment.len;
            self.observer.on_event(&UpdateEvent::SegmentSent {
                index: report.segments - 1,
                total: plan.total(),
                offset: segment.offset as u64,
                len: segment.len,
                return_code: ctx.vendor_return_code,
            });
        }

        if self.config.activate {
            self.observer.on_event(&UpdateEvent::PhaseChanged {
                from: UpdatePhase::Download,
                to: UpdatePhase::Activate,
            });
            let mut ctx = self.activate_command();
            send_nvme_command(device, &mut ctx).context("activating firmware")?;

            report.activated = true;
            report.activate_return_code = ctx.vendor_return_code;
            self.observer.on_event(&UpdateEvent::Activated {
                slot: self.config.slot,
                action: self.config.commit_action,
                return_code: ctx.vendor_return_code,
            });
        }

        self.observer.on_event(&UpdateEvent::Complete);
        Ok(report)
    }

    fn download_command(&self, image: &[u8], segment: &Segment) -> Result<NvmeCmdCtx> {
        let mut cmd = NvmeCommand::new(NVME_ADMIN_CMD_DOWNLOAD_FW);
        cmd.cdw[10] = u32::try_from(segment.len)?;
        cmd.cdw[11] = u32::try_from(segment.offset)
            .map_err(|_| anyhow!("image offset 0x{:X} does not fit in 32 bits", segment.offset))?;

        let data = image[segment.offset..segment.offset + segment.len].to_vec();
        let mut ctx = NvmeCmdCtx::admin(cmd, DataDirection::ToDevice, data);
        ctx.timeout_secs = self.config.timeout_secs;
        ctx.fwdl_first_segment = segment.first;
        ctx.fwdl_last_segment = segment.last;
        Ok(ctx)
    }

    fn activate_command(&self) -> NvmeCmdCtx {
        let mut cmd = NvmeCommand::new(NVME_ADMIN_CMD_ACTIVATE_FW);
        cmd.cdw[10] = self.config.activate_cdw10();
        let mut ctx = NvmeCmdCtx::admin(cmd, DataDirection::None, Vec::new());
        ctx.timeout_secs = self.config.timeout_secs;
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CapabilityRecord, DriveInfo, DriveType, RaidAddress};
    use crate::events::NullObserver;
    use crate::transport::{MockReply, MockTransport};
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<UpdateEvent>>);

    impl UpdateObserver for Recorder {
        fn on_event(&self, event: &UpdateEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn device(mock: &MockTransport, cap: Option<CapabilityRecord>) -> RstDevice<MockTransport> {
        let info = DriveInfo {
            drive_type: DriveType::Nvme,
            ..Default::default()
        };
        RstDevice::new(mock.clone(), info).with_raid_address(RaidAddress {
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

    fn flags(req: &[u8]) -> u32 {
        u32::from_le_bytes([req[44], req[45], req[46], req[47]])
    }

    #[test]
    fn test_segment_plan() {
        let plan = SegmentPlan::new(300, 128).unwrap();
        let segs: Vec<_> = plan.segments().collect();
        assert_eq!(plan.total(), 3);
        assert_eq!(segs[0], Segment { offset: 0, len: 128, first: true, last: false });
        assert_eq!(segs[2], Segment { offset: 256, len: 44, first: false, last: true });

        let single: Vec<_> = SegmentPlan::new(64, 128).unwrap().segments().collect();
        assert_eq!(single.len(), 1);
        assert!(single[0].first && single[0].last);

        assert!(SegmentPlan::new(0, 128).is_err());
    }

    #[test]
    fn test_segment_size_resolution() {
        let mock = MockTransport::new();
        let updater = FirmwareUpdater::with_observer(UpdateConfig::default(), Arc::new(NullObserver));

        assert_eq!(updater.resolve_segment_size(&device(&mock, None)).unwrap(), DEFAULT_SEGMENT_SIZE);
        assert_eq!(updater.resolve_segment_size(&device(&mock, cap(5000, 512))).unwrap(), 4608);
        assert!(updater.resolve_segment_size(&device(&mock, cap(256, 512))).is_err());

        let updater = FirmwareUpdater::with_observer(
            UpdateConfig {
                segment_size: Some(1000),
                ..Default::default()
            },
            Arc::new(NullObserver),
        );
        assert!(updater.resolve_segment_size(&device(&mock, cap(4096, 512))).is_err());
        assert_eq!(updater.resolve_segment_size(&device(&mock, None)).unwrap(), 1000);
    }

    #[test]
    fn test_update_sends_segments_then_activates() {
        let mock = MockTransport::new();
        let dev = device(&mock, cap(4096, 512));
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let config = UpdateConfig {
            slot: 2,
            commit_action: 3,
            segment_size: Some(1024),
            ..Default::default()
        };
        let updater = FirmwareUpdater::with_observer(config, recorder.clone());

        let image = vec![0x5Au8; 2500];
        let report = updater.run(&dev, &image).unwrap();
        assert_eq!(report.segments, 3);
        assert_eq!(report.bytes, 2500);
        assert!(report.activated);

        let subs = mock.submissions();
        assert_eq!(subs.len(), 4);
        use crate::protocol::constants::*;
        assert_eq!(
            flags(&subs[0].request),
            FIRMWARE_REQUEST_FLAG_CONTROLLER | FIRMWARE_REQUEST_FLAG_FIRST_SEGMENT
        );
        assert_eq!(flags(&subs[1].request), FIRMWARE_REQUEST_FLAG_CONTROLLER);
        assert_eq!(
            flags(&subs[2].request),
            FIRMWARE_REQUEST_FLAG_CONTROLLER | FIRMWARE_REQUEST_FLAG_LAST_SEGMENT
        );
        assert_eq!(
            flags(&subs[3].request),
            FIRMWARE_REQUEST_FLAG_CONTROLLER | FIRMWARE_REQUEST_FLAG_SWITCH_TO_EXISTING_FIRMWARE
        );
        // Last segment: 452 bytes at offset 2048.
        let payload = &subs[2].request[56..];
        assert_eq!(&payload[8..16], &2048u64.to_le_bytes());
        assert_eq!(payload.len(), 32 + 452);

        let events = recorder.0.lock().unwrap();
        assert_eq!(events.last(), Some(&UpdateEvent::Complete));
        assert!(events.iter().any(|e| matches!(e, UpdateEvent::Activated { slot: 2, action: 3, .. })));
    }

    #[test]
    fn test_update_stops_on_failure() {
        let mock = MockTransport::new();
        mock.queue_reply(MockReply::success());
        mock.queue_reply(MockReply::failed(1117));
        let dev = device(&mock, None);
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let config = UpdateConfig {
            segment_size: Some(16),
            ..Default::default()
        };
        let updater = FirmwareUpdater::with_observer(config, recorder.clone());

        assert!(updater.run(&dev, &[0u8; 64]).is_err());
        assert_eq!(mock.submissions().len(), 2);
        let events = recorder.0.lock().unwrap();
        assert!(matches!(events.last(), Some(UpdateEvent::Error { .. })));
    }

    #[test]
    fn test_activate_cdw10() {
        let config = UpdateConfig {
            slot: 3,
            commit_action: 2,
            ..Default::default()
        };
        assert_eq!(config.activate_cdw10(), (2 << 3) | 3);
        assert!(UpdateConfig { commit_action: 8, ..Default::default() }.validate().is_err());
        assert!(UpdateConfig { segment_size: Some(0), ..Default::default() }.validate().is_err());
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("update.toml");
        let config = UpdateConfig {
            image_path: Some("fw.bin".to_string()),
            slot: 1,
            segment_size: Some(4096),
            ..Default::default()
        };
        config.save_to_file(&path).unwrap();
        assert_eq!(UpdateConfig::load_from_file(&path).unwrap(), config);

        let partial: UpdateConfig = toml::from_str("slot = 2").unwrap();
        assert_eq!(partial.slot, 2);
        assert!(partial.activate);
    }
}
