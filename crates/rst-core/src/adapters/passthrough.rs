//! Generic NVMe admin/IO command passthrough.

use tracing::{debug, instrument};

use crate::command::{CompletionData, DataDirection, NvmeCmdCtx, NvmeCommandSet};
use crate::device::RstDevice;
use crate::error::RstError;
use crate::protocol::constants::IOCTL_SCSI_MINIPORT;
use crate::protocol::nvme::{NvmeEnvelopeParams, NvmePassthroughEnvelope, Transfer};
use crate::transport::{IoctlTransport, submit};

/// Build the passthrough envelope for `ctx` without submitting it.
pub fn build_passthrough<T>(
    device: &RstDevice<T>,
    ctx: &NvmeCmdCtx,
) -> Result<NvmePassthroughEnvelope, RstError> {
    device.transport()?;
    let transfer = match ctx.direction {
        DataDirection::None => Transfer::None,
        DataDirection::ToDevice => Transfer::ToDevice(&ctx.data),
        DataDirection::FromDevice => Transfer::FromDevice(ctx.data.len()),
        DataDirection::Bidirectional => {
            return Err(RstError::not_available(
                "bidirectional transfers are not supported by NVMe passthrough",
            ));
        }
    };
    let params = NvmeEnvelopeParams {
        timeout_secs: device.resolve_timeout(ctx.timeout_secs),
        path_id: device.path_id(),
        io_command_set: ctx.command_set == NvmeCommandSet::Io,
    };
    NvmePassthroughEnvelope::build(&params, &ctx.cmd.cdw, transfer, device.info.minimum_alignment)
}

/// Send an arbitrary NVMe command through the driver.
///
/// The driver only honors some opcodes; anything is attempted. Completion
/// dwords and the command time are filled in whenever the call was issued.
#[instrument(level = "debug", skip(device, ctx), fields(opcode = ctx.cmd.opcode(), set = ?ctx.command_set))]
pub fn send_passthrough<T: IoctlTransport>(
    device: &RstDevice<T>,
    ctx: &mut NvmeCmdCtx,
) -> Result<(), RstError> {
    let transport = device.transport()?;
    let mut envelope = build_passthrough(device, ctx)?;
    debug!(size = envelope.len(), "NVMe passthrough built");

    let outcome = submit(transport, IOCTL_SCSI_MINIPORT, envelope.as_bytes_mut())?;

    if outcome.success && ctx.direction == DataDirection::FromDevice {
        ctx.data.copy_from_slice(envelope.data());
    }
    ctx.completion = CompletionData::from_dwords(envelope.completion());
    ctx.command_time = Some(outcome.elapsed);
    ctx.vendor_return_code = Some(envelope.header()?.return_code);

    outcome.into_result().map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::NvmeCommand;
    use crate::device::DriveInfo;
    use crate::protocol::nvme::{COMPLETION_OFFSET, NVME_PASSTHROUGH_SIZE};
    use crate::transport::{MockReply, MockTransport};

    const IDENTIFY: u8 = 0x06;

    fn completion_bytes() -> Vec<u8> {
        [0xAAu32, 0xBB, 0xCC, 0xDD]
            .iter()
            .flat_map(|d| d.to_le_bytes())
            .collect()
    }

    #[test]
    fn test_identify_reads_back_data() {
        let mock = MockTransport::new();
        mock.queue_reply(
            MockReply::success()
                .with_bytes(COMPLETION_OFFSET, completion_bytes())
                .with_bytes(NVME_PASSTHROUGH_SIZE, vec![0x7E; 16]),
        );
        let dev = RstDevice::new(mock.clone(), DriveInfo::default());

        let mut cmd = NvmeCommand::new(IDENTIFY);
        cmd.cdw[10] = 1;
        let mut ctx = NvmeCmdCtx::admin(cmd, DataDirection::FromDevice, vec![0; 4096]);
        send_passthrough(&dev, &mut ctx).unwrap();

        assert_eq!(&ctx.data[..16], &[0x7E; 16]);
        assert!(ctx.data[16..].iter().all(|&b| b == 0));
        assert!(ctx.completion.dw3_valid);
        assert_eq!(ctx.completion.command_specific, 0xAA);
        assert_eq!(ctx.completion.status_and_cid, 0xDD);
        assert!(ctx.command_time.is_some());

        let req = &mock.submissions()[0].request;
        assert_eq!(req.len(), NVME_PASSTHROUGH_SIZE + 4096);
        assert_eq!(&req[4..12], b"IntelNvm");
        assert_eq!(&req[116..120], &(NVME_PASSTHROUGH_SIZE as u32).to_le_bytes());
        assert_eq!(&req[120..124], &4096u32.to_le_bytes());
        assert_eq!(req[96], 0);
    }

    #[test]
    fn test_io_write_copies_data_in() {
        let mock = MockTransport::new();
        let dev = RstDevice::new(mock.clone(), DriveInfo::default());

        let mut ctx = NvmeCmdCtx::io(NvmeCommand::new(0x01), DataDirection::ToDevice, vec![0x42; 512]);
        send_passthrough(&dev, &mut ctx).unwrap();

        let req = &mock.submissions()[0].request;
        assert_eq!(req[96], 1);
        assert_eq!(&req[NVME_PASSTHROUGH_SIZE..], &[0x42; 512][..]);
    }

    #[test]
    fn test_no_data_has_zero_offset() {
        let dev = RstDevice::new(MockTransport::new(), DriveInfo::default());
        let ctx = NvmeCmdCtx::admin(NvmeCommand::new(0x0A), DataDirection::None, Vec::new());
        let env = build_passthrough(&dev, &ctx).unwrap();
        assert_eq!(env.data_buffer_offset(), 0);
        assert_eq!(env.data_buffer_length(), 0);
        assert_eq!(env.len(), NVME_PASSTHROUGH_SIZE);
    }

    #[test]
    fn test_bidirectional_not_available() {
        let mock = MockTransport::new();
        let dev = RstDevice::new(mock.clone(), DriveInfo::default());
        let mut ctx = NvmeCmdCtx::admin(NvmeCommand::new(0x06), DataDirection::Bidirectional, vec![0; 8]);

        let err = send_passthrough(&dev, &mut ctx).unwrap_err();
        assert!(matches!(err, RstError::CommandNotAvailable(_)));
        assert!(mock.submissions().is_empty());
        assert_eq!(mock.completions_created(), 0);
    }

    #[test]
    fn test_failure_still_fills_completion() {
        let mock = MockTransport::new();
        mock.queue_reply(MockReply::pending(false));
        let dev = RstDevice::new(mock.clone(), DriveInfo::default());

        let mut ctx = NvmeCmdCtx::admin(NvmeCommand::new(0x06), DataDirection::FromDevice, vec![0; 64]);
        let err = send_passthrough(&dev, &mut ctx).unwrap_err();
        assert!(matches!(err, RstError::Failure { .. }));
        assert!(ctx.completion.dw0_valid);
        assert!(ctx.command_time.is_some());
    }

    #[test]
    fn test_timeout_precedence() {
        let mut info = DriveInfo {
            default_timeout_secs: 30,
            ..Default::default()
        };
        let ctx = |t| NvmeCmdCtx {
            timeout_secs: t,
            ..NvmeCmdCtx::admin(NvmeCommand::new(0x06), DataDirection::None, Vec::new())
        };

        let dev = RstDevice::new((), info.clone());
        let env = build_passthrough(&dev, &ctx(10)).unwrap();
        assert_eq!(env.header().unwrap().timeout, 30);

        info.default_timeout_secs = 0;
        let dev = RstDevice::new((), info);
        let env = build_passthrough(&dev, &ctx(0)).unwrap();
        assert_eq!(env.header().unwrap().timeout, 15);
    }
}
