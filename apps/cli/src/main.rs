use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use rst_core::adapters::scsi;
use rst_core::protocol::constants::{
    FIRMWARE_REQUEST_FLAG_CONTROLLER, NVME_ADMIN_CMD_ACTIVATE_FW, NVME_T10_VENDOR_ID,
    SCSI_WB_ACTIVATE_DEFERRED_MICROCODE,
};
use rst_core::session::{FirmwareUpdater, UpdateConfig};
use rst_core::{
    DataDirection, DriveInfo, DriveType, IoctlTransport, NvmeCmdCtx, NvmeCommand, RaidAddress,
    RstDevice, ScsiAddress, ScsiIoCtx, query_firmware_info, send_nvme_command,
    supports_firmware_download,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Intel RST firmware update tool", long_about = None)]
struct Cli {
    #[command(flatten)]
    device: DeviceArgs,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct DeviceArgs {
    /// SCSI port device path
    #[arg(long, default_value = r"\\.\Scsi0:")]
    device: String,

    /// OS SCSI path id
    #[arg(long, default_value_t = 0)]
    path_id: u8,

    /// RAID port identifier; overrides the path id when given
    #[arg(long)]
    port: Option<u8>,

    /// The drive is NVMe
    #[arg(long)]
    nvme: bool,

    /// T10 vendor identification reported by the drive
    #[arg(long)]
    vendor: Option<String>,

    /// Device default command timeout in seconds
    #[arg(long, default_value_t = 0)]
    timeout: u32,

    /// Minimum buffer alignment in bytes
    #[arg(long, default_value_t = 8)]
    alignment: usize,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Query firmware slot and capability information
    Info,

    /// Download a firmware image and optionally activate it (NVMe)
    Update {
        /// Firmware image path
        image: Option<String>,

        /// Load update settings from a TOML file
        #[arg(long)]
        config: Option<String>,

        /// Target slot
        #[arg(long)]
        slot: Option<u8>,

        /// NVMe commit action
        #[arg(long)]
        action: Option<u8>,

        /// Bytes per download segment
        #[arg(long)]
        segment_size: Option<usize>,

        /// Skip activation after download
        #[arg(long)]
        no_activate: bool,

        /// Write the effective settings to a TOML file
        #[arg(long)]
        save_config: Option<String>,
    },

    /// Activate firmware in a slot
    Activate {
        #[arg(long, default_value_t = 0)]
        slot: u8,

        /// NVMe commit action
        #[arg(long, default_value_t = 2)]
        action: u8,
    },

    /// Send a raw NVMe admin command
    Admin {
        /// Opcode (decimal or 0x-prefixed hex)
        #[arg(value_parser = parse_u8)]
        opcode: u8,

        /// Namespace id
        #[arg(long, value_parser = parse_u32, default_value = "0")]
        nsid: u32,

        /// Command dwords 10..15
        #[arg(long = "cdw", value_parser = parse_u32, num_args = 1..=6)]
        cdw: Vec<u32>,

        /// Bytes to read back from the device
        #[arg(long, default_value_t = 0)]
        data_len: usize,
    },
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{s}': {e}"))
}

fn parse_u8(s: &str) -> Result<u8, String> {
    let v = parse_u32(s)?;
    u8::try_from(v).map_err(|_| format!("'{s}' does not fit in a byte"))
}

fn drive_info(args: &DeviceArgs) -> DriveInfo {
    let vendor = match (&args.vendor, args.nvme) {
        (Some(v), _) => v.clone(),
        (None, true) => NVME_T10_VENDOR_ID.to_string(),
        (None, false) => String::new(),
    };
    DriveInfo {
        drive_type: if args.nvme {
            DriveType::Nvme
        } else {
            DriveType::Unknown
        },
        t10_vendor_ident: vendor,
        default_timeout_secs: args.timeout,
        minimum_alignment: args.alignment,
        scsi_address: ScsiAddress {
            path_id: args.path_id,
            ..Default::default()
        },
    }
}

fn hexdump(data: &[u8]) {
    for (i, line) in data.chunks(16).enumerate() {
        let hex: Vec<String> = line.iter().map(|b| format!("{b:02X}")).collect();
        println!("{:08X}  {}", i * 16, hex.join(" "));
    }
}

#[cfg_attr(not(windows), allow(dead_code))]
fn run<T: IoctlTransport>(transport: T, cli: &Cli) -> Result<()> {
    let mut device = RstDevice::new(transport, drive_info(&cli.device));
    // Without a port the probe result has nowhere to be cached.
    device = device.with_raid_address(RaidAddress {
        port_identifier: cli.device.port.unwrap_or(0),
        info_valid: cli.device.port.is_some(),
        firmware_support: None,
    });

    match &cli.command {
        Command::Info => {
            let flags = if device.is_nvme() {
                FIRMWARE_REQUEST_FLAG_CONTROLLER
            } else {
                0
            };
            let fw_info = query_firmware_info(&device, flags).context("querying firmware info")?;
            print!("{fw_info}");
        }

        Command::Update {
            image,
            config,
            slot,
            action,
            segment_size,
            no_activate,
            save_config,
        } => {
            if !device.is_nvme() {
                bail!("firmware update sessions require an NVMe drive (--nvme)");
            }
            let mut update = match config {
                Some(path) => UpdateConfig::load_from_file(path)
                    .with_context(|| format!("loading {path}"))?,
                None => UpdateConfig::default(),
            };
            if let Some(image) = image {
                update.image_path = Some(image.clone());
            }
            if let Some(slot) = slot {
                update.slot = *slot;
            }
            if let Some(action) = action {
                update.commit_action = *action;
            }
            if segment_size.is_some() {
                update.segment_size = *segment_size;
            }
            if *no_activate {
                update.activate = false;
            }
            update.validate()?;
            if let Some(path) = save_config {
                update.save_to_file(path)?;
                info!(path = %path, "Saved update settings");
            }

            if !supports_firmware_download(&mut device) {
                bail!("drive does not report firmware upgrade support through RST");
            }
            let report = FirmwareUpdater::new(update).run_from_config(&device)?;
            println!(
                "Downloaded {} bytes in {} segments{}",
                report.bytes,
                report.segments,
                if report.activated { ", activated" } else { "" }
            );
        }

        Command::Activate { slot, action } => {
            let return_code = if device.is_nvme() {
                let mut cmd = NvmeCommand::new(NVME_ADMIN_CMD_ACTIVATE_FW);
                cmd.cdw[10] = ((*action as u32 & 0x7) << 3) | (*slot as u32 & 0x7);
                let mut ctx = NvmeCmdCtx::admin(cmd, DataDirection::None, Vec::new());
                send_nvme_command(&device, &mut ctx)?;
                ctx.vendor_return_code
            } else {
                let mut ctx = ScsiIoCtx::write_buffer(
                    SCSI_WB_ACTIVATE_DEFERRED_MICROCODE,
                    *slot,
                    0,
                    Vec::new(),
                )?;
                scsi::send_firmware_download(&device, &mut ctx)?;
                ctx.vendor_return_code
            };
            println!("Activate issued, return code {:?}", return_code);
        }

        Command::Admin {
            opcode,
            nsid,
            cdw,
            data_len,
        } => {
            if cdw.len() > 6 {
                bail!("at most 6 command dwords (CDW10..CDW15), got {}", cdw.len());
            }
            let mut cmd = NvmeCommand::new(*opcode);
            cmd.cdw[1] = *nsid;
            for (slot, dword) in cmd.cdw[10..].iter_mut().zip(cdw) {
                *slot = *dword;
            }
            let direction = if *data_len > 0 {
                DataDirection::FromDevice
            } else {
                DataDirection::None
            };
            let mut ctx = NvmeCmdCtx::admin(cmd, direction, vec![0; *data_len]);
            let result = send_nvme_command(&device, &mut ctx);

            let c = &ctx.completion;
            println!(
                "Completion: DW0={:08X} DW1={:08X} DW2={:08X} DW3={:08X} status=0x{:04X}",
                c.command_specific,
                c.dw1_reserved,
                c.sq_id_and_head_ptr,
                c.status_and_cid,
                c.status_field()
            );
            if let Some(elapsed) = ctx.command_time {
                println!("Command time: {elapsed:?}");
            }
            result?;
            hexdump(&ctx.data);
        }
    }
    Ok(())
}

#[cfg(windows)]
fn open_and_run(cli: &Cli) -> Result<()> {
    let transport = rst_core::transport::WindowsTransport::open(&cli.device.device)?;
    run(transport, cli)
}

#[cfg(not(windows))]
fn open_and_run(cli: &Cli) -> Result<()> {
    tracing::warn!(device = %cli.device.device, "RST miniport devices only exist on Windows");
    Err(rst_core::TransportError::Unsupported("Intel RST miniport IOCTLs".to_string()).into())
}

fn main() {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if cli.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install log subscriber: {e}");
    }

    if let Err(e) = open_and_run(&cli) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_u32("0x10"), Ok(16));
        assert_eq!(parse_u32("42"), Ok(42));
        assert!(parse_u32("zz").is_err());
        assert_eq!(parse_u8("0xC1"), Ok(0xC1));
        assert!(parse_u8("300").is_err());
    }

    #[test]
    fn test_cli_parses_admin() {
        let cli = Cli::try_parse_from([
            "rstfw", "--nvme", "--port", "2", "admin", "0x06", "--cdw", "1", "--data-len", "4096",
        ])
        .unwrap();
        assert!(cli.device.nvme);
        assert_eq!(cli.device.port, Some(2));
        match cli.command {
            Command::Admin {
                opcode,
                cdw,
                data_len,
                ..
            } => {
                assert_eq!(opcode, 6);
                assert_eq!(cdw, vec![1]);
                assert_eq!(data_len, 4096);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_admin_rejects_extra_dwords() {
        let cli = Cli::try_parse_from([
            "rstfw", "--nvme", "admin", "0x06", "--cdw", "1", "2", "3", "4", "5", "6", "--cdw", "7",
        ])
        .unwrap();
        let mock = rst_core::MockTransport::new();
        assert!(run(mock.clone(), &cli).is_err());
        assert!(mock.submissions().is_empty());
    }

    #[test]
    fn test_admin_places_dwords_from_cdw10() {
        let cli = Cli::try_parse_from([
            "rstfw", "--nvme", "admin", "0x06", "--cdw", "1", "2", "3", "4", "5", "0x66",
        ])
        .unwrap();
        let mock = rst_core::MockTransport::new();
        run(mock.clone(), &cli).unwrap();

        let req = &mock.submissions()[0].request;
        let dword = |i: usize| {
            let at = 32 + i * 4;
            u32::from_le_bytes([req[at], req[at + 1], req[at + 2], req[at + 3]])
        };
        assert_eq!(dword(0) & 0xFF, 0x06);
        assert_eq!(dword(10), 1);
        assert_eq!(dword(15), 0x66);
    }

    #[test]
    fn test_nvme_vendor_default() {
        let cli = Cli::try_parse_from(["rstfw", "--nvme", "info"]).unwrap();
        let info = drive_info(&cli.device);
        assert_eq!(info.t10_vendor_ident, "NVMe");
        assert_eq!(info.drive_type, DriveType::Nvme);
    }

    #[test]
    fn test_run_info_against_mock() {
        let cli = Cli::try_parse_from(["rstfw", "--nvme", "info"]).unwrap();
        let mock = rst_core::MockTransport::new();
        run(mock.clone(), &cli).unwrap();
        assert_eq!(mock.submissions().len(), 1);
    }
}
