// Licensed under the Apache-2.0 license

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use clap_num::maybe_hex;
use emulator_periph::{EmulatedFlash, EmulatedSdm, RsuFlashBuilder, DEFAULT_FLASH_SIZE};
use log::{info, LevelFilter};
use rsu::RsuContext;
use rsu_image::{CPB_MAX_SLOTS, CPB_SIZE, SPT_SIZE};
use sdm_mbox_common::{DcmfVersion, RsuStatusInfo};
use sdm_mbox_driver::{MailboxTransport, SdmMailbox, SdmManager};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

fn parse_level(level: &str) -> Result<LevelFilter, String> {
    LevelFilter::from_str(level).map_err(|_| format!("unknown log level {level}"))
}

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, name = "RSU Emulator")]
pub struct RsuArgs {
    /// Flash image file. Created and formatted with the default layout if
    /// it does not exist.
    #[arg(short, long)]
    pub flash: PathBuf,

    /// Flash size in bytes
    #[arg(long, value_parser = maybe_hex::<usize>, default_value_t = DEFAULT_FLASH_SIZE)]
    pub flash_size: usize,

    /// Log level: off, error, warn, info, debug or trace
    #[arg(long, value_parser = parse_level, default_value = "info")]
    pub log_level: LevelFilter,

    #[command(subcommand)]
    pub command: RsuCommand,
}

#[derive(Subcommand, Debug, Clone)]
#[command(rename_all = "snake_case")]
pub enum RsuCommand {
    /// Write a fresh SPT and CPB with the default layout
    Format {
        #[arg(long, default_value_t = CPB_MAX_SLOTS)]
        cpb_slots: usize,
    },
    /// Print the RSU status, the SPT and the CPB
    List,
    /// Boot the image at a flash offset after the next reset
    Update {
        #[arg(value_parser = maybe_hex::<u64>)]
        offset: u64,
    },
    SlotCount,
    SlotByName {
        name: String,
    },
    SlotGetInfo {
        #[arg(value_parser = maybe_hex::<usize>)]
        slot: usize,
    },
    SlotSize {
        #[arg(value_parser = maybe_hex::<usize>)]
        slot: usize,
    },
    SlotPriority {
        #[arg(value_parser = maybe_hex::<usize>)]
        slot: usize,
    },
    SlotErase {
        #[arg(value_parser = maybe_hex::<usize>)]
        slot: usize,
    },
    SlotProgramBuf {
        #[arg(value_parser = maybe_hex::<usize>)]
        slot: usize,
        image: PathBuf,
    },
    SlotProgramFactoryUpdateBuf {
        #[arg(value_parser = maybe_hex::<usize>)]
        slot: usize,
        image: PathBuf,
    },
    SlotProgramBufRaw {
        #[arg(value_parser = maybe_hex::<usize>)]
        slot: usize,
        image: PathBuf,
    },
    SlotVerifyBuf {
        #[arg(value_parser = maybe_hex::<usize>)]
        slot: usize,
        image: PathBuf,
    },
    SlotVerifyBufRaw {
        #[arg(value_parser = maybe_hex::<usize>)]
        slot: usize,
        image: PathBuf,
    },
    SlotEnable {
        #[arg(value_parser = maybe_hex::<usize>)]
        slot: usize,
    },
    SlotDisable {
        #[arg(value_parser = maybe_hex::<usize>)]
        slot: usize,
    },
    SlotLoad {
        #[arg(value_parser = maybe_hex::<usize>)]
        slot: usize,
    },
    SlotLoadFactory,
    SlotRename {
        #[arg(value_parser = maybe_hex::<usize>)]
        slot: usize,
        name: String,
    },
    SlotDelete {
        #[arg(value_parser = maybe_hex::<usize>)]
        slot: usize,
    },
    SlotCreate {
        name: String,
        #[arg(value_parser = maybe_hex::<u64>)]
        offset: u64,
        #[arg(value_parser = maybe_hex::<u32>)]
        size: u32,
    },
    StatusLog,
    Notify {
        #[arg(value_parser = maybe_hex::<u32>)]
        value: u32,
    },
    ClearErrorStatus,
    ResetRetryCounter,
    DisplayDcmfVersion,
    DisplayDcmfStatus,
    DisplayMaxRetry,
    CreateEmptyCpb,
    RestoreCpb {
        file: PathBuf,
    },
    SaveCpb {
        file: PathBuf,
    },
    RestoreSpt {
        file: PathBuf,
    },
    SaveSpt {
        file: PathBuf,
    },
    CheckRunningFactory,
}

/// Opens the flash image, brings up the emulated SDM mailbox and runs one
/// command, printing its result to `out`.
pub fn run(args: &RsuArgs, out: &mut dyn Write) -> anyhow::Result<()> {
    let fresh = !args.flash.exists();
    let flash = EmulatedFlash::open(&args.flash, args.flash_size)
        .with_context(|| format!("failed to open flash image {}", args.flash.display()))?;
    if fresh {
        info!("Formatting new flash image {}", args.flash.display());
        format(&flash, CPB_MAX_SLOTS)?;
    }

    let mut sdm = EmulatedSdm::new();
    let mut mailbox = SdmMailbox::new(&mut sdm);
    mailbox.init().context("mailbox init failed")?;
    let mut ctx = RsuContext::new(SdmManager::new(mailbox), &flash)?;
    execute(&mut ctx, &flash, &args.command, out)
}

fn format(flash: &EmulatedFlash, cpb_slots: usize) -> anyhow::Result<()> {
    if cpb_slots == 0 || cpb_slots > CPB_MAX_SLOTS {
        bail!("CPB slot count must be between 1 and {CPB_MAX_SLOTS}");
    }
    let mut builder = RsuFlashBuilder::with_default_layout()?;
    builder.cpb_slots(cpb_slots);
    builder.write_to(flash)?;
    Ok(())
}

fn read_image(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn print_status(out: &mut dyn Write, status: &RsuStatusInfo) -> anyhow::Result<()> {
    writeln!(out, "Current Image\t: {:#010x}", status.current_image)?;
    writeln!(out, "Last Fail Image\t: {:#010x}", status.fail_image)?;
    writeln!(out, "State\t\t: {:#010x}", status.state)?;
    writeln!(out, "Version\t\t: {:#010x}", status.version)?;
    writeln!(out, "Error location\t: {:#010x}", status.error_location)?;
    writeln!(out, "Error details\t: {:#010x}", status.error_details)?;
    if status.version != 0 {
        writeln!(out, "Retry counter\t: {:#010x}", status.retry_counter)?;
    }
    Ok(())
}

fn execute<T: MailboxTransport>(
    ctx: &mut RsuContext<'_, T>,
    flash: &EmulatedFlash,
    command: &RsuCommand,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    match command {
        RsuCommand::Format { cpb_slots } => {
            format(flash, *cpb_slots)?;
            writeln!(out, "Formatted with {} CPB slots.", cpb_slots)?;
        }
        RsuCommand::List => {
            let listing = ctx.list()?;
            print_status(out, &listing.status)?;
            writeln!(out, "Sub-partition table 0 offset {:#010x}", listing.spt_offsets[0])?;
            writeln!(out, "Sub-partition table 1 offset {:#010x}", listing.spt_offsets[1])?;
            for entry in listing.spt.entries() {
                writeln!(
                    out,
                    "{:>16}\tOffset: {:#018x}\tLength: {:#010x}\tFlag: {:#010x}",
                    entry.name_str(),
                    entry.offset(),
                    entry.length,
                    entry.flags
                )?;
            }
            writeln!(out, "CMF pointer block offset {:#010x}", listing.cpb_offset)?;
            for (rank, index) in listing.cpb.priority_order().enumerate() {
                writeln!(
                    out,
                    "Priority {} Offset: {:#018x} nslot: {}",
                    rank + 1,
                    listing.cpb.slots()[index],
                    index
                )?;
            }
        }
        RsuCommand::Update { offset } => {
            ctx.update(*offset)?;
            writeln!(out, "RSU update to {:#018x}.", offset)?;
        }
        RsuCommand::SlotCount => {
            writeln!(out, "Number of slots = {}.", ctx.slot_count()?)?;
        }
        RsuCommand::SlotByName { name } => {
            writeln!(out, "Slot name {} is {}.", name, ctx.slot_by_name(name)?)?;
        }
        RsuCommand::SlotGetInfo { slot } => {
            let info = ctx.slot_get_info(*slot)?;
            writeln!(out, "NAME: {}", info.name)?;
            writeln!(out, "OFFSET: {:#018X}", info.offset)?;
            writeln!(out, "SIZE: {:#010X}", info.size)?;
            if info.priority != 0 {
                writeln!(out, "PRIORITY: {}", info.priority)?;
            } else {
                writeln!(out, "PRIORITY: [disabled]")?;
            }
        }
        RsuCommand::SlotSize { slot } => {
            writeln!(out, "Slot {} size = {}.", slot, ctx.slot_size(*slot)?)?;
        }
        RsuCommand::SlotPriority { slot } => {
            writeln!(out, "Slot {} priority = {}.", slot, ctx.slot_priority(*slot)?)?;
        }
        RsuCommand::SlotErase { slot } => {
            ctx.slot_erase(*slot)?;
            writeln!(out, "Slot {} erased.", slot)?;
        }
        RsuCommand::SlotProgramBuf { slot, image } => {
            let data = read_image(image)?;
            ctx.slot_program_buf(*slot, &data)?;
            writeln!(out, "Slot {} was programmed with {} bytes.", slot, data.len())?;
        }
        RsuCommand::SlotProgramFactoryUpdateBuf { slot, image } => {
            let data = read_image(image)?;
            ctx.slot_program_factory_update_buf(*slot, &data)?;
            writeln!(
                out,
                "Slot {} was programmed with a {} byte factory update.",
                slot,
                data.len()
            )?;
        }
        RsuCommand::SlotProgramBufRaw { slot, image } => {
            let data = read_image(image)?;
            ctx.slot_program_buf_raw(*slot, &data)?;
            writeln!(out, "Slot {} was programmed with {} raw bytes.", slot, data.len())?;
        }
        RsuCommand::SlotVerifyBuf { slot, image } => {
            ctx.slot_verify_buf(*slot, &read_image(image)?)?;
            writeln!(out, "Slot {} was verified with {}.", slot, image.display())?;
        }
        RsuCommand::SlotVerifyBufRaw { slot, image } => {
            ctx.slot_verify_buf_raw(*slot, &read_image(image)?)?;
            writeln!(out, "Slot {} was verified with {}.", slot, image.display())?;
        }
        RsuCommand::SlotEnable { slot } => {
            ctx.slot_enable(*slot)?;
            writeln!(out, "Slot {} enabled.", slot)?;
        }
        RsuCommand::SlotDisable { slot } => {
            ctx.slot_disable(*slot)?;
            writeln!(out, "Slot {} disabled.", slot)?;
        }
        RsuCommand::SlotLoad { slot } => {
            ctx.slot_load(*slot)?;
            writeln!(out, "Slot {} loading.", slot)?;
        }
        RsuCommand::SlotLoadFactory => {
            ctx.slot_load_factory()?;
            writeln!(out, "Factory image loading.")?;
        }
        RsuCommand::SlotRename { slot, name } => {
            ctx.slot_rename(*slot, name)?;
            writeln!(out, "Slot {} renamed to {}.", slot, name)?;
        }
        RsuCommand::SlotDelete { slot } => {
            ctx.slot_delete(*slot)?;
            writeln!(out, "Slot {} deleted.", slot)?;
        }
        RsuCommand::SlotCreate { name, offset, size } => {
            let slot = ctx.slot_create(name, *offset, *size)?;
            writeln!(
                out,
                "Slot {} created as {} at {:#010x} with size {:#x}.",
                slot, name, offset, size
            )?;
        }
        RsuCommand::StatusLog => print_status(out, &ctx.status_log()?)?,
        RsuCommand::Notify { value } => ctx.notify(*value)?,
        RsuCommand::ClearErrorStatus => ctx.clear_error_status()?,
        RsuCommand::ResetRetryCounter => ctx.reset_retry_counter()?,
        RsuCommand::DisplayDcmfVersion => {
            for (i, word) in ctx.dcmf_version()?.into_iter().enumerate() {
                let version = DcmfVersion::from(word);
                writeln!(
                    out,
                    "DCMF{} version = {}.{}.{}",
                    i,
                    version.major(),
                    version.minor(),
                    version.update()
                )?;
            }
        }
        RsuCommand::DisplayDcmfStatus => {
            for (i, status) in ctx.dcmf_status()?.into_iter().enumerate() {
                let state = if status != 0 { "Corrupted" } else { "OK" };
                writeln!(out, "DCMF{}: {}", i, state)?;
            }
        }
        RsuCommand::DisplayMaxRetry => {
            writeln!(out, "max_retry = {}", ctx.max_retry()?)?;
        }
        RsuCommand::CreateEmptyCpb => ctx.create_empty_cpb()?,
        RsuCommand::RestoreCpb { file } => ctx.restore_cpb_from(&read_image(file)?)?,
        RsuCommand::SaveCpb { file } => {
            let mut buf = vec![0u8; CPB_SIZE];
            let len = ctx.save_cpb_to(&mut buf)?;
            std::fs::write(file, &buf[..len])
                .with_context(|| format!("failed to write {}", file.display()))?;
        }
        RsuCommand::RestoreSpt { file } => ctx.restore_spt_from(&read_image(file)?)?,
        RsuCommand::SaveSpt { file } => {
            let mut buf = vec![0u8; SPT_SIZE];
            let len = ctx.save_spt_to(&mut buf)?;
            std::fs::write(file, &buf[..len])
                .with_context(|| format!("failed to write {}", file.display()))?;
        }
        RsuCommand::CheckRunningFactory => {
            let factory = if ctx.running_factory()? { "yes" } else { "no" };
            writeln!(out, "Running factory image: {}", factory)?;
        }
    }
    Ok(())
}
