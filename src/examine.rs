use std::{
    fmt::{self, Display, Formatter},
    path::{Path, PathBuf},
};

use chrono::DateTime;
use log::{debug, error, info, warn};

use mdcreate_api::{
    constants::MD_SB_DISKS,
    error::{IoError, MdError, ReportError, ValidationError},
    primitives::{size::human_size, uuid::ArrayUuid},
};
use osutils::{
    block_devices,
    devnames::DeviceNameCache,
    superblock::{self, DiskDescriptor, MergeConflict, Superblock},
};
use sysdefs::{
    disk_state::{self, DiskState},
    raid::{Raid5Layout, RaidLevel},
};

/// Renders a superblock or filesystem timestamp.
pub fn format_time(seconds: u32) -> String {
    DateTime::from_timestamp(i64::from(seconds), 0)
        .map(|time| time.format("%a %b %e %H:%M:%S %Y UTC").to_string())
        .unwrap_or_else(|| seconds.to_string())
}

/// Superblock found on one examined device.
#[derive(Debug)]
pub struct Examined {
    pub device: PathBuf,
    pub superblock: Superblock,
    /// Set when the device does not belong with the first array examined.
    pub conflict: Option<MergeConflict>,
}

/// Outcome of examining a list of devices.
#[derive(Debug, Default)]
pub struct ExamineReport {
    pub members: Vec<Examined>,
    /// Devices that could not be read or hold no superblock.
    pub missing: Vec<PathBuf>,
}

impl ExamineReport {
    /// Fails when any device examined had no superblock.
    pub fn check(&self) -> Result<(), MdError> {
        if self.missing.is_empty() {
            return Ok(());
        }

        Err(MdError::new(ValidationError::NoSuperblock {
            devices: self
                .missing
                .iter()
                .map(|device| device.display().to_string())
                .collect(),
        }))
    }
}

/// Loads the superblock of every device in `devices`.
///
/// The first superblock read sets the array identity; the others are checked
/// against it. With `uuid_filter`, devices of other arrays are skipped.
#[tracing::instrument(skip_all)]
pub fn examine(devices: &[PathBuf], uuid_filter: Option<ArrayUuid>) -> ExamineReport {
    let mut identity = Superblock::empty();
    let mut report = ExamineReport::default();

    for device in devices {
        let superblock = match block_devices::open_read_only(device)
            .map_err(|e| e.to_string())
            .and_then(|file| superblock::load(&file).map_err(|e| e.to_string()))
        {
            Ok(superblock) => superblock,
            Err(e) => {
                error!("No md superblock detected on {}: {e}", device.display());
                report.missing.push(device.clone());
                continue;
            }
        };

        if uuid_filter.is_some_and(|uuid| uuid != superblock.uuid()) {
            debug!(
                "Skipping {}, member of array {}",
                device.display(),
                superblock.uuid()
            );
            continue;
        }

        let conflict = identity.merge_identity(&superblock).err();
        if let Some(conflict) = &conflict {
            warn!("{}: {conflict}", device.display());
        }

        report.members.push(Examined {
            device: device.clone(),
            superblock,
            conflict,
        });
    }

    report
}

fn level_name(level: i32) -> String {
    RaidLevel::from_number(level).map_or_else(|| format!("level {level}"), |l| l.to_string())
}

fn descriptor_line(label: &str, disk: &DiskDescriptor, names: &DeviceNameCache) -> String {
    let name = names
        .resolve(u64::from(disk.major), u64::from(disk.minor))
        .map(Path::display)
        .map(|name| name.to_string())
        .unwrap_or_default();
    let state = DiskState::from_bits_truncate(disk.state);

    format!(
        "{label:>4} {:>5} {:>7} {:>7} {:>10}      {:<14} {name}",
        disk.number,
        disk.major,
        disk.minor,
        disk.raid_disk,
        disk_state::describe(state)
    )
    .trim_end()
    .to_owned()
}

/// Human readable dump of an examined superblock.
pub struct Dump<'a> {
    examined: &'a Examined,
    names: &'a DeviceNameCache,
}

impl Display for Dump<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let Dump { examined, names } = *self;
        let sb = &examined.superblock;

        writeln!(f, "{}:", examined.device.display())?;
        writeln!(f, "          Magic : {:08x}", sb.magic())?;
        writeln!(
            f,
            "        Version : {:02}.{:02}.{:02}",
            sb.major_version(),
            sb.minor_version(),
            sb.patch_version()
        )?;
        writeln!(f, "           UUID : {}", sb.uuid())?;
        writeln!(f, "  Creation Time : {}", format_time(sb.ctime()))?;
        writeln!(f, "     Raid Level : {}", level_name(sb.level()))?;
        writeln!(
            f,
            "    Device Size : {}K{}",
            sb.size(),
            human_size(u64::from(sb.size()) * 1024)
        )?;
        writeln!(f, "   Raid Devices : {}", sb.raid_disks())?;
        writeln!(f, "  Total Devices : {}", sb.nr_disks())?;
        writeln!(f, "Preferred Minor : {}", sb.md_minor())?;
        writeln!(f)?;
        writeln!(f, "    Update Time : {}", format_time(sb.utime()))?;
        writeln!(
            f,
            "          State : {}",
            if sb.state() & 1 != 0 { "clean" } else { "dirty" }
        )?;
        writeln!(f, " Active Devices : {}", sb.active_disks())?;
        writeln!(f, "Working Devices : {}", sb.working_disks())?;
        writeln!(f, " Failed Devices : {}", sb.failed_disks())?;
        writeln!(f, "  Spare Devices : {}", sb.spare_disks())?;
        writeln!(
            f,
            "       Checksum : {:08x} - {}",
            sb.stored_checksum(),
            if sb.checksum_is_valid() {
                "correct".to_owned()
            } else {
                format!("expected {:08x}", sb.checksum())
            }
        )?;
        writeln!(f, "         Events : {}", sb.events())?;
        if RaidLevel::from_number(sb.level()) == Some(RaidLevel::Raid5) {
            let layout = Raid5Layout::from_number(sb.layout())
                .map_or_else(|| sb.layout().to_string(), |l| l.to_string());
            writeln!(f, "         Layout : {layout}")?;
        }
        writeln!(f, "     Chunk Size : {}K", sb.chunk_size() / 1024)?;
        writeln!(f)?;
        writeln!(f, "      Number   Major   Minor   RaidDevice State")?;
        writeln!(f, "{}", descriptor_line("this", &sb.this_disk(), names))?;

        let slots = (sb.nr_disks().max(sb.raid_disks()) as usize).min(MD_SB_DISKS);
        for slot in 0..slots {
            if let Some(disk) = sb.disk(slot) {
                writeln!(f, "{}", descriptor_line(&slot.to_string(), &disk, names))?;
            }
        }

        if let Some(conflict) = &examined.conflict {
            writeln!(f, "\n  Not a member of the first array examined: {conflict}")?;
        }

        Ok(())
    }
}

/// Renders `examined` for display, naming devices through `names`.
pub fn render<'a>(examined: &'a Examined, names: &'a DeviceNameCache) -> Dump<'a> {
    Dump { examined, names }
}

/// Overwrites the superblock region of `device` with zeroes.
///
/// Without `force`, only a region holding a superblock is overwritten.
/// Returns whether anything was written.
#[tracing::instrument(skip_all, fields(device = %device.display()))]
pub fn zero_superblock(device: &Path, force: bool) -> Result<bool, MdError> {
    let file = block_devices::open_read_write(device).structured(IoError::OpenDevice {
        path: device.display().to_string(),
    })?;

    if !force {
        if let Err(e) = superblock::load(&file) {
            warn!(
                "Not zeroing {}, no valid md superblock: {e}",
                device.display()
            );
            return Ok(false);
        }
    }

    superblock::store(&file, &Superblock::empty()).structured(IoError::WriteSuperblock {
        path: device.display().to_string(),
    })?;
    info!("Zeroed superblock on {}", device.display());
    Ok(true)
}
