use std::{
    io,
    path::{Path, PathBuf},
};

use log::trace;

use osutils::{
    block_devices::{self, DeviceNumbers},
    probes::{self, Advisory},
};

/// A real member device that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedMember {
    pub path: PathBuf,
    /// Capacity in KiB in front of the reserved superblock region.
    pub usable_kib: u64,
    pub numbers: DeviceNumbers,
    pub advisories: Vec<Advisory>,
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("Cannot open device")]
    Open(#[source] io::Error),
    #[error("Cannot get device numbers")]
    NoDeviceNumbers(#[source] io::Error),
    #[error("Cannot get size of device")]
    NoSize(#[source] io::Error),
    #[error("Device is too small: {}K", .sectors / 2)]
    TooSmall { sectors: u64 },
    #[error("Device is smaller than given size. {usable_kib}K < {requested_kib}K + superblock")]
    SmallerThanRequested { usable_kib: u64, requested_kib: u64 },
}

/// Checks that `path` can hold a member of `requested_size_kib` (zero for
/// any size) and looks for content that creating the array would destroy.
pub fn classify(path: &Path, requested_size_kib: u64) -> Result<ClassifiedMember, ClassifyError> {
    let device = block_devices::open_read_only(path).map_err(ClassifyError::Open)?;
    let numbers =
        block_devices::device_numbers(&device).map_err(ClassifyError::NoDeviceNumbers)?;
    let sectors = block_devices::size_in_sectors(&device).map_err(ClassifyError::NoSize)?;
    if !block_devices::can_hold_superblock(sectors) {
        return Err(ClassifyError::TooSmall { sectors });
    }

    let usable_kib = block_devices::usable_kib(sectors);
    if requested_size_kib != 0 && usable_kib < requested_size_kib {
        return Err(ClassifyError::SmallerThanRequested {
            usable_kib,
            requested_kib: requested_size_kib,
        });
    }

    let advisories = probes::probe_existing_content(&device);
    trace!(
        "Classified '{}': {usable_kib}K usable, {} advisories",
        path.display(),
        advisories.len()
    );

    Ok(ClassifiedMember {
        path: path.to_owned(),
        usable_kib,
        numbers,
        advisories,
    })
}
