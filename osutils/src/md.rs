//! Control interface of the Linux md driver.

use std::{
    fs::File,
    io,
    os::fd::AsRawFd,
    path::{Path, PathBuf},
};

use log::{debug, trace};
use nix::errno::Errno;

use mdcreate_api::constants::{LEGACY_MD_DRIVER_VERSION, MD_MAJOR};

use crate::block_devices::{self, DeviceNumbers};

/// `mdu_version_t`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MdVersion {
    pub major: i32,
    pub minor: i32,
    pub patchlevel: i32,
}

impl MdVersion {
    /// `major * 10000 + minor * 100 + patch`, the form used for comparisons.
    pub fn number(&self) -> u32 {
        (self.major.max(0) as u32) * 10000
            + (self.minor.max(0) as u32) * 100
            + self.patchlevel.max(0) as u32
    }
}

/// `mdu_array_info_t`, the payload of `SET_ARRAY_INFO`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArrayInfo {
    pub major_version: i32,
    pub minor_version: i32,
    pub patch_version: i32,
    pub ctime: u32,
    pub level: i32,
    pub size: i32,
    pub nr_disks: i32,
    pub raid_disks: i32,
    pub md_minor: i32,
    pub not_persistent: i32,

    pub utime: u32,
    pub state: i32,
    pub active_disks: i32,
    pub working_disks: i32,
    pub failed_disks: i32,
    pub spare_disks: i32,

    pub layout: i32,
    pub chunk_size: i32,
}

/// `mdu_disk_info_t`, the payload of `ADD_NEW_DISK`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskInfo {
    pub number: i32,
    pub major: i32,
    pub minor: i32,
    pub raid_disk: i32,
    pub state: i32,
}

/// `mdu_param_t`, the payload of `RUN_ARRAY`. The driver ignores it.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunParams {
    pub personality: i32,
    pub chunk_size: i32,
    pub max_fault: i32,
}

/// Bit of `ArrayInfo::state` marking the array as consistent.
pub const MD_SB_CLEAN: i32 = 1;

nix::ioctl_read!(raid_version, MD_MAJOR, 0x10, MdVersion);
nix::ioctl_write_ptr!(add_new_disk, MD_MAJOR, 0x21, DiskInfo);
nix::ioctl_write_ptr!(set_array_info, MD_MAJOR, 0x23, ArrayInfo);
nix::ioctl_write_ptr!(run_array, MD_MAJOR, 0x30, RunParams);

/// Commands the array creation flow sends to an md device.
pub trait MdControl {
    /// Device numbers of the md device itself.
    fn device_numbers(&self) -> DeviceNumbers;

    fn raid_version(&mut self) -> Result<MdVersion, Errno>;

    fn set_array_info(&mut self, info: &ArrayInfo) -> Result<(), Errno>;

    fn add_disk(&mut self, disk: &DiskInfo) -> Result<(), Errno>;

    fn run_array(&mut self, params: &RunParams) -> Result<(), Errno>;
}

/// Returns the driver version number behind `control`, or `None` when it is
/// not an md device at all.
///
/// Old drivers do not implement `RAID_VERSION`; an md device that fails it is
/// taken to be 0.36.0.
pub fn driver_version(control: &mut dyn MdControl) -> Option<u32> {
    match control.raid_version() {
        Ok(version) => {
            debug!("md driver reports version {version:?}");
            Some(version.number())
        }
        Err(e) if control.device_numbers().major == MD_MAJOR => {
            debug!("RAID_VERSION failed ({e}), assuming legacy md driver");
            Some(LEGACY_MD_DRIVER_VERSION)
        }
        Err(e) => {
            debug!("RAID_VERSION failed on a non-md device: {e}");
            None
        }
    }
}

/// An opened md device node.
#[derive(Debug)]
pub struct MdDevice {
    path: PathBuf,
    file: File,
    numbers: DeviceNumbers,
}

impl MdDevice {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_owned();
        let file = block_devices::open_read_write(&path)?;
        let numbers = block_devices::device_numbers(&file)?;
        Ok(MdDevice {
            path,
            file,
            numbers,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MdControl for MdDevice {
    fn device_numbers(&self) -> DeviceNumbers {
        self.numbers
    }

    fn raid_version(&mut self) -> Result<MdVersion, Errno> {
        let mut version = MdVersion::default();
        // SAFETY: `version` matches the kernel's `mdu_version_t` layout.
        unsafe { raid_version(self.file.as_raw_fd(), &mut version) }?;
        Ok(version)
    }

    fn set_array_info(&mut self, info: &ArrayInfo) -> Result<(), Errno> {
        trace!("SET_ARRAY_INFO on {}: {info:?}", self.path.display());
        // SAFETY: `info` matches the kernel's `mdu_array_info_t` layout.
        unsafe { set_array_info(self.file.as_raw_fd(), info) }.map(drop)
    }

    fn add_disk(&mut self, disk: &DiskInfo) -> Result<(), Errno> {
        trace!("ADD_NEW_DISK on {}: {disk:?}", self.path.display());
        // SAFETY: `disk` matches the kernel's `mdu_disk_info_t` layout.
        unsafe { add_new_disk(self.file.as_raw_fd(), disk) }.map(drop)
    }

    fn run_array(&mut self, params: &RunParams) -> Result<(), Errno> {
        trace!("RUN_ARRAY on {}", self.path.display());
        // SAFETY: `params` matches the kernel's `mdu_param_t` layout.
        unsafe { run_array(self.file.as_raw_fd(), params) }.map(drop)
    }
}
