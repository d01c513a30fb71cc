use std::{
    fs::{File, OpenOptions},
    io,
    os::{
        fd::AsRawFd,
        unix::fs::{FileTypeExt, MetadataExt},
    },
    path::Path,
};

use log::trace;
use nix::sys::stat;

use mdcreate_api::constants::{MD_RESERVED_SECTORS, SECTOR_SIZE};

nix::ioctl_read!(blkgetsize64, 0x12, 114, u64);

/// Block device numbers of an opened device. Regular files report 0/0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DeviceNumbers {
    pub major: u64,
    pub minor: u64,
}

/// Opens a member device for inspection.
pub fn open_read_only(path: impl AsRef<Path>) -> io::Result<File> {
    File::open(path.as_ref())
}

/// Opens a device for superblock updates.
pub fn open_read_write(path: impl AsRef<Path>) -> io::Result<File> {
    OpenOptions::new().read(true).write(true).open(path.as_ref())
}

/// Returns the size of an opened device in 512-byte sectors.
///
/// Block devices are asked through `BLKGETSIZE64`; regular files report their
/// length so that image files can stand in for disks.
pub fn size_in_sectors(device: &File) -> io::Result<u64> {
    let metadata = device.metadata()?;

    if metadata.file_type().is_block_device() {
        let mut bytes = 0u64;
        // SAFETY: the fd is open for the lifetime of `device` and `bytes` is a
        // valid u64 for the kernel to fill in.
        unsafe { blkgetsize64(device.as_raw_fd(), &mut bytes) }.map_err(io::Error::from)?;
        trace!("BLKGETSIZE64 reported {bytes} bytes");
        Ok(bytes / SECTOR_SIZE)
    } else if metadata.is_file() {
        Ok(metadata.len() / SECTOR_SIZE)
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a block device or regular file",
        ))
    }
}

/// Returns the major/minor numbers of an opened device.
pub fn device_numbers(device: &File) -> io::Result<DeviceNumbers> {
    let metadata = device.metadata()?;
    if !metadata.file_type().is_block_device() {
        return Ok(DeviceNumbers::default());
    }

    let rdev = metadata.rdev();
    Ok(DeviceNumbers {
        major: stat::major(rdev),
        minor: stat::minor(rdev),
    })
}

/// Number of sectors at the start of a device of `sectors` sectors that lie
/// before the reserved superblock region.
///
/// The region starts on a 64 KiB boundary, so the usable area is the device
/// size rounded down to 64 KiB, minus 64 KiB.
pub const fn usable_sectors(sectors: u64) -> u64 {
    (sectors & !(MD_RESERVED_SECTORS - 1)).saturating_sub(MD_RESERVED_SECTORS)
}

/// Whether a device of `sectors` sectors is large enough to hold a
/// superblock at all.
pub const fn can_hold_superblock(sectors: u64) -> bool {
    sectors >= MD_RESERVED_SECTORS * 2
}

/// Usable capacity in KiB of a device of `sectors` sectors.
pub const fn usable_kib(sectors: u64) -> u64 {
    usable_sectors(sectors) / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testutils::make_image;

    #[test]
    fn test_usable_sectors() {
        assert_eq!(usable_sectors(256), 128);
        assert_eq!(usable_sectors(300), 128);
        assert_eq!(usable_sectors(383), 128);
        assert_eq!(usable_sectors(384), 256);
        assert_eq!(usable_kib(400_000), 199_936);
        assert_eq!(usable_sectors(0), 0);
    }

    #[test]
    fn test_can_hold_superblock() {
        assert!(!can_hold_superblock(0));
        assert!(!can_hold_superblock(255));
        assert!(can_hold_superblock(256));
    }

    #[test]
    fn test_image_size_and_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let image = make_image(dir.path(), "disk0", 1024 * 1024);

        let file = open_read_only(&image).unwrap();
        assert_eq!(size_in_sectors(&file).unwrap(), 2048);
        assert_eq!(device_numbers(&file).unwrap(), DeviceNumbers::default());
    }

    #[test]
    fn test_directory_has_no_size() {
        let dir = tempfile::tempdir().unwrap();
        let file = File::open(dir.path()).unwrap();
        assert_eq!(
            size_in_sectors(&file).unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
    }
}
