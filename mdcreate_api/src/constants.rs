use const_format::formatcp;

// md driver and on-disk format constants

/// Block major number of md devices, also the md ioctl type.
pub const MD_MAJOR: u64 = 9;

/// Magic number at the start of a persistent superblock.
pub const MD_SB_MAGIC: u32 = 0xa92b_4efc;

/// Size of the persistent superblock record.
pub const MD_SB_BYTES: usize = 4096;

/// Number of 32-bit words in the superblock record.
pub const MD_SB_WORDS: usize = MD_SB_BYTES / 4;

/// Maximum number of member slots the superblock can describe.
pub const MD_SB_DISKS: usize = 27;

/// Space reserved at the end of each member for the superblock.
pub const MD_RESERVED_BYTES: u64 = 64 * 1024;

/// Size of a sector as reported by the block layer.
pub const SECTOR_SIZE: u64 = 512;

/// `MD_RESERVED_BYTES` expressed in sectors.
pub const MD_RESERVED_SECTORS: u64 = MD_RESERVED_BYTES / SECTOR_SIZE;

/// Major version of the superblock format generation handled here.
pub const MD_SB_MAJOR_VERSION: u32 = 0;

/// First superblock minor version that carries a full 128-bit set UUID.
pub const MD_SB_UUID128_MINOR_VERSION: u32 = 90;

/// Oldest md driver able to create arrays, encoded as
/// `major * 10000 + minor * 100 + patch`.
pub const MIN_MD_DRIVER_VERSION: u32 = 9000;

/// Version assumed for md devices that do not answer `RAID_VERSION`.
pub const LEGACY_MD_DRIVER_VERSION: u32 = 3600;

/// Human readable form of `MIN_MD_DRIVER_VERSION`.
pub const MIN_MD_DRIVER_VERSION_TEXT: &str = formatcp!(
    "{}.{}.{}",
    MIN_MD_DRIVER_VERSION / 10000,
    (MIN_MD_DRIVER_VERSION / 100) % 100,
    MIN_MD_DRIVER_VERSION % 100
);

// Creation defaults

/// Chunk size used when none is requested, in KiB.
pub const DEFAULT_CHUNK_KIB: u64 = 64;

/// Symbolic name of the RAID-5 layout used when none is requested.
pub const DEFAULT_RAID5_LAYOUT_NAME: &str = "default";

/// Member name reserving a slot without a backing device.
pub const MISSING_MEMBER: &str = "missing";

/// Number of times an interactive confirmation is asked before assuming no.
pub const CONFIRM_ATTEMPTS: usize = 5;

// Paths

/// Directory scanned to map device numbers back to names.
pub const DEV_DIRECTORY_PATH: &str = "/dev";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_sectors() {
        assert_eq!(MD_RESERVED_SECTORS, 128);
        assert_eq!(MD_SB_WORDS, 1024);
        assert_eq!(MIN_MD_DRIVER_VERSION_TEXT, "0.90.0");
    }
}
