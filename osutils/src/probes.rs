//! Read-only checks for content that creating an array would destroy.

use std::{
    fmt::Display,
    fs::File,
    os::unix::fs::FileExt,
};

use log::trace;
use strum_macros::Display;

use crate::superblock;

/// Size of the region read by each filesystem probe.
const PROBE_REGION_BYTES: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum FilesystemKind {
    #[strum(serialize = "ext2fs")]
    Ext2,

    #[strum(serialize = "reiserfs")]
    Reiserfs,
}

impl FilesystemKind {
    fn article(self) -> &'static str {
        match self {
            FilesystemKind::Ext2 => "an",
            FilesystemKind::Reiserfs => "a",
        }
    }
}

/// Something found on a device that is about to become an array member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advisory {
    Filesystem {
        kind: FilesystemKind,
        size_kib: u64,
        /// Last mount time, when the filesystem records one.
        mtime: Option<u32>,
    },
    ArrayMember {
        level: i32,
        raid_disks: u32,
        ctime: u32,
    },
}

impl Display for Advisory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Advisory::Filesystem { kind, size_kib, .. } => {
                write!(
                    f,
                    "appears to contain {} {kind} file system, size={size_kib}K",
                    kind.article()
                )
            }
            Advisory::ArrayMember {
                level, raid_disks, ..
            } => write!(
                f,
                "appears to be part of a raid array, level={level} disks={raid_disks}"
            ),
        }
    }
}

/// Where a filesystem keeps its signature, and how to read its size.
struct SignatureProbe {
    kind: FilesystemKind,
    region_offset: u64,
    magic_offset: usize,
    magics: &'static [&'static [u8]],
    describe: fn(&[u8; PROBE_REGION_BYTES]) -> (u64, Option<u32>),
}

const SIGNATURE_PROBES: &[SignatureProbe] = &[
    SignatureProbe {
        kind: FilesystemKind::Ext2,
        region_offset: 1024,
        magic_offset: 56,
        magics: &[&[0x53, 0xef]],
        describe: describe_ext2,
    },
    SignatureProbe {
        kind: FilesystemKind::Reiserfs,
        region_offset: 64 * 1024,
        magic_offset: 52,
        magics: &[b"ReIsErFs", b"ReIsEr2Fs"],
        describe: describe_reiserfs,
    },
];

fn le32(region: &[u8; PROBE_REGION_BYTES], offset: usize) -> u32 {
    u32::from_le_bytes([
        region[offset],
        region[offset + 1],
        region[offset + 2],
        region[offset + 3],
    ])
}

fn describe_ext2(region: &[u8; PROBE_REGION_BYTES]) -> (u64, Option<u32>) {
    let blocks = u64::from(le32(region, 4));
    let log_block_size = le32(region, 24);
    let size_kib = 1u64
        .checked_shl(log_block_size)
        .map_or(0, |block_kib| blocks.saturating_mul(block_kib));
    (size_kib, Some(le32(region, 44)))
}

fn describe_reiserfs(region: &[u8; PROBE_REGION_BYTES]) -> (u64, Option<u32>) {
    (u64::from(le32(region, 0)) * 4, None)
}

impl SignatureProbe {
    fn probe(&self, device: &File) -> Option<Advisory> {
        let mut region = [0u8; PROBE_REGION_BYTES];
        // A device too short to hold the region cannot hold the filesystem.
        device.read_exact_at(&mut region, self.region_offset).ok()?;

        let found = &region[self.magic_offset..];
        if !self.magics.iter().any(|magic| found.starts_with(magic)) {
            return None;
        }

        let (size_kib, mtime) = (self.describe)(&region);
        trace!("Found {} signature, size {size_kib}K", self.kind);
        Some(Advisory::Filesystem {
            kind: self.kind,
            size_kib,
            mtime,
        })
    }
}

/// Runs every filesystem signature probe against `device`.
pub fn probe_filesystems(device: &File) -> Vec<Advisory> {
    SIGNATURE_PROBES
        .iter()
        .filter_map(|probe| probe.probe(device))
        .collect()
}

/// Reports an existing md superblock on `device`.
pub fn probe_array_member(device: &File) -> Option<Advisory> {
    let sb = superblock::load(device).ok()?;
    Some(Advisory::ArrayMember {
        level: sb.level(),
        raid_disks: sb.raid_disks(),
        ctime: sb.ctime(),
    })
}

/// Runs all content probes against `device` and returns those that fired.
pub fn probe_existing_content(device: &File) -> Vec<Advisory> {
    let mut advisories = probe_filesystems(device);
    advisories.extend(probe_array_member(device));
    advisories
}

#[cfg(test)]
mod tests {
    use mdcreate_api::primitives::uuid::ArrayUuid;

    use super::*;

    use crate::{
        block_devices::{open_read_only, open_read_write},
        superblock::{ArrayIdentity, Superblock},
        testutils::{make_image, write_ext2_signature, write_reiserfs_signature},
    };

    #[test]
    fn test_blank_device_has_no_advisories() {
        let dir = tempfile::tempdir().unwrap();
        let image = make_image(dir.path(), "blank", 1024 * 1024);
        assert!(probe_existing_content(&open_read_only(&image).unwrap()).is_empty());
    }

    #[test]
    fn test_short_device_has_no_advisories() {
        let dir = tempfile::tempdir().unwrap();
        let image = make_image(dir.path(), "short", 1500);
        assert!(probe_existing_content(&open_read_only(&image).unwrap()).is_empty());
    }

    #[test]
    fn test_ext2_signature() {
        let dir = tempfile::tempdir().unwrap();
        let image = make_image(dir.path(), "ext2", 1024 * 1024);
        write_ext2_signature(&image, 1000, 2, 1_700_000_000);

        let advisories = probe_existing_content(&open_read_only(&image).unwrap());
        assert_eq!(
            advisories,
            vec![Advisory::Filesystem {
                kind: FilesystemKind::Ext2,
                size_kib: 4000,
                mtime: Some(1_700_000_000),
            }]
        );
        assert_eq!(
            advisories[0].to_string(),
            "appears to contain an ext2fs file system, size=4000K"
        );
    }

    #[test]
    fn test_reiserfs_signatures() {
        let dir = tempfile::tempdir().unwrap();
        for (name, magic) in [("v1", &b"ReIsErFs"[..]), ("v2", &b"ReIsEr2Fs"[..])] {
            let image = make_image(dir.path(), name, 1024 * 1024);
            write_reiserfs_signature(&image, 256, magic);

            assert_eq!(
                probe_filesystems(&open_read_only(&image).unwrap()),
                vec![Advisory::Filesystem {
                    kind: FilesystemKind::Reiserfs,
                    size_kib: 1024,
                    mtime: None,
                }]
            );
        }
    }

    #[test]
    fn test_existing_array_member() {
        let dir = tempfile::tempdir().unwrap();
        let image = make_image(dir.path(), "member", 1024 * 1024);
        let sb = Superblock::new_array(ArrayIdentity {
            uuid: ArrayUuid([1, 2, 3, 4]),
            ctime: 1234,
            level: 1,
            size_kib: 960,
            raid_disks: 2,
        });
        superblock::store(&open_read_write(&image).unwrap(), &sb).unwrap();
        write_ext2_signature(&image, 10, 0, 0);

        let advisories = probe_existing_content(&open_read_only(&image).unwrap());
        assert_eq!(advisories.len(), 2);
        assert_eq!(
            advisories[1],
            Advisory::ArrayMember {
                level: 1,
                raid_disks: 2,
                ctime: 1234,
            }
        );
        assert_eq!(
            advisories[1].to_string(),
            "appears to be part of a raid array, level=1 disks=2"
        );
    }
}
