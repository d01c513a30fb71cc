//! Persistent md superblock, format 0.90.
//!
//! The record is 1024 little-endian 32-bit words written in the reserved
//! region near the end of every member device. Only the words the tooling
//! reads are given names; the rest are carried through untouched so the
//! checksum always covers the exact on-disk bytes.

use std::{
    fmt::Debug,
    fs::File,
    io::{self, Read, Seek, SeekFrom, Write},
};

use log::trace;

use mdcreate_api::{
    constants::{
        MD_SB_BYTES, MD_SB_DISKS, MD_SB_MAGIC, MD_SB_MAJOR_VERSION, MD_SB_UUID128_MINOR_VERSION,
        MD_SB_WORDS, SECTOR_SIZE,
    },
    primitives::uuid::ArrayUuid,
};

use crate::block_devices::{self, can_hold_superblock, usable_sectors};

/// Word offsets of the named superblock fields.
pub mod offsets {
    pub const MAGIC: usize = 0;
    pub const MAJOR_VERSION: usize = 1;
    pub const MINOR_VERSION: usize = 2;
    pub const PATCH_VERSION: usize = 3;
    pub const GVALID_WORDS: usize = 4;
    pub const SET_UUID0: usize = 5;
    pub const CTIME: usize = 6;
    pub const LEVEL: usize = 7;
    pub const SIZE: usize = 8;
    pub const NR_DISKS: usize = 9;
    pub const RAID_DISKS: usize = 10;
    pub const MD_MINOR: usize = 11;
    pub const NOT_PERSISTENT: usize = 12;
    pub const SET_UUID1: usize = 13;
    pub const SET_UUID2: usize = 14;
    pub const SET_UUID3: usize = 15;

    pub const UTIME: usize = 32;
    pub const STATE: usize = 33;
    pub const ACTIVE_DISKS: usize = 34;
    pub const WORKING_DISKS: usize = 35;
    pub const FAILED_DISKS: usize = 36;
    pub const SPARE_DISKS: usize = 37;
    pub const SB_CSUM: usize = 38;
    pub const EVENTS_LO: usize = 39;
    pub const EVENTS_HI: usize = 40;

    pub const LAYOUT: usize = 64;
    pub const CHUNK_SIZE: usize = 65;

    pub const DISKS: usize = 128;
    pub const DESCRIPTOR_WORDS: usize = 32;
    pub const THIS_DISK: usize = 992;
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Cannot get device size")]
    NoSize(#[source] io::Error),
    #[error("Device of {sectors} sectors is too small to hold a superblock")]
    TooSmall { sectors: u64 },
    #[error("Cannot seek to superblock")]
    Seek(#[source] io::Error),
    #[error("Cannot read superblock")]
    Read(#[source] io::Error),
    #[error("No md superblock found (magic {magic:#010x})")]
    NotAMember { magic: u32 },
    #[error("Unsupported superblock major version {major}")]
    UnsupportedVersion { major: u32 },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Cannot get device size")]
    NoSize(#[source] io::Error),
    #[error("Device of {sectors} sectors is too small to hold a superblock")]
    TooSmall { sectors: u64 },
    #[error("Cannot seek to superblock")]
    Seek(#[source] io::Error),
    #[error("Wrote {written} of {} superblock bytes", MD_SB_BYTES)]
    ShortWrite {
        written: usize,
        source: Option<io::Error>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeConflict {
    #[error("Candidate superblock has no md magic")]
    BadMagic,
    #[error("Array UUID {candidate} does not match {existing}")]
    UuidMismatch {
        existing: ArrayUuid,
        candidate: ArrayUuid,
    },
    #[error("Superblock field '{field}' does not match")]
    GeometryMismatch { field: &'static str },
}

/// One slot of the superblock disk table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskDescriptor {
    pub number: u32,
    pub major: u32,
    pub minor: u32,
    pub raid_disk: u32,
    pub state: u32,
}

/// Identity of a newly created array, used to build a fresh superblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayIdentity {
    pub uuid: ArrayUuid,
    pub ctime: u32,
    pub level: i32,
    pub size_kib: u32,
    pub raid_disks: u32,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Superblock {
    words: Box<[u32; MD_SB_WORDS]>,
}

impl Default for Superblock {
    fn default() -> Self {
        Self::empty()
    }
}

impl Superblock {
    /// An all-zero record, as found on a device that never held an array.
    pub fn empty() -> Self {
        Self {
            words: Box::new([0; MD_SB_WORDS]),
        }
    }

    /// A fresh record for a new array, with a valid checksum.
    pub fn new_array(identity: ArrayIdentity) -> Self {
        let mut sb = Self::empty();
        sb.set_word(offsets::MAGIC, MD_SB_MAGIC);
        sb.set_word(offsets::MAJOR_VERSION, MD_SB_MAJOR_VERSION);
        sb.set_word(offsets::MINOR_VERSION, MD_SB_UUID128_MINOR_VERSION);
        sb.set_uuid(identity.uuid);
        sb.set_word(offsets::CTIME, identity.ctime);
        sb.set_word(offsets::LEVEL, identity.level as u32);
        sb.set_word(offsets::SIZE, identity.size_kib);
        sb.set_word(offsets::RAID_DISKS, identity.raid_disks);
        sb.update_checksum();
        sb
    }

    pub fn from_bytes(bytes: &[u8; MD_SB_BYTES]) -> Self {
        let mut sb = Self::empty();
        for (word, chunk) in sb.words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        sb
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    pub fn word(&self, offset: usize) -> u32 {
        self.words[offset]
    }

    pub fn set_word(&mut self, offset: usize, value: u32) {
        self.words[offset] = value;
    }

    pub fn magic(&self) -> u32 {
        self.word(offsets::MAGIC)
    }

    pub fn has_magic(&self) -> bool {
        self.magic() == MD_SB_MAGIC
    }

    pub fn major_version(&self) -> u32 {
        self.word(offsets::MAJOR_VERSION)
    }

    pub fn minor_version(&self) -> u32 {
        self.word(offsets::MINOR_VERSION)
    }

    pub fn patch_version(&self) -> u32 {
        self.word(offsets::PATCH_VERSION)
    }

    pub fn ctime(&self) -> u32 {
        self.word(offsets::CTIME)
    }

    pub fn level(&self) -> i32 {
        self.word(offsets::LEVEL) as i32
    }

    /// Per-member size in KiB.
    pub fn size(&self) -> u32 {
        self.word(offsets::SIZE)
    }

    pub fn nr_disks(&self) -> u32 {
        self.word(offsets::NR_DISKS)
    }

    pub fn raid_disks(&self) -> u32 {
        self.word(offsets::RAID_DISKS)
    }

    pub fn md_minor(&self) -> u32 {
        self.word(offsets::MD_MINOR)
    }

    pub fn utime(&self) -> u32 {
        self.word(offsets::UTIME)
    }

    pub fn state(&self) -> u32 {
        self.word(offsets::STATE)
    }

    pub fn active_disks(&self) -> u32 {
        self.word(offsets::ACTIVE_DISKS)
    }

    pub fn working_disks(&self) -> u32 {
        self.word(offsets::WORKING_DISKS)
    }

    pub fn failed_disks(&self) -> u32 {
        self.word(offsets::FAILED_DISKS)
    }

    pub fn spare_disks(&self) -> u32 {
        self.word(offsets::SPARE_DISKS)
    }

    /// Checksum as stored in the record.
    pub fn stored_checksum(&self) -> u32 {
        self.word(offsets::SB_CSUM)
    }

    pub fn events(&self) -> u64 {
        (u64::from(self.word(offsets::EVENTS_HI)) << 32) | u64::from(self.word(offsets::EVENTS_LO))
    }

    pub fn layout(&self) -> u32 {
        self.word(offsets::LAYOUT)
    }

    /// Chunk size in bytes.
    pub fn chunk_size(&self) -> u32 {
        self.word(offsets::CHUNK_SIZE)
    }

    /// Descriptor of table slot `slot`, if the format can address it.
    pub fn disk(&self, slot: usize) -> Option<DiskDescriptor> {
        (slot < MD_SB_DISKS).then(|| self.descriptor_at(offsets::DISKS + slot * offsets::DESCRIPTOR_WORDS))
    }

    /// Descriptor of the member this record was read from.
    pub fn this_disk(&self) -> DiskDescriptor {
        self.descriptor_at(offsets::THIS_DISK)
    }

    pub fn set_disk(&mut self, slot: usize, disk: DiskDescriptor) {
        if slot < MD_SB_DISKS {
            self.set_descriptor_at(offsets::DISKS + slot * offsets::DESCRIPTOR_WORDS, disk);
        }
    }

    pub fn set_this_disk(&mut self, disk: DiskDescriptor) {
        self.set_descriptor_at(offsets::THIS_DISK, disk);
    }

    fn descriptor_at(&self, base: usize) -> DiskDescriptor {
        DiskDescriptor {
            number: self.word(base),
            major: self.word(base + 1),
            minor: self.word(base + 2),
            raid_disk: self.word(base + 3),
            state: self.word(base + 4),
        }
    }

    fn set_descriptor_at(&mut self, base: usize, disk: DiskDescriptor) {
        self.set_word(base, disk.number);
        self.set_word(base + 1, disk.major);
        self.set_word(base + 2, disk.minor);
        self.set_word(base + 3, disk.raid_disk);
        self.set_word(base + 4, disk.state);
    }

    /// The array identity. Records older than minor version 90 only carry
    /// the first word; the others read as zero whatever the disk holds.
    pub fn uuid(&self) -> ArrayUuid {
        if self.minor_version() >= MD_SB_UUID128_MINOR_VERSION {
            ArrayUuid([
                self.word(offsets::SET_UUID0),
                self.word(offsets::SET_UUID1),
                self.word(offsets::SET_UUID2),
                self.word(offsets::SET_UUID3),
            ])
        } else {
            ArrayUuid([self.word(offsets::SET_UUID0), 0, 0, 0])
        }
    }

    pub fn set_uuid(&mut self, uuid: ArrayUuid) {
        let [w0, w1, w2, w3] = uuid.words();
        self.set_word(offsets::SET_UUID0, w0);
        self.set_word(offsets::SET_UUID1, w1);
        self.set_word(offsets::SET_UUID2, w2);
        self.set_word(offsets::SET_UUID3, w3);
    }

    /// Sum of every word with the checksum word taken as zero, folded once
    /// from 64 to 32 bits.
    pub fn checksum(&self) -> u32 {
        let sum: u64 = self
            .words
            .iter()
            .enumerate()
            .filter(|(offset, _)| *offset != offsets::SB_CSUM)
            .map(|(_, word)| u64::from(*word))
            .sum();

        ((sum & 0xffff_ffff) + (sum >> 32)) as u32
    }

    pub fn checksum_is_valid(&self) -> bool {
        self.checksum() == self.stored_checksum()
    }

    pub fn update_checksum(&mut self) {
        let checksum = self.checksum();
        self.set_word(offsets::SB_CSUM, checksum);
    }

    /// Fields that must agree between members of the same array, in the
    /// order they are compared.
    fn identity_fields(&self) -> [(&'static str, u32); 8] {
        [
            ("major_version", self.major_version()),
            ("minor_version", self.minor_version()),
            ("patch_version", self.patch_version()),
            ("gvalid_words", self.word(offsets::GVALID_WORDS)),
            ("ctime", self.ctime()),
            ("level", self.word(offsets::LEVEL)),
            ("size", self.size()),
            ("raid_disks", self.raid_disks()),
        ]
    }

    /// Folds `candidate` into the identity accumulated so far.
    ///
    /// An accumulator without magic adopts the candidate wholesale. Otherwise
    /// the two must describe the same array; `self` is never modified in that
    /// case.
    pub fn merge_identity(&mut self, candidate: &Superblock) -> Result<(), MergeConflict> {
        if !candidate.has_magic() {
            return Err(MergeConflict::BadMagic);
        }

        if !self.has_magic() {
            *self = candidate.clone();
            return Ok(());
        }

        if self.uuid() != candidate.uuid() {
            return Err(MergeConflict::UuidMismatch {
                existing: self.uuid(),
                candidate: candidate.uuid(),
            });
        }

        self.identity_fields()
            .into_iter()
            .zip(candidate.identity_fields())
            .find(|((_, ours), (_, theirs))| ours != theirs)
            .map_or(Ok(()), |((field, _), _)| {
                Err(MergeConflict::GeometryMismatch { field })
            })
    }
}

impl Debug for Superblock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Superblock")
            .field("magic", &format_args!("{:#010x}", self.magic()))
            .field(
                "version",
                &format_args!(
                    "{}.{}.{}",
                    self.major_version(),
                    self.minor_version(),
                    self.patch_version()
                ),
            )
            .field("uuid", &format_args!("{}", self.uuid()))
            .field("ctime", &self.ctime())
            .field("level", &self.level())
            .field("size", &self.size())
            .field("raid_disks", &self.raid_disks())
            .field("checksum", &format_args!("{:#010x}", self.stored_checksum()))
            .finish_non_exhaustive()
    }
}

/// Byte offset of the superblock on a device of `sectors` sectors.
pub fn superblock_offset(sectors: u64) -> u64 {
    usable_sectors(sectors) * SECTOR_SIZE
}

/// Reads the superblock of an opened member device.
pub fn load(device: &File) -> Result<Superblock, LoadError> {
    let sectors = block_devices::size_in_sectors(device).map_err(LoadError::NoSize)?;
    let mut reader = device;
    load_from(&mut reader, sectors)
}

/// Reads the superblock from `reader`, which holds a device of `sectors`
/// sectors.
pub fn load_from<R: Read + Seek>(reader: &mut R, sectors: u64) -> Result<Superblock, LoadError> {
    if !can_hold_superblock(sectors) {
        return Err(LoadError::TooSmall { sectors });
    }

    let offset = superblock_offset(sectors);
    trace!("Reading superblock at byte offset {offset}");
    reader
        .seek(SeekFrom::Start(offset))
        .map_err(LoadError::Seek)?;

    let mut bytes = [0u8; MD_SB_BYTES];
    reader.read_exact(&mut bytes).map_err(LoadError::Read)?;

    let sb = Superblock::from_bytes(&bytes);
    if !sb.has_magic() {
        return Err(LoadError::NotAMember { magic: sb.magic() });
    }

    if sb.major_version() != MD_SB_MAJOR_VERSION {
        return Err(LoadError::UnsupportedVersion {
            major: sb.major_version(),
        });
    }

    Ok(sb)
}

/// Writes `sb` to an opened member device.
pub fn store(device: &File, sb: &Superblock) -> Result<(), StoreError> {
    let sectors = block_devices::size_in_sectors(device).map_err(StoreError::NoSize)?;
    let mut writer = device;
    store_to(&mut writer, sectors, sb)
}

/// Writes `sb` into `writer`, which holds a device of `sectors` sectors. The
/// whole record goes out in a single write.
pub fn store_to<W: Write + Seek>(
    writer: &mut W,
    sectors: u64,
    sb: &Superblock,
) -> Result<(), StoreError> {
    if !can_hold_superblock(sectors) {
        return Err(StoreError::TooSmall { sectors });
    }

    let offset = superblock_offset(sectors);
    trace!("Writing superblock at byte offset {offset}");
    writer
        .seek(SeekFrom::Start(offset))
        .map_err(StoreError::Seek)?;

    match writer.write(&sb.to_bytes()) {
        Ok(written) if written == MD_SB_BYTES => Ok(()),
        Ok(written) => Err(StoreError::ShortWrite {
            written,
            source: None,
        }),
        Err(e) => Err(StoreError::ShortWrite {
            written: 0,
            source: Some(e),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    use crate::testutils::make_image;

    fn sample_identity() -> ArrayIdentity {
        ArrayIdentity {
            uuid: ArrayUuid([0x12345678, 0x9abcdef0, 0x0badf00d, 0xcafebabe]),
            ctime: 1_000_000_000,
            level: 5,
            size_kib: 99_000,
            raid_disks: 3,
        }
    }

    #[test]
    fn test_new_array_fields() {
        let sb = Superblock::new_array(sample_identity());
        assert!(sb.has_magic());
        assert_eq!(sb.major_version(), 0);
        assert_eq!(sb.minor_version(), 90);
        assert_eq!(sb.level(), 5);
        assert_eq!(sb.size(), 99_000);
        assert_eq!(sb.raid_disks(), 3);
        assert_eq!(sb.uuid(), sample_identity().uuid);
        assert!(sb.checksum_is_valid());
    }

    #[test]
    fn test_checksum_of_empty_record() {
        assert_eq!(Superblock::empty().checksum(), 0);
    }

    #[test]
    fn test_checksum_ignores_checksum_word() {
        let mut sb = Superblock::new_array(sample_identity());
        let checksum = sb.checksum();
        assert_eq!(sb.checksum(), checksum);

        sb.set_word(offsets::SB_CSUM, 0xdead_beef);
        assert_eq!(sb.checksum(), checksum);
        assert_eq!(sb.stored_checksum(), 0xdead_beef);
        assert!(!sb.checksum_is_valid());
    }

    #[test]
    fn test_checksum_folds_carry_once() {
        let mut sb = Superblock::empty();
        for offset in [100, 200, 300] {
            sb.set_word(offset, 0xffff_ffff);
        }
        // 0x2_ffff_fffd folds to 0xffff_fffd + 2
        assert_eq!(sb.checksum(), 0xffff_ffff);

        let mut sb = Superblock::empty();
        sb.set_word(100, 0xffff_ffff);
        sb.set_word(200, 0xffff_ffff);
        sb.set_word(300, 1);
        // 0x1_ffff_ffff folds to 0x1_0000_0000, which truncates to zero
        assert_eq!(sb.checksum(), 0);
    }

    #[test]
    fn test_checksum_covers_reserved_words() {
        let mut sb = Superblock::empty();
        sb.set_word(1000, 7);
        sb.set_word(offsets::THIS_DISK, 3);
        assert_eq!(sb.checksum(), 10);
    }

    #[test]
    fn test_uuid_of_old_minor_version() {
        let mut sb = Superblock::new_array(sample_identity());
        sb.set_word(offsets::MINOR_VERSION, 89);
        assert_eq!(sb.uuid(), ArrayUuid([0x12345678, 0, 0, 0]));

        sb.set_word(offsets::MINOR_VERSION, 0);
        assert_eq!(sb.uuid(), ArrayUuid([0x12345678, 0, 0, 0]));
        // The words are still there, they just are not part of the identity.
        assert_eq!(sb.word(offsets::SET_UUID3), 0xcafebabe);

        sb.set_word(offsets::MINOR_VERSION, 90);
        assert_eq!(sb.uuid(), sample_identity().uuid);
    }

    #[test]
    fn test_merge_into_empty_adopts_candidate() {
        let candidate = Superblock::new_array(sample_identity());
        let mut merged = Superblock::empty();
        merged.merge_identity(&candidate).unwrap();
        assert_eq!(merged, candidate);
    }

    #[test]
    fn test_merge_same_is_noop() {
        let candidate = Superblock::new_array(sample_identity());
        let mut merged = candidate.clone();
        merged.merge_identity(&candidate).unwrap();
        assert_eq!(merged, candidate);
    }

    #[test]
    fn test_merge_conflicts() {
        let existing = Superblock::new_array(sample_identity());

        let mut merged = existing.clone();
        assert_eq!(
            merged.merge_identity(&Superblock::empty()).unwrap_err(),
            MergeConflict::BadMagic
        );
        assert_eq!(merged, existing);

        let other = Superblock::new_array(ArrayIdentity {
            uuid: ArrayUuid([1, 2, 3, 4]),
            ..sample_identity()
        });
        assert_eq!(
            merged.merge_identity(&other).unwrap_err(),
            MergeConflict::UuidMismatch {
                existing: sample_identity().uuid,
                candidate: ArrayUuid([1, 2, 3, 4]),
            }
        );

        let resized = Superblock::new_array(ArrayIdentity {
            size_kib: 1,
            ..sample_identity()
        });
        assert_eq!(
            merged.merge_identity(&resized).unwrap_err(),
            MergeConflict::GeometryMismatch { field: "size" }
        );

        let mut relevelled = existing.clone();
        relevelled.set_word(offsets::LEVEL, 4);
        assert_eq!(
            merged.merge_identity(&relevelled).unwrap_err(),
            MergeConflict::GeometryMismatch { field: "level" }
        );
        assert_eq!(merged, existing);
    }

    #[test]
    fn test_merge_ignores_state_fields() {
        let existing = Superblock::new_array(sample_identity());
        let mut candidate = existing.clone();
        candidate.set_word(offsets::UTIME, 42);
        candidate.set_word(offsets::STATE, 1);
        candidate.update_checksum();

        let mut merged = existing.clone();
        merged.merge_identity(&candidate).unwrap();
        assert_eq!(merged, existing);
    }

    #[test]
    fn test_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let image = make_image(dir.path(), "member", 1024 * 1024);

        let mut sb = Superblock::new_array(sample_identity());
        sb.set_this_disk(DiskDescriptor {
            number: 1,
            major: 8,
            minor: 17,
            raid_disk: 1,
            state: 6,
        });
        sb.update_checksum();

        let device = block_devices::open_read_write(&image).unwrap();
        store(&device, &sb).unwrap();

        let loaded = load(&block_devices::open_read_only(&image).unwrap()).unwrap();
        assert_eq!(loaded, sb);
        assert_eq!(loaded.checksum(), loaded.stored_checksum());
        assert_eq!(loaded.this_disk().minor, 17);

        // 2048 sectors: (2048 & !127) - 128 = 1920 sectors in
        let raw = std::fs::read(&image).unwrap();
        let offset = 1920 * 512;
        assert_eq!(superblock_offset(2048), offset as u64);
        assert_eq!(&raw[offset..offset + 4], &MD_SB_MAGIC.to_le_bytes());
    }

    #[test]
    fn test_load_errors() {
        let mut small = Cursor::new(vec![0u8; 255 * 512]);
        assert!(matches!(
            load_from(&mut small, 255),
            Err(LoadError::TooSmall { sectors: 255 })
        ));

        let mut blank = Cursor::new(vec![0u8; 256 * 512]);
        assert!(matches!(
            load_from(&mut blank, 256),
            Err(LoadError::NotAMember { magic: 0 })
        ));

        let mut truncated = Cursor::new(vec![0u8; 130 * 512]);
        assert!(matches!(
            load_from(&mut truncated, 256),
            Err(LoadError::Read(_))
        ));

        let mut sb = Superblock::new_array(sample_identity());
        sb.set_word(offsets::MAJOR_VERSION, 1);
        let mut device = Cursor::new(vec![0u8; 256 * 512]);
        store_to(&mut device, 256, &sb).unwrap();
        assert!(matches!(
            load_from(&mut device, 256),
            Err(LoadError::UnsupportedVersion { major: 1 })
        ));
    }

    struct ShortWriter(Cursor<Vec<u8>>);

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.write(&buf[..buf.len() / 2])
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for ShortWriter {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.0.seek(pos)
        }
    }

    #[test]
    fn test_store_errors() {
        let sb = Superblock::new_array(sample_identity());

        let mut small = Cursor::new(vec![0u8; 100 * 512]);
        assert!(matches!(
            store_to(&mut small, 100, &sb),
            Err(StoreError::TooSmall { sectors: 100 })
        ));

        let mut short = ShortWriter(Cursor::new(vec![0u8; 256 * 512]));
        assert!(matches!(
            store_to(&mut short, 256, &sb),
            Err(StoreError::ShortWrite {
                written: 2048,
                source: None
            })
        ));
    }
}
