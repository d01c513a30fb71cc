use std::{
    fs::{File, OpenOptions},
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
};

use tempfile::TempDir;

/// Creates a sparse image file of `size` bytes that can stand in for a disk.
pub fn make_image(directory: &Path, name: &str, size: u64) -> PathBuf {
    let path = directory.join(name);
    File::create(&path).unwrap().set_len(size).unwrap();
    path
}

/// Creates one image per entry of `sizes` in a fresh temporary directory,
/// named `disk0`, `disk1`, ...
pub fn scratch_images(sizes: &[u64]) -> (TempDir, Vec<PathBuf>) {
    let dir = tempfile::tempdir().unwrap();
    let images = sizes
        .iter()
        .enumerate()
        .map(|(i, size)| make_image(dir.path(), &format!("disk{i}"), *size))
        .collect();
    (dir, images)
}

fn write_at(image: &Path, offset: u64, bytes: &[u8]) {
    OpenOptions::new()
        .write(true)
        .open(image)
        .unwrap()
        .write_all_at(bytes, offset)
        .unwrap();
}

/// Writes the fields of an ext2 superblock that the content probe looks at.
pub fn write_ext2_signature(image: &Path, blocks: u32, log_block_size: u32, mtime: u32) {
    let mut region = [0u8; 1024];
    region[4..8].copy_from_slice(&blocks.to_le_bytes());
    region[24..28].copy_from_slice(&log_block_size.to_le_bytes());
    region[44..48].copy_from_slice(&mtime.to_le_bytes());
    region[56..58].copy_from_slice(&[0x53, 0xef]);
    write_at(image, 1024, &region);
}

/// Writes a reiserfs superblock header with the given magic string.
pub fn write_reiserfs_signature(image: &Path, blocks: u32, magic: &[u8]) {
    let mut region = [0u8; 1024];
    region[0..4].copy_from_slice(&blocks.to_le_bytes());
    region[52..52 + magic.len()].copy_from_slice(magic);
    write_at(image, 64 * 1024, &region);
}
