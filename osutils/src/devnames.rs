use std::{
    collections::HashMap,
    fs,
    os::unix::fs::{FileTypeExt, MetadataExt},
    path::{Path, PathBuf},
};

use log::trace;
use nix::sys::stat;
use once_cell::sync::OnceCell;

use mdcreate_api::constants::DEV_DIRECTORY_PATH;

/// Maps block device numbers back to a node name under a device directory.
///
/// The directory is walked on the first lookup only. Symlinks are not
/// followed, so names come from the real nodes.
#[derive(Debug)]
pub struct DeviceNameCache {
    root: PathBuf,
    names: OnceCell<HashMap<(u64, u64), PathBuf>>,
}

impl Default for DeviceNameCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceNameCache {
    pub fn new() -> Self {
        Self::with_root(DEV_DIRECTORY_PATH)
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        DeviceNameCache {
            root: root.into(),
            names: OnceCell::new(),
        }
    }

    /// Returns the name of the block device `major:minor`, if one exists.
    pub fn resolve(&self, major: u64, minor: u64) -> Option<&Path> {
        self.names
            .get_or_init(|| {
                let mut names = HashMap::new();
                scan(&self.root, &mut names);
                trace!(
                    "Found {} block devices under {}",
                    names.len(),
                    self.root.display()
                );
                names
            })
            .get(&(major, minor))
            .map(PathBuf::as_path)
    }
}

fn scan(directory: &Path, names: &mut HashMap<(u64, u64), PathBuf>) {
    let Ok(entries) = fs::read_dir(directory) else {
        return;
    };

    for entry in entries.flatten() {
        // symlink_metadata does not follow links
        let Ok(metadata) = entry.path().symlink_metadata() else {
            continue;
        };

        let file_type = metadata.file_type();
        if file_type.is_dir() {
            scan(&entry.path(), names);
        } else if file_type.is_block_device() {
            let rdev = metadata.rdev();
            names.insert((stat::major(rdev), stat::minor(rdev)), entry.path());
        }
    }
}
