use nix::errno::Errno;

use mdcreate_api::constants::MD_MAJOR;

use crate::{
    block_devices::DeviceNumbers,
    md::{ArrayInfo, DiskInfo, MdControl, MdVersion, RunParams},
};

/// A command received by `RecordingMd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MdCommand {
    SetArrayInfo(ArrayInfo),
    AddDisk(DiskInfo),
    RunArray,
}

/// In-memory md device that records every command it is sent.
///
/// Commands are recorded even when they are configured to fail.
#[derive(Debug)]
pub struct RecordingMd {
    pub numbers: DeviceNumbers,
    pub version: Result<MdVersion, Errno>,
    pub fail_set_array_info: bool,
    /// Index among `ADD_NEW_DISK` commands of the one to reject.
    pub fail_add_disk: Option<usize>,
    pub fail_run: bool,
    pub commands: Vec<MdCommand>,
}

impl Default for RecordingMd {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingMd {
    /// `/dev/md0` on a 0.90.0 driver that accepts everything.
    pub fn new() -> Self {
        RecordingMd {
            numbers: DeviceNumbers {
                major: MD_MAJOR,
                minor: 0,
            },
            version: Ok(MdVersion {
                major: 0,
                minor: 90,
                patchlevel: 0,
            }),
            fail_set_array_info: false,
            fail_add_disk: None,
            fail_run: false,
            commands: Vec::new(),
        }
    }

    pub fn array_info(&self) -> Option<ArrayInfo> {
        self.commands.iter().find_map(|command| match command {
            MdCommand::SetArrayInfo(info) => Some(*info),
            _ => None,
        })
    }

    pub fn added_disks(&self) -> Vec<DiskInfo> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                MdCommand::AddDisk(disk) => Some(*disk),
                _ => None,
            })
            .collect()
    }

    pub fn was_run(&self) -> bool {
        self.commands.contains(&MdCommand::RunArray)
    }
}

impl MdControl for RecordingMd {
    fn device_numbers(&self) -> DeviceNumbers {
        self.numbers
    }

    fn raid_version(&mut self) -> Result<MdVersion, Errno> {
        self.version
    }

    fn set_array_info(&mut self, info: &ArrayInfo) -> Result<(), Errno> {
        self.commands.push(MdCommand::SetArrayInfo(*info));
        if self.fail_set_array_info {
            return Err(Errno::EBUSY);
        }
        Ok(())
    }

    fn add_disk(&mut self, disk: &DiskInfo) -> Result<(), Errno> {
        let index = self.added_disks().len();
        self.commands.push(MdCommand::AddDisk(*disk));
        if self.fail_add_disk == Some(index) {
            return Err(Errno::EINVAL);
        }
        Ok(())
    }

    fn run_array(&mut self, _params: &RunParams) -> Result<(), Errno> {
        self.commands.push(MdCommand::RunArray);
        if self.fail_run {
            return Err(Errno::EIO);
        }
        Ok(())
    }
}
