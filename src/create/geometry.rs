use serde::Serialize;

use mdcreate_api::constants::{MD_SB_MAJOR_VERSION, MD_SB_UUID128_MINOR_VERSION};
use osutils::{
    block_devices::DeviceNumbers,
    md::{ArrayInfo, DiskInfo, MD_SB_CLEAN},
};
use sysdefs::{
    disk_state::{self, DiskState},
    raid::RaidLevel,
};

use super::CreateParameters;

/// Slot counts gathered while surveying the member list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemberCounts {
    /// Real members in active slots.
    pub active: usize,
    /// Real members in any slot.
    pub working: usize,
    /// Members given as `missing`.
    pub missing: usize,
    /// Position of the first `missing` member.
    pub first_missing: Option<usize>,
}

/// Everything sent to the md driver in `SET_ARRAY_INFO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ArrayGeometry {
    pub level: RaidLevel,
    pub layout: u32,
    pub chunk_kib: u64,
    pub size_kib: u64,
    pub raid_disks: usize,
    pub nr_disks: usize,
    pub active_disks: usize,
    pub working_disks: usize,
    pub failed_disks: usize,
    pub spare_disks: usize,
    /// Whether the driver may skip the initial resync.
    pub clean: bool,
    /// Active slot left empty so that raid5 rebuilds it instead of computing
    /// parity over every member.
    pub insert_point: Option<usize>,
}

impl ArrayGeometry {
    pub fn new(parameters: &CreateParameters, size_kib: u64, counts: MemberCounts) -> Self {
        let CreateParameters {
            level,
            layout,
            chunk_kib,
            raid_disks,
            spare_disks,
            force,
        } = *parameters;

        let mut active_disks = counts.active;
        let mut spare_disks = spare_disks;
        let mut failed_disks = counts.missing;
        let mut insert_point = None;

        let missing_in_active_range = counts.first_missing.is_some_and(|m| m < raid_disks);
        if !force && level == RaidLevel::Raid5 && !missing_in_active_range {
            insert_point = Some(raid_disks - 1);
            spare_disks += 1;
            active_disks = active_disks.saturating_sub(1);
            failed_disks += 1;
        }

        let clean = level == RaidLevel::Raid5
            && (insert_point.is_some_and(|p| p < raid_disks) || missing_in_active_range);

        ArrayGeometry {
            level,
            layout,
            chunk_kib,
            size_kib,
            raid_disks,
            nr_disks: counts.working + failed_disks,
            active_disks,
            working_disks: counts.working,
            failed_disks,
            spare_disks,
            clean,
            insert_point,
        }
    }

    /// Slot assigned to the member listed at `position`. Members at or past
    /// the insert point move up one slot to make room for it.
    pub fn slot_for(&self, position: usize) -> usize {
        match self.insert_point {
            Some(insert_point) if position >= insert_point => position + 1,
            _ => position,
        }
    }

    /// `ADD_NEW_DISK` payload for the member listed at `position`; `None`
    /// device numbers describe a `missing` member.
    pub fn disk_info(&self, position: usize, numbers: Option<DeviceNumbers>) -> DiskInfo {
        let slot = self.slot_for(position);
        let state: DiskState = match numbers {
            None => disk_state::faulty(),
            Some(_) if slot < self.raid_disks => disk_state::in_sync(),
            Some(_) => disk_state::idle(),
        };
        let numbers = numbers.unwrap_or_default();

        DiskInfo {
            number: slot as i32,
            major: numbers.major as i32,
            minor: numbers.minor as i32,
            raid_disk: slot as i32,
            state: state.bits() as i32,
        }
    }

    /// Faulty placeholder for the insert point, if there is one.
    pub fn filler_disk_info(&self) -> Option<DiskInfo> {
        self.insert_point.map(|slot| DiskInfo {
            number: slot as i32,
            major: 0,
            minor: 0,
            raid_disk: slot as i32,
            state: disk_state::faulty().bits() as i32,
        })
    }

    /// `SET_ARRAY_INFO` payload. `size_kib` has already been checked to fit.
    pub fn array_info(&self, md_minor: u64) -> ArrayInfo {
        ArrayInfo {
            major_version: MD_SB_MAJOR_VERSION as i32,
            minor_version: MD_SB_UUID128_MINOR_VERSION as i32,
            patch_version: 0,
            ctime: 0,
            level: self.level.number(),
            size: self.size_kib as i32,
            nr_disks: self.nr_disks as i32,
            raid_disks: self.raid_disks as i32,
            md_minor: md_minor as i32,
            not_persistent: 0,
            utime: 0,
            state: if self.clean { MD_SB_CLEAN } else { 0 },
            active_disks: self.active_disks as i32,
            working_disks: self.working_disks as i32,
            failed_disks: self.failed_disks as i32,
            spare_disks: self.spare_disks as i32,
            layout: self.layout as i32,
            chunk_size: (self.chunk_kib * 1024) as i32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(active: usize, working: usize, first_missing: Option<usize>) -> MemberCounts {
        MemberCounts {
            active,
            working,
            missing: usize::from(first_missing.is_some()),
            first_missing,
        }
    }

    fn parameters(level: RaidLevel, raid_disks: usize, spare_disks: usize) -> CreateParameters {
        CreateParameters {
            level,
            layout: if level == RaidLevel::Raid5 { 2 } else { 0 },
            chunk_kib: 64,
            raid_disks,
            spare_disks,
            force: false,
        }
    }

    #[test]
    fn test_raid5_insert_point() {
        let geometry = ArrayGeometry::new(
            &parameters(RaidLevel::Raid5, 3, 0),
            99_000,
            counts(3, 3, None),
        );
        assert_eq!(geometry.insert_point, Some(2));
        assert_eq!(geometry.active_disks, 2);
        assert_eq!(geometry.spare_disks, 1);
        assert_eq!(geometry.failed_disks, 1);
        assert_eq!(geometry.working_disks, 3);
        assert_eq!(geometry.nr_disks, 4);
        assert!(geometry.clean);

        assert_eq!(geometry.slot_for(0), 0);
        assert_eq!(geometry.slot_for(1), 1);
        assert_eq!(geometry.slot_for(2), 3);

        let numbers = Some(DeviceNumbers { major: 8, minor: 16 });
        assert_eq!(
            geometry.disk_info(1, numbers),
            DiskInfo {
                number: 1,
                major: 8,
                minor: 16,
                raid_disk: 1,
                state: 6
            }
        );
        // Shifted past the active range, so it starts out as a spare.
        assert_eq!(geometry.disk_info(2, numbers).raid_disk, 3);
        assert_eq!(geometry.disk_info(2, numbers).state, 0);

        assert_eq!(
            geometry.filler_disk_info(),
            Some(DiskInfo {
                number: 2,
                major: 0,
                minor: 0,
                raid_disk: 2,
                state: 1
            })
        );
    }

    #[test]
    fn test_raid5_without_insert_point() {
        let forced = CreateParameters {
            force: true,
            ..parameters(RaidLevel::Raid5, 3, 0)
        };
        let geometry = ArrayGeometry::new(&forced, 1000, counts(3, 3, None));
        assert_eq!(geometry.insert_point, None);
        assert!(!geometry.clean);
        assert_eq!(geometry.nr_disks, 3);
        assert_eq!(geometry.filler_disk_info(), None);

        // Already degraded
        let geometry = ArrayGeometry::new(
            &parameters(RaidLevel::Raid5, 3, 0),
            1000,
            counts(2, 2, Some(1)),
        );
        assert_eq!(geometry.insert_point, None);
        assert!(geometry.clean);
        assert_eq!(geometry.nr_disks, 3);
        assert_eq!(geometry.disk_info(1, None).state, 1);
        assert_eq!(geometry.disk_info(1, None).major, 0);
    }

    #[test]
    fn test_missing_spare_still_gets_insert_point() {
        let geometry = ArrayGeometry::new(
            &parameters(RaidLevel::Raid5, 3, 1),
            1000,
            counts(3, 3, Some(3)),
        );
        assert_eq!(geometry.insert_point, Some(2));
        assert_eq!(geometry.failed_disks, 2);
        assert_eq!(geometry.spare_disks, 2);
        assert_eq!(geometry.slot_for(3), 4);
    }

    #[test]
    fn test_other_levels_are_dirty() {
        for level in [RaidLevel::Raid0, RaidLevel::Raid1, RaidLevel::Raid4] {
            let geometry =
                ArrayGeometry::new(&parameters(level, 2, 0), 1000, counts(1, 1, Some(1)));
            assert_eq!(geometry.insert_point, None);
            assert!(!geometry.clean);
        }
    }

    #[test]
    fn test_array_info() {
        let geometry = ArrayGeometry::new(
            &parameters(RaidLevel::Raid5, 3, 0),
            99_000,
            counts(3, 3, None),
        );
        let info = geometry.array_info(3);
        assert_eq!(info.major_version, 0);
        assert_eq!(info.minor_version, 90);
        assert_eq!(info.level, 5);
        assert_eq!(info.size, 99_000);
        assert_eq!(info.md_minor, 3);
        assert_eq!(info.raid_disks, 3);
        assert_eq!(info.nr_disks, 4);
        assert_eq!(info.state, MD_SB_CLEAN);
        assert_eq!(info.layout, 2);
        assert_eq!(info.chunk_size, 65536);
    }
}
