//! How many members an array of a given level needs before it can run.

use crate::raid::RaidLevel;

/// Minimum number of live members an array with `raid_disks` slots needs to
/// run at the md level `level`.
///
/// Levels without an entry never run degraded.
pub fn min_available(level: i32, raid_disks: usize) -> usize {
    match level {
        -1 | 0 => raid_disks,
        1 => raid_disks.min(1),
        4 | 5 => raid_disks.saturating_sub(1),
        _ => raid_disks,
    }
}

/// Whether `available` live members are enough to run the array.
pub fn enough(level: i32, raid_disks: usize, available: usize) -> bool {
    available >= min_available(level, raid_disks)
}

impl RaidLevel {
    pub fn min_available(self, raid_disks: usize) -> usize {
        min_available(self.number(), raid_disks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_available() {
        for n in 1..=27 {
            assert_eq!(min_available(0, n), n);
            assert_eq!(min_available(-1, n), n);
            assert_eq!(min_available(1, n), 1);
            assert_eq!(min_available(4, n), n - 1);
            assert_eq!(min_available(5, n), n - 1);
            assert_eq!(min_available(6, n), n);
            assert_eq!(min_available(42, n), n);
        }
        assert_eq!(min_available(5, 0), 0);
        assert_eq!(RaidLevel::Raid5.min_available(3), 2);
    }

    #[test]
    fn test_enough() {
        assert!(enough(0, 4, 4));
        assert!(!enough(0, 4, 3));
        assert!(enough(1, 2, 1));
        assert!(!enough(1, 2, 0));
        assert!(enough(5, 3, 2));
        assert!(!enough(5, 3, 1));
        assert!(!enough(10, 4, 3));
    }
}
