pub mod disk_state;
pub mod raid;
pub mod redundancy;
