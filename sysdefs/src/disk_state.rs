use enumflags2::{bitflags, BitFlags};

/// Per-slot state bits carried in `ADD_NEW_DISK` and in the superblock disk
/// descriptors.
#[bitflags]
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DiskStateFlag {
    /// The slot is deliberately unavailable.
    Faulty = 1 << 0,
    Active = 1 << 1,
    Sync = 1 << 2,
    Removed = 1 << 3,
}

pub type DiskState = BitFlags<DiskStateFlag>;

/// State of a member occupying an active slot with valid data.
pub fn in_sync() -> DiskState {
    DiskStateFlag::Active | DiskStateFlag::Sync
}

/// State of an empty placeholder slot.
pub fn faulty() -> DiskState {
    DiskStateFlag::Faulty.into()
}

/// State of a spare or otherwise idle slot.
pub fn idle() -> DiskState {
    DiskState::empty()
}

/// Space separated names of the flags set in `state`, or `idle`.
pub fn describe(state: DiskState) -> String {
    if state.is_empty() {
        return "idle".into();
    }

    state
        .iter()
        .map(|flag| match flag {
            DiskStateFlag::Faulty => "faulty",
            DiskStateFlag::Active => "active",
            DiskStateFlag::Sync => "sync",
            DiskStateFlag::Removed => "removed",
        })
        .collect::<Vec<_>>()
        .join(" ")
}
