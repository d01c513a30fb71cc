pub mod block_devices;
pub mod devnames;
pub mod md;
pub mod probes;
pub mod superblock;

#[cfg(any(test, feature = "test-utilities"))]
pub mod testutils;
