pub mod image;
pub mod md;

pub use image::{make_image, scratch_images, write_ext2_signature, write_reiserfs_signature};
pub use md::{MdCommand, RecordingMd};
