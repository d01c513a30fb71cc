pub mod size;
pub mod uuid;
