pub mod cli;
pub mod create;
pub mod examine;
pub mod prompt;
pub mod validation;

/// mdcreate version as provided by environment variables at build time
pub const MDCREATE_VERSION: &str = match option_env!("MDCREATE_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};
