use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

use mdcreate_api::{
    config::{ArrayCreateRequest, MemberSpec, RunPolicy},
    error::{MdError, PreconditionError, ReportError},
    primitives::{size::KibCount, uuid::ArrayUuid},
};
use sysdefs::raid::{Raid5Layout, RaidLevel};

use crate::MDCREATE_VERSION;

#[derive(Parser, Debug)]
#[clap(version = MDCREATE_VERSION)]
pub struct Cli {
    /// Logging verbosity [OFF, ERROR, WARN, INFO, DEBUG, TRACE]
    #[arg(global = true, short, long, default_value_t = LevelFilter::Info)]
    pub verbosity: LevelFilter,

    /// Emit tracing spans as JSON on stderr
    #[arg(global = true, long)]
    pub trace: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a new array with a 0.90 superblock
    Create(CreateArgs),

    /// Check an array request file without touching any device
    Validate {
        /// The array request to check
        #[clap(index = 1)]
        config: PathBuf,
    },

    /// Print the md superblock of each device
    Examine {
        /// Only show members of the array with this UUID
        #[clap(long)]
        uuid: Option<String>,

        #[clap(required = true)]
        devices: Vec<PathBuf>,
    },

    /// Erase the md superblock of each device
    ZeroSuperblock {
        /// Overwrite the superblock region even if it holds no superblock
        #[clap(short, long)]
        force: bool,

        #[clap(required = true)]
        devices: Vec<PathBuf>,
    },
}

impl Display for Commands {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            Commands::Create(_) => write!(f, "create"),
            Commands::Validate { .. } => write!(f, "validate"),
            Commands::Examine { .. } => write!(f, "examine"),
            Commands::ZeroSuperblock { .. } => write!(f, "zero-superblock"),
        }
    }
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// The md device to configure, for instance /dev/md0
    #[clap(index = 1, required_unless_present = "config")]
    pub target: Option<PathBuf>,

    /// Member devices in slot order; `missing` reserves an empty slot
    #[clap(index = 2, conflicts_with = "config")]
    pub members: Vec<MemberSpec>,

    /// Read the request from a YAML file instead of the command line
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// RAID level: linear, raid0, raid1, raid4, raid5 or their numbers
    #[clap(short, long, required_unless_present = "config")]
    pub level: Option<RaidLevel>,

    /// Number of active devices
    #[clap(short = 'n', long, required_unless_present = "config")]
    pub raid_devices: Option<usize>,

    /// Number of spare devices
    #[clap(short = 'x', long, default_value_t = 0)]
    pub spare_devices: usize,

    /// Parity layout for raid5
    #[clap(short = 'p', long)]
    pub layout: Option<Raid5Layout>,

    /// Chunk size, in KiB unless suffixed
    #[clap(short, long)]
    pub chunk: Option<KibCount>,

    /// Space to use on each device, in KiB unless suffixed
    #[clap(short = 'z', long)]
    pub size: Option<KibCount>,

    /// Proceed past warnings and start the array regardless of its health
    #[clap(short = 'R', long, conflicts_with = "auto")]
    pub run: bool,

    /// Never ask for confirmation
    #[clap(long)]
    pub auto: bool,

    /// Ignore warnings and skip the raid5 rebuild optimization
    #[clap(short, long)]
    pub force: bool,

    /// Report chosen defaults
    #[clap(long)]
    pub verbose: bool,

    /// Path to save an eventual fatal error
    #[clap(short, long)]
    pub error: Option<PathBuf>,
}

impl CreateArgs {
    fn run_policy(&self) -> Option<RunPolicy> {
        if self.run {
            Some(RunPolicy::ForceRun)
        } else if self.auto {
            Some(RunPolicy::Auto)
        } else {
            None
        }
    }

    /// Builds the request from the flags, or loads it from `--config` and
    /// applies the flags that were given on top.
    pub fn to_request(&self) -> Result<ArrayCreateRequest, MdError> {
        let mut request = match &self.config {
            Some(path) => ArrayCreateRequest::from_file(path)?,
            None => ArrayCreateRequest {
                target: self.target.clone().unwrap_or_default(),
                level: self.level,
                layout: self.layout,
                chunk: self.chunk.unwrap_or_default(),
                size: self.size.unwrap_or_default(),
                raid_disks: self.raid_devices.unwrap_or_default(),
                spare_disks: self.spare_devices,
                members: self.members.clone(),
                run: self.run_policy().unwrap_or_default(),
                verbose: self.verbose,
                force: self.force,
            },
        };

        if self.config.is_some() {
            if let Some(target) = &self.target {
                request.target = target.clone();
            }
            if let Some(run) = self.run_policy() {
                request.run = run;
            }
            request.force |= self.force;
            request.verbose |= self.verbose;
        }

        Ok(request)
    }
}

/// Parses the `--uuid` filter of `examine`.
pub fn parse_uuid(value: &str) -> Result<ArrayUuid, MdError> {
    value.parse().structured(PreconditionError::InvalidUuid {
        value: value.to_owned(),
    })
}
