use std::{
    panic,
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, Error};
use clap::Parser;
use log::{debug, error};

use mdcreate::{
    cli::{self, Cli, Commands},
    create, examine, validation, MDCREATE_VERSION,
};
use mdcreate_api::error::{InternalError, MdError, MdResultExt};
use osutils::devnames::DeviceNameCache;

fn write_error(path: &Path, error: &MdError) {
    if let Err(e) = std::fs::write(path, serde_yaml::to_string(error).unwrap_or_default()) {
        error!("Failed to write error to file: {e}");
    }
}

fn zero_superblocks(devices: &[PathBuf], force: bool) -> Result<(), MdError> {
    let mut last_error = None;
    for device in devices {
        if let Err(e) = examine::zero_superblock(device, force) {
            error!("{e:?}");
            last_error = Some(e);
        }
    }

    last_error.map_or(Ok(()), Err)
}

fn run_mdcreate(args: &Cli) -> Result<(), MdError> {
    debug!("mdcreate version: {MDCREATE_VERSION}");

    // Catch fast commands
    match &args.command {
        Commands::Validate { config } => return validation::validate_request_file(config),

        Commands::Examine { uuid, devices } => {
            let filter = uuid.as_deref().map(cli::parse_uuid).transpose()?;
            let report = examine::examine(devices, filter);
            let names = DeviceNameCache::new();
            for member in &report.members {
                println!("{}", examine::render(member, &names));
            }
            return report.check();
        }

        Commands::ZeroSuperblock { force, devices } => {
            return zero_superblocks(devices, *force);
        }

        Commands::Create(_) => (),
    }

    let res = panic::catch_unwind(move || match &args.command {
        Commands::Create(create_args) => {
            let res = create_args
                .to_request()
                .and_then(|request| create::create_array(&request));

            match &res {
                Ok(report) => debug!(
                    "Transmitted geometry:\n{}",
                    serde_yaml::to_string(report).unwrap_or_default()
                ),
                Err(e) => {
                    if let Some(error_path) = create_args.error.as_ref() {
                        write_error(error_path, e);
                    }
                }
            }

            res.map(|_| ())
                .message(format!("Failed to execute '{}' command", args.command))
        }
        _ => Err(MdError::internal("Invalid command")),
    });

    match res {
        Err(e) => Err(MdError::new(InternalError::Panic(format!("{e:?}")))),
        Ok(r) => r,
    }
}

fn setup_logging(args: &Cli) -> Result<(), Error> {
    env_logger::builder()
        .format_timestamp(None)
        .filter_level(args.verbosity)
        .try_init()
        .context("Logger already registered")
}

fn setup_tracing(args: &Cli) -> Result<(), Error> {
    use tracing_subscriber::{filter, fmt, layer::SubscriberExt, Layer};

    if args.trace {
        let json = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(filter::LevelFilter::INFO);

        tracing::subscriber::set_global_default(tracing_subscriber::Registry::default().with(json))
            .context("Failed to set global default subscriber")?;
    }

    Ok(())
}

fn main() -> ExitCode {
    // Parse args
    let args = Cli::parse();

    // Initialize the loggers
    if let Err(e) = setup_logging(&args) {
        eprintln!("Failed to initialize logging: {e:?}");
        return ExitCode::from(2);
    }

    if let Err(e) = setup_tracing(&args) {
        error!("Failed to initialize tracing: {e:?}");
        return ExitCode::from(2);
    }

    match run_mdcreate(&args) {
        Ok(()) => {
            debug!("'{}' completed", args.command);
            ExitCode::SUCCESS
        }
        Err(e) if e.is_safe_to_retry() => {
            error!("mdcreate failed: {e:?}");
            ExitCode::from(1)
        }
        Err(e) => {
            error!("mdcreate failed: {e:?}");
            ExitCode::from(2)
        }
    }
}
