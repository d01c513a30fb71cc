use std::path::PathBuf;

use log::{debug, error, info, log, warn, Level};
use serde::Serialize;

use mdcreate_api::{
    config::{ArrayCreateRequest, MemberSpec, RunPolicy},
    constants::{
        DEFAULT_CHUNK_KIB, DEFAULT_RAID5_LAYOUT_NAME, MD_SB_DISKS, MIN_MD_DRIVER_VERSION,
        MIN_MD_DRIVER_VERSION_TEXT,
    },
    error::{
        InternalError, InvalidParameterError, IoError, KernelNegotiationError, MdError,
        PreconditionError, ReportError, UserDeclinedError, ValidationError,
    },
    primitives::size::human_size,
};
use osutils::{
    block_devices::DeviceNumbers,
    md::{driver_version, MdControl, MdDevice, RunParams},
    probes::Advisory,
};
use sysdefs::{
    raid::{Raid5Layout, RaidLevel},
    redundancy,
};

use crate::{
    examine::format_time,
    prompt::{Confirm, TerminalPrompt},
};

pub mod classify;
pub mod geometry;

use classify::ClassifiedMember;
use geometry::{ArrayGeometry, MemberCounts};

/// Creation parameters after validation, with defaults filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateParameters {
    pub level: RaidLevel,
    pub layout: u32,
    pub chunk_kib: u64,
    pub raid_disks: usize,
    pub spare_disks: usize,
    pub force: bool,
}

/// Outcome of a successful create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CreateReport {
    /// What was sent to the md driver.
    pub geometry: ArrayGeometry,
    /// Whether `RUN_ARRAY` was issued.
    pub started: bool,
}

/// Level at which chosen defaults are reported.
fn defaults_level(verbose: bool) -> Level {
    if verbose {
        Level::Info
    } else {
        Level::Debug
    }
}

fn version_text(version: u32) -> String {
    format!(
        "{}.{}.{}",
        version / 10000,
        (version / 100) % 100,
        version % 100
    )
}

/// Checks the shape of `request` and fills in the layout and chunk defaults.
/// No device is opened.
pub fn resolve_parameters(
    request: &ArrayCreateRequest,
) -> Result<CreateParameters, InvalidParameterError> {
    let level = request.level.ok_or(InvalidParameterError::LevelMissing)?;
    let (raid_disks, spare_disks) = (request.raid_disks, request.spare_disks);

    if raid_disks < 1 {
        return Err(InvalidParameterError::NoRaidDisks);
    }
    if raid_disks < 2 && level.has_parity() {
        return Err(InvalidParameterError::TooFewRaidDisks {
            level: level.to_string(),
        });
    }
    if raid_disks + spare_disks > MD_SB_DISKS {
        return Err(InvalidParameterError::TooManyDisks {
            raid_disks,
            spare_disks,
            max: MD_SB_DISKS,
        });
    }

    let listed = request.members.len();
    let slots = request.slots();
    if listed > slots {
        return Err(InvalidParameterError::TooManyMembers { listed, slots });
    }
    if listed < slots {
        return Err(InvalidParameterError::TooFewMembers { listed, slots });
    }

    let layout = match (level, request.layout) {
        (RaidLevel::Raid5, Some(layout)) => layout.number(),
        (RaidLevel::Raid5, None) => {
            let layout = DEFAULT_RAID5_LAYOUT_NAME
                .parse::<Raid5Layout>()
                .unwrap_or_default();
            log!(defaults_level(request.verbose), "Layout defaults to {layout}");
            layout.number()
        }
        (_, Some(_)) => {
            return Err(InvalidParameterError::LayoutNotApplicable {
                level: level.to_string(),
            })
        }
        (_, None) => 0,
    };

    Ok(CreateParameters {
        level,
        layout,
        chunk_kib: chunk_kib(request)?,
        raid_disks,
        spare_disks,
        force: request.force,
    })
}

fn chunk_kib(request: &ArrayCreateRequest) -> Result<u64, InvalidParameterError> {
    if request.chunk.is_unset() {
        log!(
            defaults_level(request.verbose),
            "Chunk size defaults to {DEFAULT_CHUNK_KIB}K"
        );
        return Ok(DEFAULT_CHUNK_KIB);
    }

    let chunk_kib = request.chunk.kib();
    if chunk_kib
        .checked_mul(1024)
        .map_or(true, |bytes| bytes > i32::MAX as u64)
    {
        return Err(InvalidParameterError::ChunkTooLarge { chunk_kib });
    }
    Ok(chunk_kib)
}

/// Whether the largest member wastes more than 1% of its capacity at the
/// resolved size. The percentage is taken of the largest member.
pub fn exceeds_size_skew(largest_kib: u64, size_kib: u64) -> bool {
    largest_kib.saturating_sub(size_kib) * 100 > largest_kib
}

/// Results of classifying every listed member.
#[derive(Debug, Default)]
struct MemberSurvey {
    counts: MemberCounts,
    smallest: Option<(u64, PathBuf)>,
    largest: Option<(u64, PathBuf)>,
    warned: bool,
    failed: Vec<String>,
    /// Device numbers by member position; `None` for `missing` members.
    numbers: Vec<Option<DeviceNumbers>>,
}

impl MemberSurvey {
    fn record(&mut self, member: ClassifiedMember) {
        if self
            .largest
            .as_ref()
            .map_or(true, |(kib, _)| member.usable_kib > *kib)
        {
            self.largest = Some((member.usable_kib, member.path.clone()));
        }
        if self
            .smallest
            .as_ref()
            .map_or(true, |(kib, _)| member.usable_kib < *kib)
        {
            self.smallest = Some((member.usable_kib, member.path.clone()));
        }

        for advisory in &member.advisories {
            warn!("{} {advisory}", member.path.display());
            match advisory {
                Advisory::Filesystem {
                    mtime: Some(mtime), ..
                } => warn!("    mtime={}", format_time(*mtime)),
                Advisory::ArrayMember { ctime, .. } => warn!("    ctime={}", format_time(*ctime)),
                Advisory::Filesystem { mtime: None, .. } => (),
            }
            self.warned = true;
        }
    }
}

/// Classifies every member. Failures are logged and collected so that all
/// of them are reported at once.
fn survey_members(members: &[MemberSpec], raid_disks: usize, size_kib: u64) -> MemberSurvey {
    let mut survey = MemberSurvey::default();

    for (position, member) in members.iter().enumerate() {
        let Some(path) = member.path() else {
            survey.numbers.push(None);
            survey.counts.first_missing.get_or_insert(position);
            survey.counts.missing += 1;
            continue;
        };

        survey.counts.working += 1;
        if position < raid_disks {
            survey.counts.active += 1;
        }

        match classify::classify(path, size_kib) {
            Ok(classified) => {
                survey.numbers.push(Some(classified.numbers));
                survey.record(classified);
            }
            Err(e) => {
                survey.numbers.push(None);
                error!("{}: {e}", path.display());
                survey.failed.push(path.display().to_string());
            }
        }
    }

    survey
}

/// Creates the array described by `request` on the md device behind `md`.
///
/// Nothing is sent to the driver until every check has passed. Once
/// `SET_ARRAY_INFO` has been issued, failures leave the array partially
/// configured.
#[tracing::instrument(skip_all, fields(md_device = %request.target.display()))]
pub fn create(
    request: &ArrayCreateRequest,
    md: &mut dyn MdControl,
    confirm: &mut dyn Confirm,
) -> Result<CreateReport, MdError> {
    let target = request.target.display().to_string();

    let version = driver_version(md);
    if version.map_or(true, |v| v < MIN_MD_DRIVER_VERSION) {
        return Err(MdError::new(PreconditionError::UnsupportedKernel {
            found: version.map_or_else(|| "none".into(), version_text),
            minimum: MIN_MD_DRIVER_VERSION_TEXT.into(),
        }));
    }

    let parameters = resolve_parameters(request)
        .map_err(|e| MdError::new(PreconditionError::InvalidParameters(e)))?;

    let survey = survey_members(&request.members, parameters.raid_disks, request.size.kib());
    if !survey.failed.is_empty() {
        error!("Create aborted");
        return Err(MdError::new(ValidationError::DeviceValidationFailed {
            failed: survey.failed,
        }));
    }

    let size_kib = if request.size.is_unset() {
        let (smallest, _) = survey
            .smallest
            .as_ref()
            .structured(ValidationError::InsufficientDevices)?;
        if parameters.level.number() > 0 {
            log!(
                defaults_level(request.verbose),
                "Size set to {smallest}K{}",
                human_size(smallest * 1024)
            );
        }
        *smallest
    } else {
        request.size.kib()
    };

    if size_kib > i32::MAX as u64 {
        return Err(MdError::new(ValidationError::SizeTooLarge { size_kib }));
    }

    let mut warned = survey.warned;
    if parameters.level.has_redundancy() {
        if let Some((largest, path)) = &survey.largest {
            if exceeds_size_skew(*largest, size_kib) {
                warn!(
                    "Largest drive ({}) exceeds size ({size_kib}K) by more than 1%",
                    path.display()
                );
                warned = true;
            }
        }
    }

    if warned {
        match request.run {
            RunPolicy::Interactive => {
                if !confirm.confirm("Continue creating array? ") {
                    error!("Create aborted");
                    return Err(MdError::new(UserDeclinedError::UserAborted));
                }
            }
            RunPolicy::ForceRun => info!("Creation continuing despite oddities due to run policy"),
            RunPolicy::Auto if request.force => {
                info!("Creation continuing despite oddities due to force")
            }
            RunPolicy::Auto => {
                error!("Create aborted, warnings were raised and not overridden");
                return Err(MdError::new(UserDeclinedError::UserAborted));
            }
        }
    }

    let geometry = ArrayGeometry::new(&parameters, size_kib, survey.counts);
    if let Some(insert_point) = geometry.insert_point {
        debug!("Leaving slot {insert_point} empty to be rebuilt");
    }

    let info = geometry.array_info(md.device_numbers().minor);
    debug!("SET_ARRAY_INFO: {info:?}");
    md.set_array_info(&info)
        .structured(KernelNegotiationError::SetArrayInfo {
            target: target.clone(),
        })?;

    for (position, member) in request.members.iter().enumerate() {
        let numbers = match member {
            MemberSpec::Missing => None,
            MemberSpec::Device(_) => Some(
                survey
                    .numbers
                    .get(position)
                    .copied()
                    .flatten()
                    .structured(InternalError::Internal("Member was not classified"))?,
            ),
        };
        let disk = geometry.disk_info(position, numbers);
        debug!("ADD_NEW_DISK for {member}: {disk:?}");
        md.add_disk(&disk)
            .structured(KernelNegotiationError::DiskAttach {
                device: member.to_string(),
                slot: disk.raid_disk as usize,
            })?;
    }

    if let Some(filler) = geometry.filler_disk_info() {
        if let Err(e) = md.add_disk(&filler) {
            warn!(
                "Failed to add placeholder for slot {}: {e}",
                filler.raid_disk
            );
        }
    }

    let started = request.run == RunPolicy::ForceRun
        || redundancy::enough(
            parameters.level.number(),
            parameters.raid_disks,
            geometry.working_disks,
        );
    if started {
        md.run_array(&RunParams::default())
            .structured(KernelNegotiationError::RunFailed {
                target: target.clone(),
            })?;
        info!("Array {target} started");
    } else {
        info!("Not starting array {target}, not enough devices");
    }

    Ok(CreateReport { geometry, started })
}

/// Opens `request.target` and creates the array, asking on the terminal
/// when warnings come up.
pub fn create_array(request: &ArrayCreateRequest) -> Result<CreateReport, MdError> {
    let mut md = MdDevice::open(&request.target).structured(IoError::OpenTarget {
        path: request.target.display().to_string(),
    })?;
    create(request, &mut md, &mut TerminalPrompt::stdio())
}
