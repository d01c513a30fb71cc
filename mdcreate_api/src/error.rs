use std::fmt::{Debug, Write};
use std::{borrow::Cow, panic::Location};

use serde::{ser::SerializeStruct, Deserialize, Serialize};
use strum_macros::IntoStaticStr;

/// A creation parameter is missing or inconsistent.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidParameterError {
    #[error("A RAID level is needed to create an array")]
    LevelMissing,
    #[error("A number of raid devices must be given to create an array")]
    NoRaidDisks,
    #[error("At least 2 raid devices are needed for level {level}")]
    TooFewRaidDisks { level: String },
    #[error("Too many devices requested: {raid_disks}+{spare_disks} > {max}")]
    TooManyDisks {
        raid_disks: usize,
        spare_disks: usize,
        max: usize,
    },
    #[error("Listed more devices ({listed}) than are in the array ({slots})")]
    TooManyMembers { listed: usize, slots: usize },
    #[error("Not enough devices (real or missing) listed to create this array: {listed} < {slots}")]
    TooFewMembers { listed: usize, slots: usize },
    #[error("A layout can only be given for raid5, not for {level}")]
    LayoutNotApplicable { level: String },
    #[error("Chunk size of {chunk_kib}K cannot be expressed to the md driver")]
    ChunkTooLarge { chunk_kib: u64 },
}

/// Problems detected before any device is touched.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum PreconditionError {
    #[error("Create requires md driver version {minimum} or later, found {found}")]
    UnsupportedKernel { found: String, minimum: String },
    #[error("Invalid parameters: {0}")]
    InvalidParameters(#[from] InvalidParameterError),
    #[error("Failed to load array request from '{path}'")]
    LoadRequest { path: String },
    #[error("Failed to parse array request from '{path}'")]
    ParseRequest { path: String },
    #[error("Invalid array UUID '{value}'")]
    InvalidUuid { value: String },
}

/// Member devices failed validation. Nothing has been sent to the kernel.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationError {
    #[error("Create aborted, devices failed validation: {}", .failed.join(", "))]
    DeviceValidationFailed { failed: Vec<String> },
    #[error("No size and no devices given, cannot infer array size")]
    InsufficientDevices,
    #[error("Array size of {size_kib}K cannot be expressed to the md driver")]
    SizeTooLarge { size_kib: u64 },
    #[error("No md superblock found on: {}", .devices.join(", "))]
    NoSuperblock { devices: Vec<String> },
}

/// The operator declined to continue after warnings.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum UserDeclinedError {
    #[error("Create aborted by user")]
    UserAborted,
}

/// A command to the md driver failed. The array may be partially configured.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum KernelNegotiationError {
    #[error("SET_ARRAY_INFO failed for '{target}'")]
    SetArrayInfo { target: String },
    #[error("ADD_NEW_DISK for '{device}' as slot {slot} failed")]
    DiskAttach { device: String, slot: usize },
    #[error("RUN_ARRAY failed for '{target}'")]
    RunFailed { target: String },
}

#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum IoError {
    #[error("Failed to open array device '{path}'")]
    OpenTarget { path: String },
    #[error("Failed to open device '{path}'")]
    OpenDevice { path: String },
    #[error("Failed to write superblock to '{path}'")]
    WriteSuperblock { path: String },
}

#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InternalError {
    #[error("Internal error: {0}")]
    Internal(&'static str),
    #[error("Panic: {0}")]
    Panic(String),
}

/// Each variant of `ErrorKind` corresponds to a different category of error.
/// The category tells the operator whether it is safe to simply try again.
#[derive(Debug, Eq, thiserror::Error, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// Bad parameters or unsupported environment, detected before any I/O.
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    /// Member devices are unusable, detected before the kernel is touched.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Warnings were raised and not confirmed.
    #[error(transparent)]
    UserDeclined(#[from] UserDeclinedError),

    /// The md driver rejected a command. The array may be left half
    /// configured and must be inspected before trying again.
    #[error(transparent)]
    KernelNegotiation(#[from] KernelNegotiationError),

    /// Reading or writing a device failed.
    #[error(transparent)]
    Io(#[from] IoError),

    /// A bug was encountered.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[derive(Debug)]
struct MdErrorInner {
    kind: ErrorKind,
    location: &'static Location<'static>,
    source: Option<anyhow::Error>,
    context: Vec<(Cow<'static, str>, &'static Location<'static>)>,
}

pub struct MdError(Box<MdErrorInner>);
impl MdError {
    #[track_caller]
    pub fn new(kind: impl Into<ErrorKind>) -> Self {
        MdError(Box::new(MdErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: None,
            context: Vec::new(),
        }))
    }

    #[track_caller]
    pub fn internal(message: &'static str) -> Self {
        Self::new(InternalError::Internal(message))
    }

    /// Returns a reference to the inner ErrorKind.
    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }

    /// Whether the failure happened before anything was changed, so the same
    /// operation can be attempted again after correcting the cause.
    pub fn is_safe_to_retry(&self) -> bool {
        matches!(
            self.0.kind,
            ErrorKind::Precondition(_) | ErrorKind::Validation(_) | ErrorKind::UserDeclined(_)
        )
    }
}

pub trait ReportError<T, K> {
    /// Convert this error into a structured MdError.
    fn structured(self, kind: K) -> Result<T, MdError>;
}

impl<T, K> ReportError<T, K> for Option<T>
where
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, MdError> {
        match self {
            Some(t) => Ok(t),
            None => Err(MdError(Box::new(MdErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: None,
                context: Vec::new(),
            }))),
        }
    }
}

impl<T, E, K> ReportError<T, K> for Result<T, E>
where
    E: Into<anyhow::Error>,
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, MdError> {
        match self {
            Ok(o) => Ok(o),
            Err(e) => Err(MdError(Box::new(MdErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: Some(e.into()),
                context: Vec::new(),
            }))),
        }
    }
}

pub trait MdResultExt<T> {
    /// Attach a context message to the error.
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, MdError>;
}
impl<T> MdResultExt<T> for Result<T, MdError> {
    #[track_caller]
    fn message(mut self, context: impl Into<Cow<'static, str>>) -> Result<T, MdError> {
        if let Err(ref mut e) = self {
            e.0.context.push((context.into(), Location::caller()));
        }
        self
    }
}

impl Serialize for MdError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("md-error", 5)?;
        state.serialize_field("message", &self.0.kind.to_string())?;
        match self.0.kind {
            ErrorKind::Precondition(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Validation(ref e) => state.serialize_field("error", e)?,
            ErrorKind::UserDeclined(ref e) => state.serialize_field("error", e)?,
            ErrorKind::KernelNegotiation(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Io(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Internal(ref e) => state.serialize_field("error", e)?,
        }
        state.serialize_field("category", <&str>::from(&self.0.kind))?;
        state.serialize_field(
            "location",
            &format!("{}:{}", self.0.location.file(), self.0.location.line()),
        )?;
        match self.0.source {
            Some(ref e) => state.serialize_field("cause", &Some(format!("{:?}", e)))?,
            None => state.serialize_field("cause", &None::<String>)?,
        }
        state.end()
    }
}

impl Debug for MdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.0.kind,
            self.0.location.file(),
            self.0.location.line()
        )?;

        if !self.0.context.is_empty() {
            writeln!(f, "\n\nContext:")?;
            for (i, (context, location)) in self.0.context.iter().enumerate() {
                for (j, line) in context.split('\n').enumerate() {
                    if j == 0 {
                        write!(f, "{: >5}: ", i)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                writeln!(f, " at {}:{}", location.file(), location.line())?;
            }
        }

        if let Some(ref source) = self.0.source {
            writeln!(f, "\n\nCaused by:")?;
            let mut index = 0;
            let mut source: Option<&dyn std::error::Error> = Some(source.as_ref());
            while let Some(e) = source {
                for (i, line) in e.to_string().split('\n').enumerate() {
                    if i == 0 {
                        write!(f, "{: >5}: ", index)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                f.write_char('\n')?;
                source = e.source();
                index += 1;
            }
        }
        Ok(())
    }
}
