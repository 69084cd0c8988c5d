use std::fmt::{Debug, Display, Write};
use std::{borrow::Cow, panic::Location};

use serde::{ser::SerializeStruct, Deserialize, Serialize};
use strum_macros::IntoStaticStr;

/// There is not enough space for the current constraints and candidate disks.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum NoSpaceError {
    #[error("Could not find a valid partitioning distribution")]
    NoDistribution,
    #[error("Could not find a valid distribution for the partitions of '{device}'")]
    NoDistributionInside { device: String },
    #[error("Volume group '{vg}' has {available} available but its logical volumes need {needed}")]
    VolumeGroupTooSmall {
        vg: String,
        available: String,
        needed: String,
    },
    #[error("Partition '{name}' cannot grow to {size}, not enough adjacent free space")]
    CannotGrow { name: String, size: String },
    #[error("Space assigned on '{disk}' no longer fits the planned partitions")]
    OutdatedDistribution { disk: String },
}

/// A structural constraint cannot be met regardless of the available space.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InfeasibleError {
    #[error("Disk '{disk}' has no free primary partition slot")]
    NoPrimarySlot { disk: String },
    #[error("Disk '{disk}' has no free logical partition slot")]
    NoLogicalSlot { disk: String },
    #[error("Disk '{disk}' cannot hold an extended partition")]
    NoExtendedPossible { disk: String },
    #[error("Region requested on '{disk}' overlaps an existing partition")]
    Overlap { disk: String },
    #[error("Region requested on '{disk}' lies outside the usable area")]
    OutOfBounds { disk: String },
    #[error("RAID '{md}' of level {level} needs at least {required} members, found {found}")]
    TooFewRaidMembers {
        md: String,
        level: String,
        required: usize,
        found: usize,
    },
    #[error("Filesystem on '{name}' cannot be shrunk")]
    CannotShrink { name: String },
    #[error("Device '{name}' cannot be used for this operation: {reason}")]
    UnsupportedDevice { name: String, reason: String },
}

/// A planned member device could not be resolved to a concrete device.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum MissingDependencyError {
    #[error("No devices available for RAID '{md}'")]
    NoRaidMembers { md: String },
    #[error("No physical volumes available for volume group '{vg}'")]
    NoPhysicalVolumes { vg: String },
    #[error("No backing device available for bcache '{bcache}'")]
    NoBcacheBacking { bcache: String },
    #[error("Device '{name}' to be reused was not found")]
    ReuseTargetNotFound { name: String },
    #[error("Disk '{name}' was not found")]
    DiskNotFound { name: String },
}

/// Every option of the search was tried without success.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ExhaustedError {
    #[error("No valid partitioning layout found")]
    NoValidLayout,
    #[error("No candidate devices to propose a layout on")]
    NoCandidateDevices,
    #[error("Search stopped after {attempts} attempt(s), no valid partitioning layout found")]
    Cancelled { attempts: usize },
}

/// User provided input was invalid.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidInputError {
    #[error("Failed to load proposal request from '{path}'")]
    LoadRequest { path: String },
    #[error("Failed to parse proposal request")]
    ParseRequest,
    #[error("Invalid devicegraph description")]
    InvalidDevicegraph,
    #[error("Planned device '{device}' is invalid: {reason}")]
    InvalidPlannedDevice { device: String, reason: String },
    #[error("Invalid proposal settings: {reason}")]
    InvalidSettings { reason: String },
}

#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InternalError {
    #[error("Internal error: {0}")]
    Internal(&'static str),
    #[error("Device '{name}' vanished from the devicegraph")]
    DeviceVanished { name: String },
    #[error("Failed to serialize the result")]
    SerializeOutput,
    #[error("Failed to write the result to '{path}'")]
    WriteOutput { path: String },
}

/// Each variant of `ErrorKind` corresponds to a different category of error.
/// The retry loops of the proposal decide what to do based on the category.
#[derive(Debug, Eq, thiserror::Error, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// No admissible distribution or assignment exists.
    #[error(transparent)]
    NoSpace(#[from] NoSpaceError),

    /// A structural constraint cannot be met.
    #[error(transparent)]
    Infeasible(#[from] InfeasibleError),

    /// A member device could not be resolved.
    #[error(transparent)]
    MissingDependency(#[from] MissingDependencyError),

    /// All candidate combinations were tried and failed.
    #[error(transparent)]
    Exhausted(#[from] ExhaustedError),

    /// Invalid user input.
    #[error(transparent)]
    InvalidInput(#[from] InvalidInputError),

    /// A bug was encountered.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[derive(Debug)]
struct ProposalErrorInner {
    kind: ErrorKind,
    location: &'static Location<'static>,
    source: Option<anyhow::Error>,
    context: Vec<(Cow<'static, str>, &'static Location<'static>)>,
}

pub struct ProposalError(Box<ProposalErrorInner>);
impl ProposalError {
    #[track_caller]
    pub fn new(kind: impl Into<ErrorKind>) -> Self {
        ProposalError(Box::new(ProposalErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: None,
            context: Vec::new(),
        }))
    }

    #[track_caller]
    pub fn internal(msg: &'static str) -> Self {
        Self::new(InternalError::Internal(msg))
    }

    /// Creates an error caused by an earlier one, keeping the earlier error
    /// reachable through `cause()`.
    #[track_caller]
    pub fn caused_by(kind: impl Into<ErrorKind>, cause: ProposalError) -> Self {
        ProposalError(Box::new(ProposalErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: Some(anyhow::Error::new(cause)),
            context: Vec::new(),
        }))
    }

    pub fn unstructured(self, context: impl Into<Cow<'static, str>>) -> anyhow::Error {
        match self.0.source {
            Some(source) => source.context(self.0.kind).context(context.into()),
            None => anyhow::Error::from(self.0.kind).context(context.into()),
        }
    }

    /// Returns a reference to the inner ErrorKind.
    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }

    /// Returns the earlier proposal error this one was caused by, if any.
    pub fn cause(&self) -> Option<&ProposalError> {
        self.0.source.as_ref()?.downcast_ref::<ProposalError>()
    }

    /// Whether the search may continue with another option after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.0.kind,
            ErrorKind::NoSpace(_) | ErrorKind::Infeasible(_) | ErrorKind::Exhausted(_)
        )
    }

    pub fn is_no_space(&self) -> bool {
        matches!(self.0.kind, ErrorKind::NoSpace(_))
    }

    /// Name of the error category, e.g. `no-space`.
    pub fn category(&self) -> &'static str {
        <&str>::from(&self.0.kind)
    }
}

pub trait ReportError<T, K> {
    /// Convert this error into a structured ProposalError.
    fn structured(self, kind: K) -> Result<T, ProposalError>;
}

impl<T, K> ReportError<T, K> for Option<T>
where
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, ProposalError> {
        match self {
            Some(t) => Ok(t),
            None => Err(ProposalError(Box::new(ProposalErrorInner {
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
    fn structured(self, kind: K) -> Result<T, ProposalError> {
        match self {
            Ok(o) => Ok(o),
            Err(e) => Err(ProposalError(Box::new(ProposalErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: Some(e.into()),
                context: Vec::new(),
            }))),
        }
    }
}

pub trait ProposalResultExt<T> {
    /// Attach a context message to the error.
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, ProposalError>;

    /// Convert the error into an unstructured error.
    fn unstructured(self, context: impl Into<Cow<'static, str>>) -> Result<T, anyhow::Error>;
}

impl<T> ProposalResultExt<T> for Result<T, ProposalError> {
    #[track_caller]
    fn message(mut self, context: impl Into<Cow<'static, str>>) -> Result<T, ProposalError> {
        if let Err(ref mut e) = self {
            e.0.context.push((context.into(), Location::caller()));
        }
        self
    }

    fn unstructured(self, context: impl Into<Cow<'static, str>>) -> Result<T, anyhow::Error> {
        self.map_err(|e| e.unstructured(context))
    }
}

impl Serialize for ProposalError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("proposal-error", 5)?;
        state.serialize_field("message", &self.0.kind.to_string())?;
        match self.0.kind {
            ErrorKind::NoSpace(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Infeasible(ref e) => state.serialize_field("error", e)?,
            ErrorKind::MissingDependency(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Exhausted(ref e) => state.serialize_field("error", e)?,
            ErrorKind::InvalidInput(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Internal(ref e) => state.serialize_field("error", e)?,
        }
        state.serialize_field("category", self.category())?;
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

impl Display for ProposalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.kind)
    }
}

impl std::error::Error for ProposalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0
            .source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl Debug for ProposalError {
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
