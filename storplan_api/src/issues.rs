//! Problems found while creating devices in best effort mode.

use std::fmt::Display;

use serde::Serialize;
use strum_macros::IntoStaticStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The layout was created without the affected device.
    Warn,

    /// A whole category of devices could not be created.
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, IntoStaticStr)]
#[serde(rename_all = "kebab-case", tag = "issue")]
#[strum(serialize_all = "kebab-case")]
pub enum IssueKind {
    NoPhysicalVolumes { vg: String },
    MissingRaidMembers { md: String },
    MissingBcacheBacking { bcache: String },
    MissingReusableDevice { name: String },
    NoDiskSpace { category: String },
    CouldNotCreate { category: String, reason: String },
}

impl IssueKind {
    pub fn default_severity(&self) -> Severity {
        match self {
            Self::NoDiskSpace { .. } | Self::CouldNotCreate { .. } => Severity::Fatal,
            _ => Severity::Warn,
        }
    }
}

impl Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoPhysicalVolumes { vg } => {
                write!(f, "No physical volumes for volume group '{vg}'")
            }
            Self::MissingRaidMembers { md } => write!(f, "No members for RAID '{md}'"),
            Self::MissingBcacheBacking { bcache } => {
                write!(f, "No backing device for bcache '{bcache}'")
            }
            Self::MissingReusableDevice { name } => {
                write!(f, "Device '{name}' to be reused was not found")
            }
            Self::NoDiskSpace { category } => write!(f, "Not enough disk space for {category}"),
            Self::CouldNotCreate { category, reason } => {
                write!(f, "Could not create {category}: {reason}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub severity: Severity,
    #[serde(flatten)]
    pub kind: IssueKind,

    /// Planned device the issue is about, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

impl Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.severity, self.kind)
    }
}

/// Append-only list of issues.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct IssuesList(Vec<Issue>);

impl IssuesList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: IssueKind, device: Option<String>) {
        self.0.push(Issue {
            severity: kind.default_severity(),
            kind,
            device,
        });
    }

    pub fn extend(&mut self, other: IssuesList) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Issue> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_fatal(&self) -> bool {
        self.0.iter().any(|i| i.severity == Severity::Fatal)
    }
}
