use serde::{Deserialize, Serialize};
use strum_macros::{EnumIter, IntoStaticStr};

/// Partition table (disk label) types.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    Serialize,
    Deserialize,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PartitionTableType {
    /// GUID Partition Table
    #[default]
    Gpt,

    /// Classic MBR/DOS table with primary, extended and logical partitions
    Msdos,

    /// s390 DASD table
    Dasd,
}

/// Highest partition number a logical MS-DOS partition can get.
pub const MSDOS_MAX_PARTITION_NUMBER: u32 = 255;

/// Number of the first logical partition in an MS-DOS table.
pub const MSDOS_FIRST_LOGICAL_NUMBER: u32 = 5;

/// Bytes reserved at the end of a GPT disk for the backup header.
pub const GPT_BACKUP_HEADER_SIZE: u64 = 33 * 512;

impl PartitionTableType {
    /// Maximum number of primary partitions the table can hold.
    pub fn max_primary(self) -> u32 {
        match self {
            Self::Gpt => 128,
            Self::Msdos => 4,
            Self::Dasd => 3,
        }
    }

    /// Whether an extended partition (and thus logical ones) is supported.
    pub fn extended_possible(self) -> bool {
        matches!(self, Self::Msdos)
    }

    /// Maximum number of logical partitions inside the extended one.
    pub fn max_logical(self) -> u32 {
        if self.extended_possible() {
            MSDOS_MAX_PARTITION_NUMBER - MSDOS_FIRST_LOGICAL_NUMBER + 1
        } else {
            0
        }
    }

    /// Bytes at the end of the disk the table keeps for itself.
    pub fn end_overhead(self) -> u64 {
        match self {
            Self::Gpt => GPT_BACKUP_HEADER_SIZE,
            Self::Msdos | Self::Dasd => 0,
        }
    }
}

impl std::fmt::Display for PartitionTableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.into())
    }
}

/// Kind of a partition inside its table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PartitionKind {
    #[default]
    Primary,
    Extended,
    Logical,
}

impl std::fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Extended => write!(f, "extended"),
            Self::Logical => write!(f, "logical"),
        }
    }
}
