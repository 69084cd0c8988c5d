use serde::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;

use crate::partition_tables::PartitionTableType;

/// Partition id (type code) of a partition, independent of the table type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
    IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PartitionId {
    /// Generic Linux data
    #[default]
    Linux,

    /// Linux swap
    Swap,

    /// LVM physical volume
    Lvm,

    /// Software RAID member
    Raid,

    /// EFI System Partition
    Esp,

    /// BIOS boot partition for GRUB on GPT
    BiosBoot,

    /// PowerPC PReP boot
    Prep,

    /// Container of logical partitions (MS-DOS only)
    Extended,
}

impl PartitionId {
    /// MS-DOS type byte.
    pub fn msdos_code(self) -> u8 {
        match self {
            Self::Linux => 0x83,
            Self::Swap => 0x82,
            Self::Lvm => 0x8e,
            Self::Raid => 0xfd,
            Self::Esp => 0xef,
            Self::BiosBoot => 0x83,
            Self::Prep => 0x41,
            Self::Extended => 0x0f,
        }
    }

    /// GPT partition type GUID.
    pub fn gpt_type_guid(self) -> &'static str {
        match self {
            Self::Linux | Self::Extended => "0fc63daf-8483-4772-8e79-3d69d8477de4",
            Self::Swap => "0657fd6d-a4ab-43c4-84e5-0933c84b4f4f",
            Self::Lvm => "e6d6d379-f507-44c2-a23c-238f2a3df928",
            Self::Raid => "a19d880f-05fc-4d3b-a006-743f0f84911e",
            Self::Esp => "c12a7328-f81f-11d2-ba4b-00a0c93ec93b",
            Self::BiosBoot => "21686148-6449-6e6f-744e-656564454649",
            Self::Prep => "9e1a2d38-c612-4316-aa26-8b49521e5a8b",
        }
    }

    /// Whether the id can be used in a table of the given type.
    pub fn valid_for(self, table: PartitionTableType) -> bool {
        match self {
            Self::BiosBoot => table == PartitionTableType::Gpt,
            Self::Extended => table == PartitionTableType::Msdos,
            _ => true,
        }
    }
}

impl std::fmt::Display for PartitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_id_codes() {
        assert_eq!(PartitionId::Lvm.msdos_code(), 0x8e);
        assert_eq!(
            PartitionId::Esp.gpt_type_guid(),
            "c12a7328-f81f-11d2-ba4b-00a0c93ec93b"
        );
        assert!(PartitionId::BiosBoot.valid_for(PartitionTableType::Gpt));
        assert!(!PartitionId::BiosBoot.valid_for(PartitionTableType::Msdos));
        assert_eq!(PartitionId::BiosBoot.to_string(), "bios-boot");
    }
}
