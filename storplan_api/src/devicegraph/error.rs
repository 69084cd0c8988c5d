use serde::{Deserialize, Serialize};

/// Problems found while building a devicegraph out of its description.
#[derive(thiserror::Error, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DevicegraphError {
    #[error("Device '{0}' is defined more than once")]
    DuplicateName(String),

    #[error("Device '{name}' has an invalid size or block size")]
    InvalidSize { name: String },

    #[error("Disk '{disk}' has partitions but no partition table")]
    PartitionsWithoutTable { disk: String },

    #[error("Partition number {number} is not valid on '{disk}'")]
    InvalidPartitionNumber { disk: String, number: u32 },

    #[error("Partition '{partition}' does not fit inside '{disk}'")]
    PartitionOutOfBounds { partition: String, disk: String },

    #[error("Partitions '{first}' and '{second}' overlap")]
    OverlappingPartitions { first: String, second: String },

    #[error("Disk '{disk}' has more than one extended partition, or one on a table without extended partitions")]
    InvalidExtended { disk: String },

    #[error("Logical partition '{partition}' is not inside an extended partition")]
    LogicalOutsideExtended { partition: String },

    #[error("Device '{device}' references unknown member '{member}'")]
    UnknownMember { device: String, member: String },

    #[error("Device '{member}' is used by more than one device")]
    MemberAlreadyUsed { member: String },

    #[error("RAID '{md}' of level {level} needs at least {required} members")]
    TooFewRaidMembers {
        md: String,
        level: String,
        required: usize,
    },

    #[error("Logical volumes of '{vg}' need more space than the volume group has")]
    VolumeGroupOverflow { vg: String },

    #[error("Filesystem of type '{fs_type}' cannot be placed on '{device}'")]
    InvalidFilesystem { device: String, fs_type: String },

    #[error("Mount point '{0}' is used more than once")]
    DuplicateMountPoint(String),

    #[error("Device '{name}' was rejected: {reason}")]
    Rejected { name: String, reason: String },
}
