use serde::{Deserialize, Serialize};

use sysdefs::{filesystems::FilesystemType, partition_ids::PartitionId};

use crate::{error::ProposalError, primitives::bytes::ByteCount};

use super::{invalid_device, CommonAttrs, MemberRole};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedPartition {
    #[serde(flatten)]
    pub common: CommonAttrs,

    /// Disk the partition must be placed on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<String>,

    /// Whether the partition must be primary.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub primary: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_id: Option<PartitionId>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub bootable: bool,

    /// The partition must start before this offset of the disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_start_offset: Option<ByteCount>,

    /// Size as a percentage of the disk. Resolved into fixed sizes before
    /// placing the partition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_size: Option<u8>,

    /// For reused partitions: resize the partition to `max_size`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub resize: bool,
}

impl PlannedPartition {
    /// Partition id the created partition gets.
    ///
    /// An explicit id wins; otherwise it follows the role (RAID or LVM
    /// member) or the filesystem (swap).
    pub fn effective_partition_id(&self) -> PartitionId {
        if let Some(id) = self.partition_id {
            return id;
        }
        match (&self.common.role, self.common.filesystem_type) {
            (Some(MemberRole::Raid(_)), _) => PartitionId::Raid,
            (Some(MemberRole::PhysicalVolume(_)), _) => PartitionId::Lvm,
            (_, Some(FilesystemType::Swap)) => PartitionId::Swap,
            (_, Some(FilesystemType::Vfat)) if self.bootable => PartitionId::Esp,
            _ => PartitionId::Linux,
        }
    }

    /// Whether reusing the partition shrinks a device of `current` size.
    pub fn shrinks(&self, current: ByteCount) -> bool {
        self.resize && self.common.max_size < current
    }

    /// Returns a copy with `percent_size` resolved against a disk of
    /// `disk_size`: minimum, maximum and desired size become the same.
    pub fn with_resolved_percent(&self, disk_size: ByteCount) -> Self {
        let Some(percent) = self.percent_size else {
            return self.clone();
        };
        let size = ByteCount(
            (disk_size.bytes() as u128 * u128::from(percent.min(100)) / 100) as u64,
        );
        let mut resolved = self.clone();
        resolved.percent_size = None;
        resolved.common.min_size = size;
        resolved.common.max_size = size;
        resolved.common.desired_size = Some(size);
        resolved
    }

    pub(crate) fn validate(&self, id: &str) -> Result<(), ProposalError> {
        if let Some(percent) = self.percent_size {
            if percent == 0 || percent > 100 {
                return Err(invalid_device(id, "percentage must be between 1 and 100"));
            }
            if self.disk.is_none() {
                return Err(invalid_device(id, "a percentage size needs a disk"));
            }
        }
        if self.resize {
            if !self.common.is_reuse() {
                return Err(invalid_device(id, "only reused partitions can be resized"));
            }
            if self.common.max_size.is_unlimited() {
                return Err(invalid_device(id, "resizing needs a maximum size"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_id() {
        let mut part = PlannedPartition::default();
        assert_eq!(part.effective_partition_id(), PartitionId::Linux);

        part.common.filesystem_type = Some(FilesystemType::Swap);
        assert_eq!(part.effective_partition_id(), PartitionId::Swap);

        part.common.filesystem_type = None;
        part.common.role = Some(MemberRole::PhysicalVolume("system".into()));
        assert_eq!(part.effective_partition_id(), PartitionId::Lvm);

        part.partition_id = Some(PartitionId::Prep);
        assert_eq!(part.effective_partition_id(), PartitionId::Prep);
    }

    #[test]
    fn test_percent_size() {
        let part = PlannedPartition {
            disk: Some("/dev/sda".into()),
            percent_size: Some(25),
            ..Default::default()
        };
        part.validate("p").unwrap();
        let resolved = part.with_resolved_percent(ByteCount::gib(100));
        assert_eq!(resolved.common.min_size, ByteCount::gib(25));
        assert_eq!(resolved.common.max_size, ByteCount::gib(25));
        assert_eq!(resolved.common.desired(), ByteCount::gib(25));
        assert!(resolved.percent_size.is_none());

        let no_disk = PlannedPartition {
            percent_size: Some(25),
            ..Default::default()
        };
        assert!(no_disk.validate("p").is_err());
    }

    #[test]
    fn test_shrinks() {
        let part = PlannedPartition {
            common: CommonAttrs {
                reuse_name: Some("/dev/sda1".into()),
                max_size: ByteCount::gib(5),
                ..Default::default()
            },
            resize: true,
            ..Default::default()
        };
        part.validate("p").unwrap();
        assert!(part.shrinks(ByteCount::gib(10)));
        assert!(!part.shrinks(ByteCount::gib(4)));
    }
}
