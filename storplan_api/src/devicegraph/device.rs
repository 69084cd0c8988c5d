use serde::{Deserialize, Serialize};
use strum_macros::{EnumIs, IntoStaticStr};

use sysdefs::{
    filesystems::FilesystemType,
    partition_ids::PartitionId,
    partition_tables::{PartitionKind, PartitionTableType},
};

use crate::primitives::{bytes::ByteCount, region::Region};

/// Software RAID levels.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RaidLevel {
    Raid0,
    Raid1,
    Raid5,
    Raid6,
    Raid10,
}

impl RaidLevel {
    /// Smallest number of members an array of this level can be built with.
    pub fn min_members(self) -> usize {
        match self {
            Self::Raid0 | Self::Raid1 | Self::Raid10 => 2,
            Self::Raid5 => 3,
            Self::Raid6 => 4,
        }
    }

    /// Usable size of an array with `count` members of `member_size` each.
    pub fn array_size(self, member_size: ByteCount, count: usize) -> ByteCount {
        let count = count as u64;
        ByteCount(match self {
            Self::Raid0 => member_size.bytes() * count,
            Self::Raid1 => member_size.bytes(),
            Self::Raid5 => member_size.bytes() * count.saturating_sub(1),
            Self::Raid6 => member_size.bytes() * count.saturating_sub(2),
            Self::Raid10 => member_size.bytes() * count / 2,
        })
    }
}

impl std::fmt::Display for RaidLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    #[default]
    Writethrough,
    Writeback,
    Writearound,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MountPoint {
    pub path: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disk {
    pub name: String,
    pub size: ByteCount,
    pub block_size: u64,
    pub partition_table: Option<PartitionTableType>,

    /// Table type used when a partition table has to be created.
    pub preferred_table: PartitionTableType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub name: String,
    pub number: u32,
    pub region: Region,
    pub kind: PartitionKind,
    pub id: PartitionId,
    pub bootable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Md {
    pub name: String,
    pub level: RaidLevel,
    pub chunk_size: Option<ByteCount>,
    pub size: ByteCount,
    pub block_size: u64,
    pub partition_table: Option<PartitionTableType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LvmVg {
    /// Device path, e.g. `/dev/system`.
    pub name: String,
    pub vg_name: String,
    pub extent_size: ByteCount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LvmLv {
    /// Device path, e.g. `/dev/system/root`.
    pub name: String,
    pub lv_name: String,
    pub size: ByteCount,
    pub stripes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bcache {
    pub name: String,
    pub cache_mode: CacheMode,
    pub size: ByteCount,
    pub block_size: u64,
    pub partition_table: Option<PartitionTableType>,
}

/// A block device that is not part of any disk the engine can partition,
/// e.g. a Xen virtual partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrayBlkDevice {
    pub name: String,
    pub size: ByteCount,
    pub block_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NfsSource {
    pub server: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filesystem {
    pub fs_type: FilesystemType,
    pub label: Option<String>,
    pub mount_point: Option<MountPoint>,

    /// Only set for NFS mounts, which have no block device underneath.
    pub nfs: Option<NfsSource>,
}

impl Filesystem {
    pub fn new(fs_type: FilesystemType) -> Self {
        Self {
            fs_type,
            label: None,
            mount_point: None,
            nfs: None,
        }
    }

    /// Returns the mount path when the filesystem is mounted.
    pub fn mount_path(&self) -> Option<&str> {
        self.mount_point.as_ref().map(|mp| mp.path.as_str())
    }
}

/// A node of the devicegraph.
#[derive(Debug, Clone, PartialEq, Eq, EnumIs, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Device {
    Disk(Disk),
    Partition(Partition),
    Md(Md),
    LvmVg(LvmVg),
    LvmLv(LvmLv),
    Bcache(Bcache),
    StrayBlkDevice(StrayBlkDevice),
    Filesystem(Filesystem),
}

/// An edge of the devicegraph. Edges always point from the ancestor to the
/// descendant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Relation {
    /// Disk/RAID/bcache to partition, volume group to logical volume.
    Holds,

    /// RAID member, LVM physical volume or bcache backing device.
    Member,

    /// Caching device of a bcache.
    Caching,

    /// Block device to its filesystem.
    Formats,
}

impl Device {
    /// Device name, filesystems have none.
    pub fn name(&self) -> Option<&str> {
        Some(match self {
            Self::Disk(d) => &d.name,
            Self::Partition(p) => &p.name,
            Self::Md(m) => &m.name,
            Self::LvmVg(vg) => &vg.name,
            Self::LvmLv(lv) => &lv.name,
            Self::Bcache(b) => &b.name,
            Self::StrayBlkDevice(s) => &s.name,
            Self::Filesystem(_) => return None,
        })
    }

    /// Returns the kind of the device as a string, for messages.
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    /// Whether a filesystem can be placed directly on the device.
    pub fn is_block_device(&self) -> bool {
        !matches!(self, Self::LvmVg(_) | Self::Filesystem(_))
    }

    /// Whether the device can carry a partition table.
    pub fn is_partitionable(&self) -> bool {
        matches!(self, Self::Disk(_) | Self::Md(_) | Self::Bcache(_))
    }

    pub fn block_size(&self) -> Option<u64> {
        match self {
            Self::Disk(d) => Some(d.block_size),
            Self::Partition(p) => Some(p.region.block_size),
            Self::Md(m) => Some(m.block_size),
            Self::Bcache(b) => Some(b.block_size),
            Self::StrayBlkDevice(s) => Some(s.block_size),
            Self::LvmLv(_) => Some(crate::constants::DEFAULT_BLOCK_SIZE),
            Self::LvmVg(_) | Self::Filesystem(_) => None,
        }
    }

    pub fn partition_table(&self) -> Option<PartitionTableType> {
        match self {
            Self::Disk(d) => d.partition_table,
            Self::Md(m) => m.partition_table,
            Self::Bcache(b) => b.partition_table,
            _ => None,
        }
    }

    pub(crate) fn partition_table_mut(&mut self) -> Option<&mut Option<PartitionTableType>> {
        match self {
            Self::Disk(d) => Some(&mut d.partition_table),
            Self::Md(m) => Some(&mut m.partition_table),
            Self::Bcache(b) => Some(&mut b.partition_table),
            _ => None,
        }
    }

    /// Partition table type used when the device gets a new table.
    pub fn preferred_table(&self) -> PartitionTableType {
        match self {
            Self::Disk(d) => d.partition_table.unwrap_or(d.preferred_table),
            _ => self.partition_table().unwrap_or_default(),
        }
    }

    pub fn as_partition(&self) -> Option<&Partition> {
        match self {
            Self::Partition(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_filesystem(&self) -> Option<&Filesystem> {
        match self {
            Self::Filesystem(fs) => Some(fs),
            _ => None,
        }
    }

    pub fn as_vg(&self) -> Option<&LvmVg> {
        match self {
            Self::LvmVg(vg) => Some(vg),
            _ => None,
        }
    }

    pub fn as_lv(&self) -> Option<&LvmLv> {
        match self {
            Self::LvmLv(lv) => Some(lv),
            _ => None,
        }
    }
}

/// Name of partition `number` on the device called `parent`.
///
/// Devices whose name ends in a digit get a `p` separator, e.g.
/// `/dev/nvme0n1p1` or `/dev/md0p1`.
pub fn partition_name(parent: &str, number: u32) -> String {
    if parent.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{parent}p{number}")
    } else {
        format!("{parent}{number}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_name() {
        assert_eq!(partition_name("/dev/sda", 1), "/dev/sda1");
        assert_eq!(partition_name("/dev/nvme0n1", 3), "/dev/nvme0n1p3");
        assert_eq!(partition_name("/dev/md0", 2), "/dev/md0p2");
    }

    #[test]
    fn test_raid_sizes() {
        let member = ByteCount::gib(10);
        assert_eq!(RaidLevel::Raid0.array_size(member, 3), ByteCount::gib(30));
        assert_eq!(RaidLevel::Raid1.array_size(member, 3), ByteCount::gib(10));
        assert_eq!(RaidLevel::Raid5.array_size(member, 3), ByteCount::gib(20));
        assert_eq!(RaidLevel::Raid6.array_size(member, 4), ByteCount::gib(20));
        assert_eq!(RaidLevel::Raid10.array_size(member, 4), ByteCount::gib(20));
        assert_eq!(RaidLevel::Raid6.min_members(), 4);
    }
}
