//! Device creators.
//!
//! Every creator is built on a devicegraph it never touches: each operation
//! works on a copy and returns it inside a `CreatorResult`, together with
//! the planned device every new or reused device comes from.

use std::collections::BTreeMap;

use log::debug;

use storplan_api::{
    devicegraph::Devicegraph,
    error::{InfeasibleError, NoSpaceError, ProposalError, ProposalResultExt},
    planned::{CommonAttrs, PlannedDevice, PlannedPartition},
    primitives::region::Alignment,
    Sid,
};
use sysdefs::partition_tables::PartitionTableType;

use super::distribution::DistributionCalculator;

pub mod bcache;
pub mod lvm;
pub mod md;
pub mod nfs;
pub mod partition;
pub mod stray;

pub use bcache::BcacheCreator;
pub use lvm::LvmCreator;
pub use md::MdCreator;
pub use nfs::NfsCreator;
pub use partition::PartitionCreator;
pub use stray::StrayCreator;

/// Outcome of a creation step.
#[derive(Debug, Clone)]
pub struct CreatorResult {
    pub devicegraph: Devicegraph,

    /// Planned device behind every device of the step, by device name.
    pub devices_map: BTreeMap<String, PlannedDevice>,
}

impl CreatorResult {
    pub fn new(devicegraph: Devicegraph, devices_map: BTreeMap<String, PlannedDevice>) -> Self {
        Self {
            devicegraph,
            devices_map,
        }
    }

    /// A result that did not create anything.
    pub fn unchanged(devicegraph: Devicegraph) -> Self {
        Self::new(devicegraph, BTreeMap::new())
    }

    /// Names of the devices whose planned device matches `predicate`.
    pub fn created_names(&self, predicate: impl Fn(&PlannedDevice) -> bool) -> Vec<String> {
        self.devices_map
            .iter()
            .filter(|(_, planned)| predicate(planned))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Combines two consecutive steps: the devicegraph of `other`, which was
    /// built on top of this one, and both maps.
    pub fn merge(&self, other: &CreatorResult) -> CreatorResult {
        let mut devices_map = self.devices_map.clone();
        devices_map.extend(
            other
                .devices_map
                .iter()
                .map(|(name, planned)| (name.clone(), planned.clone())),
        );
        CreatorResult::new(other.devicegraph.duplicate(), devices_map)
    }
}

/// Puts the filesystem and mount point of `common` on `sid`.
///
/// New devices are always formatted. Reused ones keep their filesystem
/// unless `reformat` is set or they have none.
pub(crate) fn apply_common(
    devicegraph: &mut Devicegraph,
    sid: Sid,
    common: &CommonAttrs,
) -> Result<(), ProposalError> {
    let existing = devicegraph.filesystem_of(sid);
    let filesystem = match common.filesystem_type {
        Some(fs_type) if !common.is_reuse() || common.reformat || existing.is_none() => {
            Some(devicegraph.format(sid, fs_type, common.label.clone())?)
        }
        _ => existing,
    };

    if let Some(mount_point) = common.mount() {
        let Some(filesystem) = filesystem else {
            return Err(ProposalError::new(InfeasibleError::UnsupportedDevice {
                name: devicegraph.name_of(sid).unwrap_or_default().to_owned(),
                reason: format!("no filesystem to mount at '{}'", mount_point.path),
            }));
        };
        devicegraph.set_mount_point(filesystem, Some(mount_point))?;
    }
    Ok(())
}

/// Creates (or reuses) the partitions planned on top of a RAID or bcache.
///
/// With `flexible`, partitions that do not fit get a second chance with
/// their size floor dropped.
pub(crate) fn create_nested_partitions(
    devicegraph: &mut Devicegraph,
    parent: Sid,
    table: Option<PartitionTableType>,
    planned: &[PlannedPartition],
    alignment: &Alignment,
    flexible: bool,
) -> Result<BTreeMap<String, PlannedDevice>, ProposalError> {
    let mut devices_map = BTreeMap::new();
    let parent_name = devicegraph.name_of(parent).unwrap_or_default().to_owned();

    let (reused, new): (Vec<_>, Vec<_>) = planned.iter().partition(|p| p.common.is_reuse());
    for part in reused {
        let name = partition::reuse_in_place(devicegraph, part, alignment)?;
        devices_map.insert(name, PlannedDevice::Partition(part.clone()));
    }
    if new.is_empty() {
        return Ok(devices_map);
    }

    if devicegraph.partition_table(parent).is_none() {
        let table = match table {
            Some(table) => table,
            None => devicegraph.existing(parent)?.preferred_table(),
        };
        devicegraph.create_partition_table(parent, table)?;
    }

    let to_create: Vec<PlannedPartition> = new.into_iter().cloned().collect();
    let spaces = devicegraph.free_spaces(parent, alignment);
    let mut distribution =
        DistributionCalculator::new(&to_create, &spaces, *alignment).distribution();
    if distribution.is_err() && flexible {
        debug!("Retrying partitions of '{parent_name}' with flexible sizes");
        let relaxed: Vec<PlannedPartition> = to_create
            .iter()
            .map(|p| PlannedPartition {
                common: p.common.flexible(),
                ..p.clone()
            })
            .collect();
        distribution = DistributionCalculator::new(&relaxed, &spaces, *alignment).distribution();
    }
    let distribution = distribution.map_err(|e| {
        if e.is_no_space() {
            ProposalError::new(NoSpaceError::NoDistributionInside {
                device: parent_name.clone(),
            })
        } else {
            e
        }
    })?;

    for (name, part) in partition::place_partitions(devicegraph, &distribution, alignment)
        .message(format!("Failed to create partitions on '{parent_name}'"))?
    {
        devices_map.insert(name, PlannedDevice::Partition(part));
    }
    Ok(devices_map)
}

#[cfg(test)]
mod tests {
    use maplit::btreemap;

    use storplan_api::{planned::MemberRole, ByteCount};
    use sysdefs::filesystems::FilesystemType;

    use super::*;
    use crate::engine::test_utils::{graph_with_disks, planned_partition};

    #[test]
    fn test_created_names_and_merge() {
        let graph = graph_with_disks(&[("/dev/sda", ByteCount::gib(10))]);
        let mut member = planned_partition("", 1, 1, 0);
        member.common.mount_point = None;
        member.common.filesystem_type = None;
        member.common.role = Some(MemberRole::Raid("/dev/md0".into()));

        let first = CreatorResult::new(
            graph.duplicate(),
            btreemap! {
                "/dev/sda1".to_owned() => PlannedDevice::Partition(member.clone()),
                "/dev/sda2".to_owned() => PlannedDevice::Partition(planned_partition("/", 1, 1, 0)),
            },
        );
        let second = CreatorResult::new(
            graph.duplicate(),
            btreemap! {
                "/dev/sda3".to_owned() => PlannedDevice::Partition(member.clone()),
            },
        );
        let merged = first.merge(&second);
        assert_eq!(merged.devices_map.len(), 3);
        assert_eq!(
            merged.created_names(|d| d.role() == Some(&MemberRole::Raid("/dev/md0".into()))),
            vec!["/dev/sda1", "/dev/sda3"]
        );
        // The inputs are left alone
        assert_eq!(first.devices_map.len(), 2);
    }

    #[test]
    fn test_apply_common() {
        let mut graph = graph_with_disks(&[("/dev/sda", ByteCount::gib(10))]);
        let sda = graph.disks()[0];
        let common = CommonAttrs {
            filesystem_type: Some(FilesystemType::Xfs),
            mount_point: Some("/data".into()),
            label: Some("data".into()),
            ..Default::default()
        };
        apply_common(&mut graph, sda, &common).unwrap();
        let fs = graph.filesystem(sda).unwrap();
        assert_eq!(fs.fs_type, FilesystemType::Xfs);
        assert_eq!(fs.mount_path(), Some("/data"));

        // Reusing keeps the filesystem unless asked to reformat
        let reuse = CommonAttrs {
            filesystem_type: Some(FilesystemType::Ext4),
            reuse_name: Some("/dev/sda".into()),
            mount_point: Some("/srv".into()),
            ..Default::default()
        };
        apply_common(&mut graph, sda, &reuse).unwrap();
        let fs = graph.filesystem(sda).unwrap();
        assert_eq!(fs.fs_type, FilesystemType::Xfs);
        assert_eq!(fs.mount_path(), Some("/srv"));

        let reformat = CommonAttrs {
            reformat: true,
            ..reuse
        };
        apply_common(&mut graph, sda, &reformat).unwrap();
        assert_eq!(
            graph.filesystem(sda).unwrap().fs_type,
            FilesystemType::Ext4
        );
    }
}
