use std::collections::BTreeMap;

use log::{debug, info};

use storplan_api::{
    devicegraph::Devicegraph,
    error::{InfeasibleError, NoSpaceError, ProposalError, ProposalResultExt},
    planned::{PlannedDevice, PlannedPartition},
    primitives::region::{Alignment, Region},
    Sid,
};
use sysdefs::{partition_ids::PartitionId, partition_tables::PartitionKind};

use crate::engine::distribution::PartitionsDistribution;

use super::{apply_common, CreatorResult};

/// Creates the partitions of a distribution and reuses existing ones.
pub struct PartitionCreator<'a> {
    devicegraph: &'a Devicegraph,
    alignment: Alignment,
}

impl<'a> PartitionCreator<'a> {
    pub fn new(devicegraph: &'a Devicegraph, alignment: Alignment) -> Self {
        Self {
            devicegraph,
            alignment,
        }
    }

    /// Creates every partition of `distribution` on a copy of the
    /// devicegraph.
    pub fn create_partitions(
        &self,
        distribution: &PartitionsDistribution,
    ) -> Result<CreatorResult, ProposalError> {
        let mut devicegraph = self.devicegraph.duplicate();
        let placed = place_partitions(&mut devicegraph, distribution, &self.alignment)?;
        info!("Created {} partition(s)", placed.len());
        let devices_map = placed
            .into_iter()
            .map(|(name, planned)| (name, PlannedDevice::Partition(planned)))
            .collect();
        Ok(CreatorResult::new(devicegraph, devices_map))
    }

    /// Reuses the partition named by `planned`, resizing it when asked to.
    pub fn reuse_partition(
        &self,
        planned: &PlannedPartition,
    ) -> Result<CreatorResult, ProposalError> {
        let mut devicegraph = self.devicegraph.duplicate();
        let name = reuse_in_place(&mut devicegraph, planned, &self.alignment)?;
        Ok(CreatorResult::new(
            devicegraph,
            BTreeMap::from([(name, PlannedDevice::Partition(planned.clone()))]),
        ))
    }
}

/// Creates the partitions of `distribution` in `devicegraph`, returning the
/// name each planned partition got.
///
/// Fails with `OutdatedDistribution` when a space of the distribution is no
/// longer free.
pub(crate) fn place_partitions(
    devicegraph: &mut Devicegraph,
    distribution: &PartitionsDistribution,
    alignment: &Alignment,
) -> Result<Vec<(String, PlannedPartition)>, ProposalError> {
    let mut placed = Vec::new();
    for assigned in &distribution.spaces {
        let space = &assigned.space;
        let still_free = devicegraph
            .free_spaces(space.disk, alignment)
            .iter()
            .any(|free| free.region.contains(&space.region));
        if !still_free {
            return Err(ProposalError::new(NoSpaceError::OutdatedDistribution {
                disk: space.disk_name.clone(),
            }));
        }

        if space.needs_table && devicegraph.partition_table(space.disk).is_none() {
            devicegraph.create_partition_table(space.disk, space.table)?;
        }
        if assigned.kind == PartitionKind::Extended {
            devicegraph
                .create_partition(
                    space.disk,
                    space.region,
                    PartitionKind::Extended,
                    PartitionId::Extended,
                )
                .message(format!(
                    "Failed to create extended partition on '{}'",
                    space.disk_name
                ))?;
        }

        let kind = if assigned.holds_logicals() {
            PartitionKind::Logical
        } else {
            PartitionKind::Primary
        };
        let mut offset = space.start_offset();
        for part in &assigned.partitions {
            if kind == PartitionKind::Logical {
                // Room for the extended boot record
                offset = offset + alignment.grain;
            }
            let id = part.planned.common.id.clone().unwrap_or_default();
            let region = Region::from_bytes(offset, part.size, space.region.block_size)
                .ok_or_else(|| ProposalError::internal("partition smaller than one block"))?;
            let sid = devicegraph
                .create_partition(space.disk, region, kind, part.planned.effective_partition_id())
                .message(format!("Failed to create partition '{id}'"))?;
            if part.planned.bootable {
                devicegraph.set_bootable(sid, true)?;
            }
            apply_common(devicegraph, sid, &part.planned.common)
                .message(format!("Failed to set up partition '{id}'"))?;

            let name = partition_name(devicegraph, sid)?;
            debug!("Planned partition '{id}' is '{name}' ({})", part.size);
            offset = offset + part.size;
            placed.push((name, part.planned.clone()));
        }
    }
    Ok(placed)
}

/// Reuses an existing partition in `devicegraph` and returns its name.
pub(crate) fn reuse_in_place(
    devicegraph: &mut Devicegraph,
    planned: &PlannedPartition,
    alignment: &Alignment,
) -> Result<String, ProposalError> {
    let reuse_name = planned.common.reuse_name.as_deref().unwrap_or_default();
    let sid = devicegraph.lookup(reuse_name)?;
    if devicegraph.existing(sid)?.as_partition().is_none() {
        return Err(ProposalError::new(InfeasibleError::UnsupportedDevice {
            name: reuse_name.to_owned(),
            reason: "not a partition".into(),
        }));
    }

    if planned.resize {
        resize(devicegraph, sid, planned, alignment)
            .message(format!("Failed to resize '{reuse_name}'"))?;
    }
    if planned.partition_id.is_some() || planned.common.role.is_some() {
        devicegraph.set_partition_id(sid, planned.effective_partition_id())?;
    }
    if planned.bootable {
        devicegraph.set_bootable(sid, true)?;
    }
    if planned.common.role.is_some() {
        devicegraph.remove_filesystem(sid);
    }
    apply_common(devicegraph, sid, &planned.common)?;
    debug!("Reusing partition '{reuse_name}'");
    Ok(reuse_name.to_owned())
}

fn resize(
    devicegraph: &mut Devicegraph,
    sid: Sid,
    planned: &PlannedPartition,
    alignment: &Alignment,
) -> Result<(), ProposalError> {
    let name = devicegraph.name_of(sid).unwrap_or_default().to_owned();
    let current = devicegraph.size_of(sid);
    let target = planned.common.max_size.round_down(alignment.grain);
    if target == current {
        return Ok(());
    }

    let keeps_data = !planned.common.reformat && planned.common.role.is_none();
    let fs_type = devicegraph.filesystem(sid).map(|fs| fs.fs_type);
    if let (true, Some(fs_type)) = (keeps_data, fs_type) {
        let refused = if target < current {
            !fs_type.supports_shrink() || target.bytes() < fs_type.min_size()
        } else {
            !fs_type.supports_grow()
        };
        if refused {
            return Err(ProposalError::new(InfeasibleError::CannotShrink { name }));
        }
    }
    debug!("Resizing '{name}' from {current} to {target}");
    devicegraph.resize_partition(sid, target, alignment)
}

fn partition_name(devicegraph: &Devicegraph, sid: Sid) -> Result<String, ProposalError> {
    devicegraph
        .name_of(sid)
        .map(str::to_owned)
        .ok_or_else(|| ProposalError::internal("partition without a name"))
}
