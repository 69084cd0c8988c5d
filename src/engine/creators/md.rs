use std::collections::BTreeMap;

use log::{debug, info};

use storplan_api::{
    devicegraph::Devicegraph,
    error::{ProposalError, ProposalResultExt},
    planned::{PlannedDevice, PlannedMd},
    primitives::region::Alignment,
    Sid,
};

use super::{apply_common, create_nested_partitions, CreatorResult};

/// Creates software RAID arrays out of already created members.
pub struct MdCreator<'a> {
    devicegraph: &'a Devicegraph,
    alignment: Alignment,

    /// Whether nested partitions may fall back to flexible sizes.
    flexible: bool,
}

impl<'a> MdCreator<'a> {
    pub fn new(devicegraph: &'a Devicegraph, alignment: Alignment, flexible: bool) -> Self {
        Self {
            devicegraph,
            alignment,
            flexible,
        }
    }

    /// Creates the array described by `planned` on top of `members`.
    pub fn create_md(
        &self,
        planned: &PlannedMd,
        members: &[String],
    ) -> Result<CreatorResult, ProposalError> {
        let mut devicegraph = self.devicegraph.duplicate();
        let member_sids = members
            .iter()
            .map(|name| devicegraph.lookup(name))
            .collect::<Result<Vec<Sid>, _>>()?;
        let md = devicegraph
            .create_md(&planned.name, planned.level, planned.chunk_size, &member_sids)
            .message(format!("Failed to create RAID '{}'", planned.name))?;
        info!(
            "Created {} RAID '{}' out of {}",
            planned.level,
            planned.name,
            members.join(", ")
        );

        let devices_map = self.set_up(&mut devicegraph, md, planned)?;
        Ok(CreatorResult::new(devicegraph, devices_map))
    }

    /// Reuses an existing array.
    pub fn reuse_md(&self, planned: &PlannedMd) -> Result<CreatorResult, ProposalError> {
        let mut devicegraph = self.devicegraph.duplicate();
        let name = planned.common.reuse_name.as_deref().unwrap_or(&planned.name);
        let md = devicegraph.lookup(name)?;
        if planned.common.role.is_some() {
            devicegraph.remove_filesystem(md);
        }
        debug!("Reusing RAID '{name}'");
        let mut devices_map = self.set_up(&mut devicegraph, md, planned)?;
        if let Some(map_entry) = devices_map.remove(&planned.name) {
            devices_map.insert(name.to_owned(), map_entry);
        }
        Ok(CreatorResult::new(devicegraph, devices_map))
    }

    fn set_up(
        &self,
        devicegraph: &mut Devicegraph,
        md: Sid,
        planned: &PlannedMd,
    ) -> Result<BTreeMap<String, PlannedDevice>, ProposalError> {
        let mut devices_map = if planned.partitions.is_empty() {
            apply_common(devicegraph, md, &planned.common)?;
            BTreeMap::new()
        } else {
            create_nested_partitions(
                devicegraph,
                md,
                planned.partition_table,
                &planned.partitions,
                &self.alignment,
                self.flexible,
            )?
        };
        devices_map.insert(planned.name.clone(), PlannedDevice::Md(planned.clone()));
        Ok(devices_map)
    }
}
