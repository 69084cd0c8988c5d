use std::collections::BTreeMap;

use log::{debug, info};

use storplan_api::{
    devicegraph::Devicegraph,
    error::{ProposalError, ProposalResultExt},
    planned::{PlannedBcache, PlannedDevice},
    primitives::region::Alignment,
    Sid,
};

use super::{apply_common, create_nested_partitions, CreatorResult};

/// Creates bcache devices on top of a backing and an optional caching
/// device.
pub struct BcacheCreator<'a> {
    devicegraph: &'a Devicegraph,
    alignment: Alignment,
    flexible: bool,
}

impl<'a> BcacheCreator<'a> {
    pub fn new(devicegraph: &'a Devicegraph, alignment: Alignment, flexible: bool) -> Self {
        Self {
            devicegraph,
            alignment,
            flexible,
        }
    }

    pub fn create_bcache(
        &self,
        planned: &PlannedBcache,
        backing: &str,
        caching: Option<&str>,
    ) -> Result<CreatorResult, ProposalError> {
        let mut devicegraph = self.devicegraph.duplicate();
        let backing_sid = devicegraph.lookup(backing)?;
        let caching_sid = caching.map(|name| devicegraph.lookup(name)).transpose()?;
        let bcache = devicegraph
            .create_bcache(&planned.name, planned.cache_mode, backing_sid, caching_sid)
            .message(format!("Failed to create bcache '{}'", planned.name))?;
        info!(
            "Created bcache '{}' backed by '{backing}'{}",
            planned.name,
            caching
                .map(|c| format!(" and cached by '{c}'"))
                .unwrap_or_default()
        );

        let devices_map = self.set_up(&mut devicegraph, bcache, planned)?;
        Ok(CreatorResult::new(devicegraph, devices_map))
    }

    pub fn reuse_bcache(&self, planned: &PlannedBcache) -> Result<CreatorResult, ProposalError> {
        let mut devicegraph = self.devicegraph.duplicate();
        let name = planned
            .common
            .reuse_name
            .as_deref()
            .unwrap_or(&planned.name);
        let bcache = devicegraph.lookup(name)?;
        if planned.common.role.is_some() {
            devicegraph.remove_filesystem(bcache);
        }
        debug!("Reusing bcache '{name}'");
        let mut devices_map = self.set_up(&mut devicegraph, bcache, planned)?;
        if let Some(map_entry) = devices_map.remove(&planned.name) {
            devices_map.insert(name.to_owned(), map_entry);
        }
        Ok(CreatorResult::new(devicegraph, devices_map))
    }

    fn set_up(
        &self,
        devicegraph: &mut Devicegraph,
        bcache: Sid,
        planned: &PlannedBcache,
    ) -> Result<BTreeMap<String, PlannedDevice>, ProposalError> {
        let mut devices_map = if planned.partitions.is_empty() {
            apply_common(devicegraph, bcache, &planned.common)?;
            BTreeMap::new()
        } else {
            create_nested_partitions(
                devicegraph,
                bcache,
                planned.partition_table,
                &planned.partitions,
                &self.alignment,
                self.flexible,
            )?
        };
        devices_map.insert(
            planned.name.clone(),
            PlannedDevice::Bcache(planned.clone()),
        );
        Ok(devices_map)
    }
}
