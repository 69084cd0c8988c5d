use std::collections::BTreeMap;

use log::debug;

use storplan_api::{
    devicegraph::Devicegraph,
    error::ProposalError,
    planned::{PlannedDevice, PlannedStray},
};

use super::{apply_common, CreatorResult};

/// Reuses block devices that live outside any partitionable disk.
pub struct StrayCreator<'a> {
    devicegraph: &'a Devicegraph,
}

impl<'a> StrayCreator<'a> {
    pub fn new(devicegraph: &'a Devicegraph) -> Self {
        Self { devicegraph }
    }

    pub fn reuse_stray(&self, planned: &PlannedStray) -> Result<CreatorResult, ProposalError> {
        let mut devicegraph = self.devicegraph.duplicate();
        let name = planned
            .common
            .reuse_name
            .as_deref()
            .unwrap_or(&planned.name);
        let sid = devicegraph.lookup(name)?;
        if planned.common.role.is_some() {
            devicegraph.remove_filesystem(sid);
        }
        apply_common(&mut devicegraph, sid, &planned.common)?;
        debug!("Reusing stray block device '{name}'");
        Ok(CreatorResult::new(
            devicegraph,
            BTreeMap::from([(name.to_owned(), PlannedDevice::StrayBlkDevice(planned.clone()))]),
        ))
    }
}
