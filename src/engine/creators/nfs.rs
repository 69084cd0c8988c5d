use std::collections::BTreeMap;

use log::info;

use storplan_api::{
    devicegraph::Devicegraph,
    error::ProposalError,
    planned::{PlannedDevice, PlannedNfs},
};

use super::CreatorResult;

/// Adds NFS mounts. They need no space, only a mount point.
pub struct NfsCreator<'a> {
    devicegraph: &'a Devicegraph,
}

impl<'a> NfsCreator<'a> {
    pub fn new(devicegraph: &'a Devicegraph) -> Self {
        Self { devicegraph }
    }

    pub fn create_nfs(&self, planned: &PlannedNfs) -> Result<CreatorResult, ProposalError> {
        let mut devicegraph = self.devicegraph.duplicate();
        let fs = devicegraph.create_nfs(&planned.server, &planned.path);
        devicegraph.set_mount_point(fs, planned.common.mount())?;
        let name = format!("{}:{}", planned.server, planned.path);
        info!(
            "Mounting '{name}' at '{}'",
            planned.common.mount_point.as_deref().unwrap_or_default()
        );
        Ok(CreatorResult::new(
            devicegraph,
            BTreeMap::from([(name, PlannedDevice::Nfs(planned.clone()))]),
        ))
    }
}
