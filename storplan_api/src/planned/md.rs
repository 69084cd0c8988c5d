use serde::{Deserialize, Serialize};

use sysdefs::partition_tables::PartitionTableType;

use crate::{
    devicegraph::device::RaidLevel, error::ProposalError, primitives::bytes::ByteCount,
};

use super::{invalid_device, CommonAttrs, PlannedPartition};

/// A software RAID to create or reuse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedMd {
    #[serde(flatten)]
    pub common: CommonAttrs,

    pub name: String,
    pub level: RaidLevel,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<ByteCount>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_table: Option<PartitionTableType>,

    /// Partitions to create on top of the RAID.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<PlannedPartition>,
}

impl PlannedMd {
    pub(crate) fn validate(&self, id: &str) -> Result<(), ProposalError> {
        validate_nested(id, &self.common, &self.partitions)
    }
}

/// Checks the partitions planned on top of a RAID or bcache.
pub(crate) fn validate_nested(
    id: &str,
    common: &CommonAttrs,
    partitions: &[PlannedPartition],
) -> Result<(), ProposalError> {
    if partitions.is_empty() {
        return Ok(());
    }
    if common.filesystem_type.is_some() || common.role.is_some() {
        return Err(invalid_device(
            id,
            "a device with partitions cannot be formatted or used as a member",
        ));
    }
    for part in partitions {
        part.common.validate(id)?;
        part.common.check_mount(id)?;
        part.validate(id)?;
        if part.disk.is_some() || part.percent_size.is_some() {
            return Err(invalid_device(
                id,
                "partitions on top of another device cannot name a disk",
            ));
        }
    }
    Ok(())
}
