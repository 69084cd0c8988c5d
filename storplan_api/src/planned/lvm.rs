use serde::{Deserialize, Serialize};

use crate::{
    constants::DEFAULT_EXTENT_SIZE, error::ProposalError, primitives::bytes::ByteCount,
};

use super::{invalid_device, CommonAttrs};

/// An LVM volume group to create or reuse.
///
/// `reuse_name` holds the name of an existing volume group. Its physical
/// volumes are the planned devices with a `PhysicalVolume` role naming it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedVg {
    #[serde(flatten)]
    pub common: CommonAttrs,

    /// Volume group name, without `/dev/`.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extent_size: Option<ByteCount>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lvs: Vec<PlannedLv>,
}

impl PlannedVg {
    pub fn extent_size(&self) -> ByteCount {
        self.extent_size
            .unwrap_or(ByteCount(DEFAULT_EXTENT_SIZE))
    }

    pub(crate) fn validate(&self, id: &str) -> Result<(), ProposalError> {
        if self.extent_size().is_zero() || !self.extent_size().bytes().is_power_of_two() {
            return Err(invalid_device(id, "extent size must be a power of two"));
        }
        if self.common.filesystem_type.is_some() || self.common.mount_point.is_some() {
            return Err(invalid_device(id, "a volume group cannot be formatted"));
        }
        for lv in &self.lvs {
            let lv_id = format!("{}/{}", self.name, lv.name);
            lv.common.validate(&lv_id)?;
            lv.common.check_mount(&lv_id)?;
            lv.validate(&lv_id)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedLv {
    #[serde(flatten)]
    pub common: CommonAttrs,

    /// Logical volume name inside its volume group.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stripes: Option<u32>,
}

impl PlannedLv {
    pub(crate) fn validate(&self, id: &str) -> Result<(), ProposalError> {
        if self.name.is_empty() || self.name.contains('/') {
            return Err(invalid_device(id, "invalid logical volume name"));
        }
        if self.stripes == Some(0) {
            return Err(invalid_device(id, "stripes must be at least one"));
        }
        Ok(())
    }
}
