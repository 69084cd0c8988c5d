use serde::{Deserialize, Serialize};

use crate::error::ProposalError;

use super::{invalid_device, CommonAttrs};

/// An existing block device used as a whole, e.g. a Xen virtual partition
/// or a disk without partition table. Stray devices are always reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedStray {
    #[serde(flatten)]
    pub common: CommonAttrs,

    /// Name of the existing device.
    pub name: String,
}

impl PlannedStray {
    pub(crate) fn validate(&self, id: &str) -> Result<(), ProposalError> {
        if self.name.is_empty() {
            return Err(invalid_device(id, "a stray block device needs a name"));
        }
        Ok(())
    }
}
