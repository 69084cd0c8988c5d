use serde::{Deserialize, Serialize};

use crate::error::ProposalError;

use super::{invalid_device, CommonAttrs};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedNfs {
    #[serde(flatten)]
    pub common: CommonAttrs,

    pub server: String,
    pub path: String,
}

impl PlannedNfs {
    pub(crate) fn validate(&self, id: &str) -> Result<(), ProposalError> {
        if self.server.is_empty() || !self.path.starts_with('/') {
            return Err(invalid_device(id, "NFS needs a server and an absolute path"));
        }
        if self.common.mount_point.is_none() {
            return Err(invalid_device(id, "NFS needs a mount point"));
        }
        Ok(())
    }
}
