use serde::{Deserialize, Serialize};

use sysdefs::partition_tables::PartitionTableType;

use crate::{devicegraph::device::CacheMode, error::ProposalError};

use super::{md::validate_nested, CommonAttrs, PlannedPartition};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedBcache {
    #[serde(flatten)]
    pub common: CommonAttrs,

    pub name: String,

    #[serde(default)]
    pub cache_mode: CacheMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_table: Option<PartitionTableType>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<PlannedPartition>,
}

impl PlannedBcache {
    pub(crate) fn validate(&self, id: &str) -> Result<(), ProposalError> {
        validate_nested(id, &self.common, &self.partitions)
    }
}
