//! Request and result files of the command line tool.

use std::{collections::BTreeMap, path::Path};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use storplan_api::{
    devicegraph::description::DevicegraphDescription,
    error::{InvalidInputError, ProposalError, ReportError},
    issues::IssuesList,
    planned::{DevicesCollection, PlannedDevice},
    settings::{EngineOptions, ProposalSettings, SettingsAdjustment},
    Devicegraph,
};

use crate::{engine::devices_creator::PopulateResult, Proposal};

/// Everything one run of the engine needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProposalRequest {
    /// The devices as they are now.
    #[serde(default)]
    pub devicegraph: DevicegraphDescription,

    #[serde(default)]
    pub planned_devices: Vec<PlannedDevice>,

    /// Settings of the guided proposal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<ProposalSettings>,

    /// Disks new partitions may go to when populating. Empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disk_names: Vec<String>,

    #[serde(default)]
    pub engine: EngineOptions,
}

impl ProposalRequest {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProposalError> {
        let path = path.as_ref();
        info!("Loading proposal request from '{}'", path.display());
        let contents =
            std::fs::read_to_string(path).structured(InvalidInputError::LoadRequest {
                path: path.display().to_string(),
            })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ProposalError> {
        serde_yaml::from_str(contents).structured(InvalidInputError::ParseRequest)
    }

    /// Builds and validates the devicegraph.
    pub fn devicegraph(&self) -> Result<Devicegraph, ProposalError> {
        let graph = self
            .devicegraph
            .build()
            .structured(InvalidInputError::InvalidDevicegraph)?;
        debug!("Loaded devicegraph with {} device(s)", graph.device_count());
        Ok(graph)
    }

    /// Validates the planned devices.
    pub fn catalog(&self) -> Result<DevicesCollection, ProposalError> {
        DevicesCollection::new(self.planned_devices.clone())
    }

    /// Guided proposal settings. Without explicit settings every disk of the
    /// devicegraph is a candidate.
    pub fn settings(&self, devicegraph: &Devicegraph) -> ProposalSettings {
        self.settings.clone().unwrap_or_else(|| ProposalSettings {
            candidate_devices: devicegraph
                .disks()
                .into_iter()
                .filter_map(|sid| devicegraph.name_of(sid).map(str::to_owned))
                .collect(),
            ..Default::default()
        })
    }
}

/// What a run produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalOutput {
    pub devicegraph: DevicegraphDescription,

    /// Id of the planned device behind every device.
    pub devices_map: BTreeMap<String, String>,
    pub created: Vec<String>,
    pub reused: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<ProposalSettings>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub adjustments: Vec<SettingsAdjustment>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<usize>,

    #[serde(skip_serializing_if = "IssuesList::is_empty")]
    pub issues: IssuesList,
}

fn planned_ids(devices_map: &BTreeMap<String, PlannedDevice>) -> BTreeMap<String, String> {
    devices_map
        .iter()
        .map(|(name, planned)| (name.clone(), planned.planned_id()))
        .collect()
}

impl From<&Proposal> for ProposalOutput {
    fn from(proposal: &Proposal) -> Self {
        Self {
            devicegraph: proposal.devicegraph.to_description(),
            devices_map: planned_ids(&proposal.devices_map),
            created: proposal.created.clone(),
            reused: proposal.reused.clone(),
            settings: Some(proposal.settings.clone()),
            adjustments: proposal.adjustments.clone(),
            attempts: Some(proposal.attempts),
            issues: IssuesList::new(),
        }
    }
}

impl From<&PopulateResult> for ProposalOutput {
    fn from(result: &PopulateResult) -> Self {
        Self {
            devicegraph: result.devicegraph.to_description(),
            devices_map: planned_ids(&result.devices_map),
            created: result.created.clone(),
            reused: result.reused.clone(),
            settings: None,
            adjustments: Vec::new(),
            attempts: None,
            issues: result.issues.clone(),
        }
    }
}
