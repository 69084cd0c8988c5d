//! Settings of the guided proposal and of the engine itself.

use serde::{Deserialize, Serialize};

use crate::{
    error::{InvalidInputError, ProposalError},
    primitives::{bytes::ByteCount, region::Alignment},
};

/// How the proposal decides where non-root volumes go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AllocateMode {
    /// Every volume may end up on any candidate disk.
    #[default]
    Auto,

    /// Every proposed volume is placed on an explicitly chosen disk.
    Device,
}

/// A volume the proposal knows about, linked to the planned device mounted
/// at the same path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VolumeSpec {
    pub mount_point: String,

    #[serde(default = "default_true")]
    pub proposed: bool,

    /// Whether the proposal may stop proposing the volume.
    #[serde(default)]
    pub proposed_configurable: bool,

    /// Volumes are relaxed in ascending order of this value. Volumes without
    /// it are never relaxed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_order: Option<u32>,

    /// Disk the volume must be placed on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,

    #[serde(default)]
    pub snapshots: bool,

    #[serde(default)]
    pub snapshots_configurable: bool,

    /// Extra space reserved for snapshots.
    #[serde(default)]
    pub snapshots_size: ByteCount,
}

fn default_true() -> bool {
    true
}

impl VolumeSpec {
    pub fn is_root(&self) -> bool {
        self.mount_point == crate::constants::ROOT_MOUNT_POINT_PATH
    }
}

/// Settings the guided proposal works with. Mutated only between attempts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProposalSettings {
    /// Disks new devices may be placed on, in preference order.
    #[serde(default)]
    pub candidate_devices: Vec<String>,

    #[serde(default)]
    pub allocate_mode: AllocateMode,

    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,

    /// Disk holding the root filesystem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_device: Option<String>,
}

impl ProposalSettings {
    pub fn volume(&self, mount_point: &str) -> Option<&VolumeSpec> {
        self.volumes.iter().find(|v| v.mount_point == mount_point)
    }

    pub fn volume_mut(&mut self, mount_point: &str) -> Option<&mut VolumeSpec> {
        self.volumes.iter_mut().find(|v| v.mount_point == mount_point)
    }

    /// Proposed volumes other than root. Their `device` is set by the
    /// explicit placement permutations.
    pub fn non_root_proposed(&self) -> impl Iterator<Item = &VolumeSpec> {
        self.volumes.iter().filter(|v| v.proposed && !v.is_root())
    }

    pub fn validate(&self) -> Result<(), ProposalError> {
        let invalid = |reason: String| {
            Err(ProposalError::new(InvalidInputError::InvalidSettings {
                reason,
            }))
        };
        for (index, volume) in self.volumes.iter().enumerate() {
            if self.volumes[..index]
                .iter()
                .any(|v| v.mount_point == volume.mount_point)
            {
                return invalid(format!("volume '{}' listed twice", volume.mount_point));
            }
            if let Some(device) = &volume.device {
                if !self.candidate_devices.contains(device) {
                    return invalid(format!(
                        "volume '{}' is placed on '{}', which is not a candidate device",
                        volume.mount_point, device
                    ));
                }
            }
        }
        if let Some(root) = &self.root_device {
            if !self.candidate_devices.contains(root) {
                return invalid(format!("root device '{root}' is not a candidate device"));
            }
        }
        Ok(())
    }
}

/// A relaxation applied automatically by the proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "adjustment", content = "mountPoint")]
pub enum SettingsAdjustment {
    DisableSnapshots(String),
    DisableVolume(String),
}

/// Engine options that are not part of the proposal itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EngineOptions {
    #[serde(default)]
    pub alignment: Alignment,

    /// Stops the guided search before the next attempt once elapsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_timeout_secs: Option<u64>,
}
