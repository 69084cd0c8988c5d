//! Planned devices: constraint-only descriptions of devices to create or
//! reuse, not yet bound to a disk.

use serde::{Deserialize, Serialize};

use sysdefs::filesystems::FilesystemType;

use crate::{
    constants::FLEXIBLE_MIN_SIZE,
    devicegraph::device::MountPoint,
    error::{InvalidInputError, ProposalError},
    primitives::bytes::ByteCount,
};

pub mod bcache;
pub mod collection;
pub mod lvm;
pub mod md;
pub mod nfs;
pub mod partition;
pub mod stray;

pub use bcache::PlannedBcache;
pub use collection::DevicesCollection;
pub use lvm::{PlannedLv, PlannedVg};
pub use md::PlannedMd;
pub use nfs::PlannedNfs;
pub use partition::PlannedPartition;
pub use stray::PlannedStray;

/// What a planned device is used for when it is a member of another one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MemberRole {
    /// Member of the RAID with this name.
    Raid(String),

    /// Physical volume of the volume group with this name.
    PhysicalVolume(String),

    /// Backing device of the bcache with this name.
    BcacheBacking(String),

    /// Caching device of the bcache with this name.
    BcacheCaching(String),
}

fn unlimited() -> ByteCount {
    ByteCount::UNLIMITED
}

fn is_unlimited(size: &ByteCount) -> bool {
    size.is_unlimited()
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// Attributes shared by every kind of planned device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonAttrs {
    /// Identifier of the planned device in the resulting devices map. Filled
    /// in by `DevicesCollection` when missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub min_size: ByteCount,

    #[serde(default = "unlimited", skip_serializing_if = "is_unlimited")]
    pub max_size: ByteCount,

    /// Size to aim for. Defaults to `min_size`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_size: Option<ByteCount>,

    /// Share of the extra space the device gets.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub weight: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mount_options: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem_type: Option<FilesystemType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Name of an existing device to reuse instead of creating a new one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reuse_name: Option<String>,

    /// Whether a reused device gets a new filesystem.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reformat: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<MemberRole>,
}

impl Default for CommonAttrs {
    fn default() -> Self {
        Self {
            id: None,
            min_size: ByteCount::ZERO,
            max_size: ByteCount::UNLIMITED,
            desired_size: None,
            weight: 0,
            mount_point: None,
            mount_options: Vec::new(),
            filesystem_type: None,
            label: None,
            reuse_name: None,
            reformat: false,
            role: None,
        }
    }
}

impl CommonAttrs {
    pub fn desired(&self) -> ByteCount {
        self.desired_size.unwrap_or(self.min_size)
    }

    pub fn is_reuse(&self) -> bool {
        self.reuse_name.is_some()
    }

    pub fn mount(&self) -> Option<MountPoint> {
        self.mount_point.as_ref().map(|path| MountPoint {
            path: path.clone(),
            options: self.mount_options.clone(),
        })
    }

    /// Whether the device will hold the filesystem mounted at `path`.
    pub fn is_mounted_at(&self, path: &str) -> bool {
        self.mount_point.as_deref() == Some(path)
    }

    /// Copy with the size floor dropped: the original minimum becomes the
    /// weight, so extra space is shared in proportion to it.
    pub fn flexible(&self) -> Self {
        Self {
            min_size: ByteCount(FLEXIBLE_MIN_SIZE),
            desired_size: Some(ByteCount(FLEXIBLE_MIN_SIZE)),
            weight: if self.min_size.is_zero() {
                self.weight
            } else {
                self.min_size.bytes()
            },
            ..self.clone()
        }
    }

    /// Checks `min <= desired <= max` and that members are not formatted.
    #[track_caller]
    pub fn validate(&self, device: &str) -> Result<(), ProposalError> {
        let invalid = |reason: String| {
            ProposalError::new(InvalidInputError::InvalidPlannedDevice {
                device: device.to_owned(),
                reason,
            })
        };
        if self.min_size > self.max_size {
            return Err(invalid(format!(
                "minimum size {} is bigger than maximum size {}",
                self.min_size, self.max_size
            )));
        }
        if let Some(desired) = self.desired_size {
            if desired < self.min_size || desired > self.max_size {
                return Err(invalid(format!(
                    "desired size {} is not between {} and {}",
                    desired, self.min_size, self.max_size
                )));
            }
        }
        if self.role.is_some() && (self.filesystem_type.is_some() || self.mount_point.is_some())
        {
            return Err(invalid(
                "a member of another device cannot be formatted or mounted".into(),
            ));
        }
        if self.reformat && !self.is_reuse() {
            return Err(invalid("only reused devices can be reformatted".into()));
        }
        Ok(())
    }

    /// New block devices can only be mounted when they get a filesystem.
    #[track_caller]
    pub(crate) fn check_mount(&self, device: &str) -> Result<(), ProposalError> {
        if self.mount_point.is_some() && self.filesystem_type.is_none() && !self.is_reuse() {
            return Err(invalid_device(device, "a mount point needs a filesystem type"));
        }
        Ok(())
    }
}

/// A device to create or reuse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PlannedDevice {
    Partition(PlannedPartition),
    Md(PlannedMd),
    LvmVg(PlannedVg),
    LvmLv(PlannedLv),
    Bcache(PlannedBcache),
    StrayBlkDevice(PlannedStray),
    Nfs(PlannedNfs),
}

impl PlannedDevice {
    pub fn common(&self) -> &CommonAttrs {
        match self {
            Self::Partition(d) => &d.common,
            Self::Md(d) => &d.common,
            Self::LvmVg(d) => &d.common,
            Self::LvmLv(d) => &d.common,
            Self::Bcache(d) => &d.common,
            Self::StrayBlkDevice(d) => &d.common,
            Self::Nfs(d) => &d.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut CommonAttrs {
        match self {
            Self::Partition(d) => &mut d.common,
            Self::Md(d) => &mut d.common,
            Self::LvmVg(d) => &mut d.common,
            Self::LvmLv(d) => &mut d.common,
            Self::Bcache(d) => &mut d.common,
            Self::StrayBlkDevice(d) => &mut d.common,
            Self::Nfs(d) => &mut d.common,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Partition(_) => "partition",
            Self::Md(_) => "md",
            Self::LvmVg(_) => "lvm-vg",
            Self::LvmLv(_) => "lvm-lv",
            Self::Bcache(_) => "bcache",
            Self::StrayBlkDevice(_) => "stray-blk-device",
            Self::Nfs(_) => "nfs",
        }
    }

    pub fn role(&self) -> Option<&MemberRole> {
        self.common().role.as_ref()
    }

    /// Identifier used in the devices map.
    pub fn planned_id(&self) -> String {
        self.common()
            .id
            .clone()
            .unwrap_or_else(|| self.default_id())
    }

    pub(crate) fn default_id(&self) -> String {
        let common = self.common();
        match self {
            Self::Md(md) => md.name.clone(),
            Self::LvmVg(vg) => vg.name.clone(),
            Self::LvmLv(lv) => lv.name.clone(),
            Self::Bcache(bcache) => bcache.name.clone(),
            Self::StrayBlkDevice(stray) => stray.name.clone(),
            Self::Nfs(nfs) => format!("{}:{}", nfs.server, nfs.path),
            Self::Partition(_) => common
                .mount_point
                .clone()
                .or_else(|| common.reuse_name.clone())
                .unwrap_or_else(|| "partition".into()),
        }
    }

    /// Copy of the device with the flexible size limits.
    pub fn flexible(&self) -> Self {
        let mut device = self.clone();
        let common = device.common_mut();
        *common = common.flexible();
        device
    }

    pub fn validate(&self) -> Result<(), ProposalError> {
        let id = self.planned_id();
        self.common().validate(&id)?;
        if !matches!(self, Self::Nfs(_)) {
            self.common().check_mount(&id)?;
        }
        match self {
            Self::Partition(part) => part.validate(&id),
            Self::Md(md) => md.validate(&id),
            Self::LvmVg(vg) => vg.validate(&id),
            Self::LvmLv(lv) => lv.validate(&id),
            Self::Bcache(bcache) => bcache.validate(&id),
            Self::StrayBlkDevice(stray) => stray.validate(&id),
            Self::Nfs(nfs) => nfs.validate(&id),
        }
    }
}

#[track_caller]
pub(crate) fn invalid_device(device: &str, reason: impl Into<String>) -> ProposalError {
    ProposalError::new(InvalidInputError::InvalidPlannedDevice {
        device: device.to_owned(),
        reason: reason.into(),
    })
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn test_common_defaults() {
        let common: CommonAttrs = serde_yaml::from_str("minSize: 1G").unwrap();
        assert_eq!(common.max_size, ByteCount::UNLIMITED);
        assert_eq!(common.desired(), ByteCount::gib(1));
        assert!(!common.is_reuse());
    }

    #[test]
    fn test_flexible() {
        let common = CommonAttrs {
            min_size: ByteCount::gib(4),
            desired_size: Some(ByteCount::gib(6)),
            max_size: ByteCount::gib(8),
            ..Default::default()
        };
        let flexible = common.flexible();
        assert_eq!(flexible.min_size, ByteCount(1));
        assert_eq!(flexible.desired(), ByteCount(1));
        assert_eq!(flexible.weight, ByteCount::gib(4).bytes());
        assert_eq!(flexible.max_size, ByteCount::gib(8));
        flexible.validate("x").unwrap();

        // Without a floor the original weight is kept
        let weighted = CommonAttrs {
            weight: 3,
            ..Default::default()
        };
        assert_eq!(weighted.flexible().weight, 3);
    }

    #[test]
    fn test_validate_sizes() {
        let common = CommonAttrs {
            min_size: ByteCount::gib(4),
            desired_size: Some(ByteCount::gib(2)),
            ..Default::default()
        };
        assert_eq!(common.validate("x").unwrap_err().category(), "invalid-input");

        let common = CommonAttrs {
            min_size: ByteCount::gib(4),
            max_size: ByteCount::gib(2),
            ..Default::default()
        };
        assert!(common.validate("x").is_err());

        let common = CommonAttrs {
            role: Some(MemberRole::Raid("/dev/md0".into())),
            filesystem_type: Some(FilesystemType::Ext4),
            ..Default::default()
        };
        assert!(common.validate("x").is_err());
    }

    #[test]
    fn test_planned_device_yaml() {
        let yaml = indoc! {r#"
            - type: partition
              disk: /dev/sda
              minSize: 1G
              maxSize: 2G
              mountPoint: /boot
              filesystemType: ext4
            - type: partition
              minSize: 10G
              role:
                physicalVolume: system
            - type: lvm-vg
              name: system
              lvs:
                - name: root
                  minSize: 5G
                  mountPoint: /
                  filesystemType: btrfs
            - type: nfs
              server: nas
              path: /export
              mountPoint: /home
        "#};
        let devices: Vec<PlannedDevice> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(devices.len(), 4);
        let PlannedDevice::Partition(ref boot) = devices[0] else {
            panic!("expected a partition");
        };
        assert_eq!(boot.disk.as_deref(), Some("/dev/sda"));
        assert_eq!(boot.common.max_size, ByteCount::gib(2));
        assert_eq!(
            devices[1].role(),
            Some(&MemberRole::PhysicalVolume("system".into()))
        );
        assert_eq!(devices[2].kind(), "lvm-vg");
        assert_eq!(devices[3].planned_id(), "nas:/export");
        for device in &devices {
            device.validate().unwrap();
        }
    }
}
