use log::debug;

use storplan_api::{
    constants::ROOT_MOUNT_POINT_PATH,
    planned::{DevicesCollection, MemberRole},
    settings::ProposalSettings,
};

/// Size every planned device aims for in one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSize {
    Desired,
    Min,
}

/// Adapts the catalog to one combination of settings and target size.
pub struct DevicesPlanner<'a> {
    catalog: &'a DevicesCollection,
    settings: &'a ProposalSettings,
}

impl<'a> DevicesPlanner<'a> {
    pub fn new(catalog: &'a DevicesCollection, settings: &'a ProposalSettings) -> Self {
        Self { catalog, settings }
    }

    /// Returns the catalog to try:
    /// - Devices of volumes that are not proposed are dropped.
    /// - Root snapshots enlarge the root device.
    /// - With `TargetSize::Min` devices aim for their minimum only.
    /// - Partitions are pinned to the disk of their volume, and partitions of
    ///   the root filesystem (directly or as physical volumes of the root
    ///   volume group) to the root device.
    pub fn planned_devices(&self, target: TargetSize) -> DevicesCollection {
        let mut catalog = self.catalog.clone();

        for volume in self.settings.volumes.iter().filter(|v| !v.proposed) {
            if catalog.remove_mount_point(&volume.mount_point) {
                debug!("Volume '{}' is not proposed", volume.mount_point);
            }
        }

        if let Some(root) = self.settings.volume(ROOT_MOUNT_POINT_PATH) {
            if root.proposed && root.snapshots && !root.snapshots_size.is_zero() {
                if let Some(common) = catalog.mounted_at_mut(ROOT_MOUNT_POINT_PATH) {
                    let extra = root.snapshots_size;
                    common.min_size = common.min_size + extra;
                    common.desired_size = common.desired_size.map(|d| d + extra);
                    if !common.max_size.is_unlimited() {
                        common.max_size = common.max_size + extra;
                    }
                }
            }
        }

        if target == TargetSize::Min {
            for common in catalog.all_mut() {
                common.desired_size = None;
            }
        }

        let root_vg = catalog
            .vgs()
            .into_iter()
            .find(|vg| {
                vg.lvs
                    .iter()
                    .any(|lv| lv.common.is_mounted_at(ROOT_MOUNT_POINT_PATH))
            })
            .map(|vg| vg.name.clone());
        let root_device = self.settings.root_device.clone();
        for part in catalog.partitions_mut() {
            let volume_device = part
                .common
                .mount_point
                .as_deref()
                .and_then(|mp| self.settings.volume(mp))
                .and_then(|v| v.device.clone());
            if volume_device.is_some() {
                part.disk = volume_device;
                continue;
            }
            if part.disk.is_some() {
                continue;
            }
            let holds_root = part.common.is_mounted_at(ROOT_MOUNT_POINT_PATH)
                || matches!(
                    (&part.common.role, &root_vg),
                    (Some(MemberRole::PhysicalVolume(vg)), Some(root)) if vg == root
                );
            if holds_root {
                part.disk = root_device.clone();
            }
        }
        catalog
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use storplan_api::{
        settings::{AllocateMode, VolumeSpec},
        ByteCount,
    };

    use super::*;
    use crate::engine::test_utils::catalog_from_yaml;

    const CATALOG: &str = indoc! {r#"
        - type: partition
          minSize: 10G
          desiredSize: 20G
          maxSize: 40G
          mountPoint: /
          filesystemType: btrfs
        - type: partition
          minSize: 5G
          desiredSize: 10G
          mountPoint: /home
          filesystemType: xfs
        - type: partition
          minSize: 1G
          mountPoint: swap
          filesystemType: swap
    "#};

    fn settings() -> ProposalSettings {
        ProposalSettings {
            candidate_devices: vec!["/dev/sda".into(), "/dev/sdb".into()],
            allocate_mode: AllocateMode::Device,
            root_device: Some("/dev/sdb".into()),
            volumes: vec![
                VolumeSpec {
                    mount_point: "/".into(),
                    proposed: true,
                    snapshots: true,
                    snapshots_size: ByteCount::gib(5),
                    ..Default::default()
                },
                VolumeSpec {
                    mount_point: "/home".into(),
                    proposed: true,
                    device: Some("/dev/sda".into()),
                    ..Default::default()
                },
                VolumeSpec {
                    mount_point: "swap".into(),
                    proposed: false,
                    ..Default::default()
                },
            ],
        }
    }

    #[test]
    fn test_planned_devices() {
        let catalog = catalog_from_yaml(CATALOG);
        let settings = settings();
        let planned = DevicesPlanner::new(&catalog, &settings).planned_devices(TargetSize::Desired);

        assert_eq!(planned.partitions().len(), 2);
        let root = planned.partitions()[0];
        assert_eq!(root.common.min_size, ByteCount::gib(15));
        assert_eq!(root.common.desired(), ByteCount::gib(25));
        assert_eq!(root.common.max_size, ByteCount::gib(45));
        assert_eq!(root.disk.as_deref(), Some("/dev/sdb"));
        assert_eq!(planned.partitions()[1].disk.as_deref(), Some("/dev/sda"));

        // The input catalog is left alone
        assert_eq!(catalog.partitions().len(), 3);
    }

    #[test]
    fn test_min_target() {
        let catalog = catalog_from_yaml(CATALOG);
        let settings = settings();
        let planned = DevicesPlanner::new(&catalog, &settings).planned_devices(TargetSize::Min);
        let home = planned.mounted_at("/home").unwrap();
        assert_eq!(home.desired(), ByteCount::gib(5));
        assert_eq!(
            planned.mounted_at("/").unwrap().desired(),
            ByteCount::gib(15)
        );
    }

    #[test]
    fn test_root_volume_group() {
        let catalog = catalog_from_yaml(indoc! {r#"
            - type: partition
              minSize: 20G
              role:
                physicalVolume: system
            - type: partition
              minSize: 20G
              role:
                physicalVolume: data
            - type: lvm-vg
              name: system
              lvs:
                - name: root
                  minSize: 10G
                  mountPoint: /
                  filesystemType: ext4
        "#});
        let settings = ProposalSettings {
            candidate_devices: vec!["/dev/sda".into()],
            root_device: Some("/dev/sda".into()),
            ..Default::default()
        };
        let planned = DevicesPlanner::new(&catalog, &settings).planned_devices(TargetSize::Desired);
        let parts = planned.partitions();
        assert_eq!(parts[0].disk.as_deref(), Some("/dev/sda"));
        assert_eq!(parts[1].disk, None);
    }
}
