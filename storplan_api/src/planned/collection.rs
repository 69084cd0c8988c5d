use std::collections::HashSet;

use log::debug;

use crate::error::{InvalidInputError, ProposalError};

use super::{
    CommonAttrs, PlannedBcache, PlannedDevice, PlannedMd, PlannedNfs, PlannedPartition,
    PlannedStray, PlannedVg,
};

/// The catalog of planned devices of one request.
///
/// Every device (including logical volumes and partitions nested in RAIDs or
/// bcaches) carries a unique id once the collection is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevicesCollection {
    devices: Vec<PlannedDevice>,
}

impl DevicesCollection {
    /// Validates the devices and fills in missing ids.
    pub fn new(devices: Vec<PlannedDevice>) -> Result<Self, ProposalError> {
        let mut mount_points = HashSet::new();
        for device in &devices {
            if let PlannedDevice::LvmLv(lv) = device {
                return Err(ProposalError::new(InvalidInputError::InvalidPlannedDevice {
                    device: lv.name.clone(),
                    reason: "logical volumes must be listed inside their volume group".into(),
                }));
            }
            device.validate()?;
        }

        let mut collection = Self { devices };
        for common in collection.all() {
            if let Some(path) = &common.mount_point {
                if !mount_points.insert(path.clone()) {
                    return Err(ProposalError::new(InvalidInputError::InvalidSettings {
                        reason: format!("mount point '{path}' is used more than once"),
                    }));
                }
            }
        }
        collection.assign_ids();
        Ok(collection)
    }

    fn assign_ids(&mut self) {
        let mut used = HashSet::new();
        let mut assign = |common: &mut CommonAttrs, default: String| {
            let base = common.id.clone().unwrap_or(default);
            let mut id = base.clone();
            let mut n = 2;
            while !used.insert(id.clone()) {
                id = format!("{base}#{n}");
                n += 1;
            }
            if common.id.as_ref() != Some(&id) {
                debug!("Planned device '{base}' gets id '{id}'");
            }
            common.id = Some(id);
        };

        for device in &mut self.devices {
            let default = device.default_id();
            match device {
                PlannedDevice::Md(PlannedMd {
                    common,
                    name,
                    partitions,
                    ..
                })
                | PlannedDevice::Bcache(PlannedBcache {
                    common,
                    name,
                    partitions,
                    ..
                }) => {
                    assign(common, default);
                    for (index, part) in partitions.iter_mut().enumerate() {
                        let nested = part
                            .common
                            .mount_point
                            .clone()
                            .unwrap_or_else(|| format!("{name}-part{}", index + 1));
                        assign(&mut part.common, nested);
                    }
                }
                PlannedDevice::LvmVg(vg) => {
                    assign(&mut vg.common, default);
                    for lv in &mut vg.lvs {
                        let nested = format!("{}/{}", vg.name, lv.name);
                        assign(&mut lv.common, nested);
                    }
                }
                other => assign(other.common_mut(), default),
            }
        }
    }

    pub fn devices(&self) -> &[PlannedDevice] {
        &self.devices
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Top level partitions, the ones placed on disks.
    pub fn partitions(&self) -> Vec<&PlannedPartition> {
        self.devices
            .iter()
            .filter_map(|d| match d {
                PlannedDevice::Partition(part) => Some(part),
                _ => None,
            })
            .collect()
    }

    pub fn partitions_mut(&mut self) -> impl Iterator<Item = &mut PlannedPartition> {
        self.devices.iter_mut().filter_map(|d| match d {
            PlannedDevice::Partition(part) => Some(part),
            _ => None,
        })
    }

    pub fn mds(&self) -> Vec<&PlannedMd> {
        self.devices
            .iter()
            .filter_map(|d| match d {
                PlannedDevice::Md(md) => Some(md),
                _ => None,
            })
            .collect()
    }

    pub fn vgs(&self) -> Vec<&PlannedVg> {
        self.devices
            .iter()
            .filter_map(|d| match d {
                PlannedDevice::LvmVg(vg) => Some(vg),
                _ => None,
            })
            .collect()
    }

    pub fn bcaches(&self) -> Vec<&PlannedBcache> {
        self.devices
            .iter()
            .filter_map(|d| match d {
                PlannedDevice::Bcache(bcache) => Some(bcache),
                _ => None,
            })
            .collect()
    }

    pub fn strays(&self) -> Vec<&PlannedStray> {
        self.devices
            .iter()
            .filter_map(|d| match d {
                PlannedDevice::StrayBlkDevice(stray) => Some(stray),
                _ => None,
            })
            .collect()
    }

    pub fn nfs(&self) -> Vec<&PlannedNfs> {
        self.devices
            .iter()
            .filter_map(|d| match d {
                PlannedDevice::Nfs(nfs) => Some(nfs),
                _ => None,
            })
            .collect()
    }

    /// Common attributes of every device, nested ones included.
    pub fn all(&self) -> Vec<&CommonAttrs> {
        let mut all = Vec::new();
        for device in &self.devices {
            all.push(device.common());
            match device {
                PlannedDevice::Md(PlannedMd { partitions, .. })
                | PlannedDevice::Bcache(PlannedBcache { partitions, .. }) => {
                    all.extend(partitions.iter().map(|p| &p.common))
                }
                PlannedDevice::LvmVg(vg) => all.extend(vg.lvs.iter().map(|lv| &lv.common)),
                _ => {}
            }
        }
        all
    }

    /// Mutable view of `all()`.
    pub fn all_mut(&mut self) -> Vec<&mut CommonAttrs> {
        let mut all = Vec::new();
        for device in &mut self.devices {
            match device {
                PlannedDevice::Md(PlannedMd {
                    common, partitions, ..
                })
                | PlannedDevice::Bcache(PlannedBcache {
                    common, partitions, ..
                }) => {
                    all.push(common);
                    all.extend(partitions.iter_mut().map(|p| &mut p.common));
                }
                PlannedDevice::LvmVg(vg) => {
                    all.push(&mut vg.common);
                    all.extend(vg.lvs.iter_mut().map(|lv| &mut lv.common));
                }
                other => all.push(other.common_mut()),
            }
        }
        all
    }

    /// Mutable access to the device mounted at `path`, wherever it is nested.
    pub fn mounted_at_mut(&mut self, path: &str) -> Option<&mut CommonAttrs> {
        self.all_mut().into_iter().find(|c| c.is_mounted_at(path))
    }

    /// The device that holds the filesystem mounted at `path`.
    pub fn mounted_at(&self, path: &str) -> Option<&CommonAttrs> {
        self.all().into_iter().find(|c| c.is_mounted_at(path))
    }

    /// Removes every device mounted at `path`, nested ones included.
    /// Returns whether anything was removed.
    pub fn remove_mount_point(&mut self, path: &str) -> bool {
        let before = self.all().len();
        self.devices.retain(|d| !d.common().is_mounted_at(path));
        for device in &mut self.devices {
            match device {
                PlannedDevice::Md(PlannedMd { partitions, .. })
                | PlannedDevice::Bcache(PlannedBcache { partitions, .. }) => {
                    partitions.retain(|p| !p.common.is_mounted_at(path))
                }
                PlannedDevice::LvmVg(vg) => vg.lvs.retain(|lv| !lv.common.is_mounted_at(path)),
                _ => {}
            }
        }
        self.all().len() != before
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::primitives::bytes::ByteCount;

    fn collection(yaml: &str) -> Result<DevicesCollection, ProposalError> {
        DevicesCollection::new(serde_yaml::from_str(yaml).unwrap())
    }

    const CATALOG: &str = indoc! {r#"
        - type: partition
          minSize: 1G
          mountPoint: /boot
          filesystemType: ext4
        - type: partition
          minSize: 2G
          role:
            raid: /dev/md0
        - type: partition
          minSize: 2G
          role:
            raid: /dev/md0
        - type: md
          name: /dev/md0
          level: raid1
          partitions:
            - minSize: 1G
              mountPoint: /srv
              filesystemType: xfs
        - type: lvm-vg
          name: system
          lvs:
            - name: root
              minSize: 5G
              mountPoint: /
              filesystemType: ext4
            - name: home
              minSize: 5G
              mountPoint: /home
              filesystemType: xfs
    "#};

    #[test]
    fn test_views_and_ids() {
        let catalog = collection(CATALOG).unwrap();
        assert_eq!(catalog.partitions().len(), 3);
        assert_eq!(catalog.mds().len(), 1);
        assert_eq!(catalog.vgs().len(), 1);
        assert!(catalog.bcaches().is_empty());
        assert_eq!(catalog.all().len(), 8);

        let ids: Vec<_> = catalog
            .all()
            .iter()
            .map(|c| c.id.clone().unwrap())
            .collect();
        assert_eq!(
            ids,
            vec![
                "/boot",
                "partition",
                "partition#2",
                "/dev/md0",
                "/srv",
                "system",
                "system/root",
                "system/home"
            ]
        );
    }

    #[test]
    fn test_mount_points() {
        let mut catalog = collection(CATALOG).unwrap();
        assert_eq!(
            catalog.mounted_at("/").unwrap().min_size,
            ByteCount::gib(5)
        );
        catalog.mounted_at_mut("/srv").unwrap().min_size = ByteCount::gib(3);
        assert_eq!(
            catalog.mounted_at("/srv").unwrap().min_size,
            ByteCount::gib(3)
        );

        assert!(catalog.remove_mount_point("/home"));
        assert!(!catalog.remove_mount_point("/home"));
        assert_eq!(catalog.vgs()[0].lvs.len(), 1);
        assert!(catalog.remove_mount_point("/boot"));
        assert_eq!(catalog.partitions().len(), 2);
    }

    #[test]
    fn test_rejected_catalogs() {
        let duplicated = indoc! {r#"
            - type: partition
              mountPoint: /data
              filesystemType: ext4
            - type: lvm-vg
              name: vg
              lvs:
                - name: data
                  mountPoint: /data
                  filesystemType: xfs
        "#};
        assert_eq!(collection(duplicated).unwrap_err().category(), "invalid-input");

        let loose_lv = indoc! {r#"
            - type: lvm-lv
              name: data
        "#};
        assert!(collection(loose_lv).is_err());

        let nested_disk = indoc! {r#"
            - type: md
              name: /dev/md0
              level: raid0
              partitions:
                - disk: /dev/sda
        "#};
        assert!(collection(nested_disk).is_err());
    }
}
