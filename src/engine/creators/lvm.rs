use std::collections::BTreeMap;

use log::{debug, info, warn};

use storplan_api::{
    devicegraph::Devicegraph,
    error::{NoSpaceError, ProposalError, ProposalResultExt},
    planned::{PlannedDevice, PlannedLv, PlannedVg},
    ByteCount, Sid,
};

use crate::engine::distribution::{distribute_space, SizeLimits};

use super::{apply_common, CreatorResult};

/// Creates volume groups and their logical volumes.
///
/// Logical volumes share the free space of the volume group the same way
/// partitions share a free disk space, in whole extents.
pub struct LvmCreator<'a> {
    devicegraph: &'a Devicegraph,
    flexible: bool,
}

impl<'a> LvmCreator<'a> {
    pub fn new(devicegraph: &'a Devicegraph, flexible: bool) -> Self {
        Self {
            devicegraph,
            flexible,
        }
    }

    /// Creates the volume group on top of `pvs` and all its logical volumes.
    pub fn create_volumes(
        &self,
        planned: &PlannedVg,
        pvs: &[String],
    ) -> Result<CreatorResult, ProposalError> {
        let mut devicegraph = self.devicegraph.duplicate();
        let pv_sids = pvs
            .iter()
            .map(|name| devicegraph.lookup(name))
            .collect::<Result<Vec<Sid>, _>>()?;
        let vg = devicegraph
            .create_vg(&planned.name, planned.extent_size(), &pv_sids)
            .message(format!("Failed to create volume group '{}'", planned.name))?;
        info!(
            "Created volume group '{}' ({}) on {}",
            planned.name,
            devicegraph.vg_size(vg),
            pvs.join(", ")
        );

        let mut devices_map = self.create_lvs(&mut devicegraph, vg, planned, &planned.lvs)?;
        devices_map.insert(vg_name(&devicegraph, vg)?, PlannedDevice::LvmVg(planned.clone()));
        Ok(CreatorResult::new(devicegraph, devices_map))
    }

    /// Reuses an existing volume group: reused logical volumes are kept and
    /// new ones go into its free space.
    pub fn reuse_volumes(&self, planned: &PlannedVg) -> Result<CreatorResult, ProposalError> {
        let mut devicegraph = self.devicegraph.duplicate();
        let name = planned
            .common
            .reuse_name
            .clone()
            .unwrap_or_else(|| format!("/dev/{}", planned.name));
        let vg = devicegraph.lookup(&name)?;

        let (reused, new): (Vec<PlannedLv>, Vec<PlannedLv>) = planned
            .lvs
            .iter()
            .cloned()
            .partition(|lv| lv.common.is_reuse());
        let mut devices_map = BTreeMap::new();
        for lv in reused {
            let lv_name = lv.common.reuse_name.clone().unwrap_or_default();
            let sid = devicegraph.lookup(&lv_name)?;
            if lv.common.role.is_some() {
                devicegraph.remove_filesystem(sid);
            }
            apply_common(&mut devicegraph, sid, &lv.common)?;
            debug!("Reusing logical volume '{lv_name}'");
            devices_map.insert(lv_name, PlannedDevice::LvmLv(lv));
        }
        devices_map.extend(self.create_lvs(&mut devicegraph, vg, planned, &new)?);
        devices_map.insert(name, PlannedDevice::LvmVg(planned.clone()));
        Ok(CreatorResult::new(devicegraph, devices_map))
    }

    fn create_lvs(
        &self,
        devicegraph: &mut Devicegraph,
        vg: Sid,
        planned: &PlannedVg,
        lvs: &[PlannedLv],
    ) -> Result<BTreeMap<String, PlannedDevice>, ProposalError> {
        let mut devices_map = BTreeMap::new();
        if lvs.is_empty() {
            return Ok(devices_map);
        }
        let available = devicegraph.vg_free_space(vg);
        let extent = planned.extent_size();

        let limits: Vec<SizeLimits> = lvs.iter().map(|lv| SizeLimits::from(&lv.common)).collect();
        let mut sizes = distribute_space(&limits, available, extent, ByteCount::ZERO);
        if sizes.is_none() && self.flexible {
            warn!(
                "Logical volumes of '{}' do not fit, retrying with flexible sizes",
                planned.name
            );
            let flexible: Vec<SizeLimits> = lvs
                .iter()
                .map(|lv| SizeLimits::from(&lv.common.flexible()))
                .collect();
            sizes = distribute_space(&flexible, available, extent, ByteCount::ZERO);
        }
        let sizes = sizes.ok_or_else(|| {
            ProposalError::new(NoSpaceError::VolumeGroupTooSmall {
                vg: planned.name.clone(),
                available: available.to_string(),
                needed: lvs
                    .iter()
                    .map(|lv| lv.common.min_size.round_up(extent))
                    .sum::<ByteCount>()
                    .to_string(),
            })
        })?;

        for (lv, size) in lvs.iter().zip(sizes) {
            let sid = devicegraph
                .create_lv(vg, &lv.name, size, lv.stripes.unwrap_or(1))
                .message(format!("Failed to create logical volume '{}'", lv.name))?;
            apply_common(devicegraph, sid, &lv.common)?;
            let name = devicegraph.name_of(sid).unwrap_or_default().to_owned();
            debug!("Created logical volume '{name}' ({size})");
            devices_map.insert(name, PlannedDevice::LvmLv(lv.clone()));
        }
        Ok(devices_map)
    }
}

fn vg_name(devicegraph: &Devicegraph, vg: Sid) -> Result<String, ProposalError> {
    devicegraph
        .name_of(vg)
        .map(str::to_owned)
        .ok_or_else(|| ProposalError::internal("volume group without a name"))
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use storplan_api::planned::CommonAttrs;
    use sysdefs::filesystems::FilesystemType;

    use super::*;
    use crate::engine::test_utils::graph_from_yaml;

    const PV_GRAPH: &str = indoc! {r#"
        disks:
          - name: /dev/sda
            size: 40G
            partitionTable: gpt
            partitions:
              - number: 1
                start: 1M
                size: 20G
                id: lvm
    "#};

    fn lv(name: &str, min_gib: u64, desired_gib: u64) -> PlannedLv {
        PlannedLv {
            common: CommonAttrs {
                min_size: ByteCount::gib(min_gib),
                desired_size: Some(ByteCount::gib(desired_gib)),
                mount_point: Some(format!("/{name}")),
                filesystem_type: Some(FilesystemType::Xfs),
                ..Default::default()
            },
            name: name.into(),
            stripes: None,
        }
    }

    fn vg(lvs: Vec<PlannedLv>) -> PlannedVg {
        PlannedVg {
            common: CommonAttrs::default(),
            name: "system".into(),
            extent_size: None,
            lvs,
        }
    }

    #[test]
    fn test_create_volumes() {
        let graph = graph_from_yaml(PV_GRAPH);
        let pvs = vec!["/dev/sda1".to_owned()];
        let result = LvmCreator::new(&graph, false)
            .create_volumes(&vg(vec![lv("root", 5, 10), lv("home", 5, 5)]), &pvs)
            .unwrap();
        let new = &result.devicegraph;
        let root = new.find_by_name("/dev/system/root").unwrap();
        let home = new.find_by_name("/dev/system/home").unwrap();
        assert_eq!(new.size_of(root), ByteCount::gib(10));
        assert_eq!(new.size_of(home), ByteCount::gib(5));
        assert_eq!(new.filesystem(root).unwrap().mount_path(), Some("/root"));
        assert_eq!(
            result.devices_map.keys().collect::<Vec<_>>(),
            vec!["/dev/system", "/dev/system/home", "/dev/system/root"]
        );
    }

    #[test]
    fn test_volume_group_too_small() {
        let graph = graph_from_yaml(PV_GRAPH);
        let pvs = vec!["/dev/sda1".to_owned()];
        let planned = vg(vec![lv("root", 15, 15), lv("home", 10, 10)]);
        let err = LvmCreator::new(&graph, false)
            .create_volumes(&planned, &pvs)
            .unwrap_err();
        assert!(err.is_no_space());

        // Flexible sizes share the group by the original minimums
        let result = LvmCreator::new(&graph, true)
            .create_volumes(&planned, &pvs)
            .unwrap();
        let new = &result.devicegraph;
        let root = new.size_of(new.find_by_name("/dev/system/root").unwrap());
        let home = new.size_of(new.find_by_name("/dev/system/home").unwrap());
        assert!(root > home);
        assert!(root + home <= ByteCount::gib(20));

        let err = LvmCreator::new(&graph, false)
            .create_volumes(&planned, &[])
            .unwrap_err();
        assert_eq!(err.category(), "missing-dependency");
    }

    #[test]
    fn test_reuse_volumes() {
        let graph = graph_from_yaml(indoc! {r#"
            disks:
              - name: /dev/sda
                size: 40G
                partitionTable: gpt
                partitions:
                  - number: 1
                    start: 1M
                    size: 20G
                    id: lvm
            volumeGroups:
              - name: system
                physicalVolumes: [/dev/sda1]
                logicalVolumes:
                  - name: root
                    size: 5G
                    filesystem:
                      type: ext4
        "#});
        let mut root = lv("root", 0, 0);
        root.common.reuse_name = Some("/dev/system/root".into());
        root.common.filesystem_type = None;
        root.common.mount_point = Some("/".into());
        let planned = PlannedVg {
            common: CommonAttrs {
                reuse_name: Some("/dev/system".into()),
                ..Default::default()
            },
            ..vg(vec![root, lv("data", 2, 2)])
        };
        let result = LvmCreator::new(&graph, false)
            .reuse_volumes(&planned)
            .unwrap();
        let new = &result.devicegraph;
        let root = new.find_by_name("/dev/system/root").unwrap();
        assert_eq!(new.filesystem(root).unwrap().fs_type, FilesystemType::Ext4);
        assert_eq!(new.filesystem(root).unwrap().mount_path(), Some("/"));
        let data = new.find_by_name("/dev/system/data").unwrap();
        assert_eq!(new.size_of(data), ByteCount::gib(2));
        assert_eq!(result.devices_map.len(), 3);
    }
}
