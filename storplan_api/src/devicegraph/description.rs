//! # Devicegraph description
//!
//! Serializable form of a devicegraph, used to feed a scanned snapshot into
//! the engine and to write the proposed one back out.
//!
//! Building a devicegraph out of a description checks that:
//! - Device names are unique and sizes are valid.
//! - Partitions only exist on devices with a partition table, have valid
//!   numbers, fit inside their device and do not overlap.
//! - There is at most one extended partition and every logical partition is
//!   inside it.
//! - RAID, LVM and bcache members exist and are used only once.
//! - Logical volumes fit in their volume group.
//! - Filesystems sit on block devices and mount points are unique.

use std::collections::BTreeSet;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use sysdefs::{
    filesystems::FilesystemType,
    partition_ids::PartitionId,
    partition_tables::{PartitionKind, PartitionTableType, MSDOS_FIRST_LOGICAL_NUMBER},
};

use crate::{
    constants::{DEFAULT_BLOCK_SIZE, DEFAULT_EXTENT_SIZE},
    error::ProposalError,
    primitives::{bytes::ByteCount, region::Region},
};

use super::{
    device::{
        partition_name, CacheMode, Device, Disk, Filesystem, MountPoint, Partition, RaidLevel,
        Relation, StrayBlkDevice,
    },
    error::DevicegraphError,
    free_space::usable_area,
    Devicegraph, Sid,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DevicegraphDescription {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<DiskDescription>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stray_devices: Vec<StrayDescription>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mds: Vec<MdDescription>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcaches: Vec<BcacheDescription>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_groups: Vec<VgDescription>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nfs: Vec<NfsDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FilesystemDescription {
    #[serde(rename = "type")]
    pub fs_type: FilesystemType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mount_options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DiskDescription {
    pub name: String,
    pub size: ByteCount,

    #[serde(default = "default_block_size")]
    pub block_size: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_table: Option<PartitionTableType>,

    /// Table type to create when the disk has none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_partition_table: Option<PartitionTableType>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<PartitionDescription>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FilesystemDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PartitionDescription {
    pub number: u32,

    /// Offset from the start of the device.
    pub start: ByteCount,
    pub size: ByteCount,

    #[serde(default)]
    pub kind: PartitionKind,

    #[serde(default)]
    pub id: PartitionId,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub bootable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FilesystemDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StrayDescription {
    pub name: String,
    pub size: ByteCount,

    #[serde(default = "default_block_size")]
    pub block_size: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FilesystemDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MdDescription {
    pub name: String,
    pub level: RaidLevel,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<ByteCount>,
    pub members: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_table: Option<PartitionTableType>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<PartitionDescription>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FilesystemDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BcacheDescription {
    pub name: String,
    pub backing: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caching: Option<String>,

    #[serde(default)]
    pub cache_mode: CacheMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_table: Option<PartitionTableType>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<PartitionDescription>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FilesystemDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VgDescription {
    /// Volume group name, without `/dev/`.
    pub name: String,

    #[serde(default = "default_extent_size")]
    pub extent_size: ByteCount,
    pub physical_volumes: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logical_volumes: Vec<LvDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LvDescription {
    pub name: String,
    pub size: ByteCount,

    #[serde(default = "default_stripes")]
    pub stripes: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FilesystemDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NfsDescription {
    pub server: String,
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mount_options: Vec<String>,
}

fn default_block_size() -> u64 {
    DEFAULT_BLOCK_SIZE
}

fn default_extent_size() -> ByteCount {
    ByteCount(DEFAULT_EXTENT_SIZE)
}

fn default_stripes() -> u32 {
    1
}

fn rejected(name: &str, error: ProposalError) -> DevicegraphError {
    DevicegraphError::Rejected {
        name: name.to_owned(),
        reason: error.to_string(),
    }
}

impl DevicegraphDescription {
    /// Builds and validates the devicegraph.
    pub fn build(&self) -> Result<Devicegraph, DevicegraphError> {
        debug!("Building devicegraph");
        let mut builder = DevicegraphBuilder::default();

        trace!("Adding disks");
        for disk in &self.disks {
            builder.add_disk(disk)?;
        }

        trace!("Adding stray block devices");
        for stray in &self.stray_devices {
            builder.add_stray(stray)?;
        }

        trace!("Adding RAID arrays");
        for md in &self.mds {
            builder.add_md(md)?;
        }

        trace!("Adding bcache devices");
        for bcache in &self.bcaches {
            builder.add_bcache(bcache)?;
        }

        trace!("Adding volume groups");
        for vg in &self.volume_groups {
            builder.add_vg(vg)?;
        }

        trace!("Adding NFS mounts");
        for nfs in &self.nfs {
            builder.add_nfs(nfs)?;
        }

        let graph = builder.graph;
        trace!("Built devicegraph:\n{}", graph);
        debug!(
            "Devicegraph built successfully with {} devices",
            graph.device_count()
        );
        Ok(graph)
    }
}

#[derive(Debug, Default)]
struct DevicegraphBuilder {
    graph: Devicegraph,
    mount_points: BTreeSet<String>,
}

impl DevicegraphBuilder {
    fn check_name(&self, name: &str) -> Result<(), DevicegraphError> {
        if self.graph.find_by_name(name).is_some() {
            return Err(DevicegraphError::DuplicateName(name.to_owned()));
        }
        Ok(())
    }

    fn check_size(name: &str, size: ByteCount, block_size: u64) -> Result<(), DevicegraphError> {
        if size.is_zero() || size.is_unlimited() || block_size == 0 {
            return Err(DevicegraphError::InvalidSize {
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    fn add_disk(&mut self, desc: &DiskDescription) -> Result<(), DevicegraphError> {
        self.check_name(&desc.name)?;
        Self::check_size(&desc.name, desc.size, desc.block_size)?;
        let sid = self.graph.add_device(Device::Disk(Disk {
            name: desc.name.clone(),
            size: desc.size,
            block_size: desc.block_size,
            partition_table: desc.partition_table,
            preferred_table: desc
                .preferred_partition_table
                .or(desc.partition_table)
                .unwrap_or_default(),
        }));
        self.add_partitions(
            sid,
            &desc.name,
            desc.partition_table,
            &desc.partitions,
            desc.filesystem.as_ref(),
        )?;
        self.add_filesystem(sid, &desc.name, desc.filesystem.as_ref())
    }

    fn add_stray(&mut self, desc: &StrayDescription) -> Result<(), DevicegraphError> {
        self.check_name(&desc.name)?;
        Self::check_size(&desc.name, desc.size, desc.block_size)?;
        let sid = self
            .graph
            .add_device(Device::StrayBlkDevice(StrayBlkDevice {
                name: desc.name.clone(),
                size: desc.size,
                block_size: desc.block_size,
            }));
        self.add_filesystem(sid, &desc.name, desc.filesystem.as_ref())
    }

    fn resolve_member(&self, device: &str, member: &str) -> Result<Sid, DevicegraphError> {
        let sid = self
            .graph
            .find_by_name(member)
            .ok_or_else(|| DevicegraphError::UnknownMember {
                device: device.to_owned(),
                member: member.to_owned(),
            })?;
        if self.graph.is_in_use(sid) {
            return Err(DevicegraphError::MemberAlreadyUsed {
                member: member.to_owned(),
            });
        }
        Ok(sid)
    }

    fn add_md(&mut self, desc: &MdDescription) -> Result<(), DevicegraphError> {
        self.check_name(&desc.name)?;
        let mut members = Vec::new();
        for member in &desc.members {
            let sid = self.resolve_member(&desc.name, member)?;
            if members.contains(&sid) {
                return Err(DevicegraphError::MemberAlreadyUsed {
                    member: member.clone(),
                });
            }
            members.push(sid);
        }
        if members.len() < desc.level.min_members() {
            return Err(DevicegraphError::TooFewRaidMembers {
                md: desc.name.clone(),
                level: desc.level.to_string(),
                required: desc.level.min_members(),
            });
        }
        let sid = self
            .graph
            .create_md(&desc.name, desc.level, desc.chunk_size, &members)
            .map_err(|e| rejected(&desc.name, e))?;
        self.set_table(sid, desc.partition_table);
        self.add_partitions(
            sid,
            &desc.name,
            desc.partition_table,
            &desc.partitions,
            desc.filesystem.as_ref(),
        )?;
        self.add_filesystem(sid, &desc.name, desc.filesystem.as_ref())
    }

    fn add_bcache(&mut self, desc: &BcacheDescription) -> Result<(), DevicegraphError> {
        self.check_name(&desc.name)?;
        let backing = self.resolve_member(&desc.name, &desc.backing)?;
        let caching = match desc.caching {
            Some(ref caching) => Some(
                self.graph
                    .find_by_name(caching)
                    .ok_or_else(|| DevicegraphError::UnknownMember {
                        device: desc.name.clone(),
                        member: caching.clone(),
                    })?,
            ),
            None => None,
        };
        let sid = self
            .graph
            .create_bcache(&desc.name, desc.cache_mode, backing, caching)
            .map_err(|e| rejected(&desc.name, e))?;
        self.set_table(sid, desc.partition_table);
        self.add_partitions(
            sid,
            &desc.name,
            desc.partition_table,
            &desc.partitions,
            desc.filesystem.as_ref(),
        )?;
        self.add_filesystem(sid, &desc.name, desc.filesystem.as_ref())
    }

    fn add_vg(&mut self, desc: &VgDescription) -> Result<(), DevicegraphError> {
        let vg_path = format!("/dev/{}", desc.name);
        self.check_name(&vg_path)?;
        if desc.extent_size.is_zero() {
            return Err(DevicegraphError::InvalidSize { name: vg_path });
        }
        let mut pvs = Vec::new();
        for pv in &desc.physical_volumes {
            let sid = self.resolve_member(&vg_path, pv)?;
            if pvs.contains(&sid) {
                return Err(DevicegraphError::MemberAlreadyUsed { member: pv.clone() });
            }
            pvs.push(sid);
        }
        let vg = self
            .graph
            .create_vg(&desc.name, desc.extent_size, &pvs)
            .map_err(|e| rejected(&vg_path, e))?;

        let needed: ByteCount = desc.logical_volumes.iter().map(|lv| lv.size).sum();
        if needed > self.graph.vg_size(vg) {
            return Err(DevicegraphError::VolumeGroupOverflow {
                vg: desc.name.clone(),
            });
        }
        for lv in &desc.logical_volumes {
            let lv_path = format!("{}/{}", vg_path, lv.name);
            self.check_name(&lv_path)?;
            Self::check_size(&lv_path, lv.size, DEFAULT_BLOCK_SIZE)?;
            let sid = self
                .graph
                .create_lv(vg, &lv.name, lv.size, lv.stripes)
                .map_err(|e| rejected(&lv_path, e))?;
            self.add_filesystem(sid, &lv_path, lv.filesystem.as_ref())?;
        }
        Ok(())
    }

    fn add_nfs(&mut self, desc: &NfsDescription) -> Result<(), DevicegraphError> {
        let sid = self.graph.create_nfs(&desc.server, &desc.path);
        if let Some(ref path) = desc.mount_point {
            self.register_mount_point(path)?;
            self.graph
                .set_mount_point(
                    sid,
                    Some(MountPoint {
                        path: path.clone(),
                        options: desc.mount_options.clone(),
                    }),
                )
                .map_err(|e| rejected(&desc.server, e))?;
        }
        Ok(())
    }

    fn set_table(&mut self, sid: Sid, table: Option<PartitionTableType>) {
        if let Some(Some(slot)) = self
            .graph
            .inner
            .node_weight_mut(sid.0)
            .map(Device::partition_table_mut)
        {
            *slot = table;
        }
    }

    fn add_partitions(
        &mut self,
        parent: Sid,
        parent_name: &str,
        table: Option<PartitionTableType>,
        partitions: &[PartitionDescription],
        filesystem: Option<&FilesystemDescription>,
    ) -> Result<(), DevicegraphError> {
        if partitions.is_empty() {
            return Ok(());
        }
        let Some(table) = table else {
            return Err(DevicegraphError::PartitionsWithoutTable {
                disk: parent_name.to_owned(),
            });
        };
        if let Some(fs) = filesystem {
            return Err(DevicegraphError::InvalidFilesystem {
                device: parent_name.to_owned(),
                fs_type: fs.fs_type.to_string(),
            });
        }

        let block_size = self
            .graph
            .device(parent)
            .and_then(Device::block_size)
            .unwrap_or(DEFAULT_BLOCK_SIZE);
        let (_, usable_end) = usable_area(self.graph.size_of(parent), table, ByteCount::ZERO);

        let mut built: Vec<Partition> = Vec::new();
        for desc in partitions {
            let name = partition_name(parent_name, desc.number);
            let valid_number = match desc.kind {
                PartitionKind::Logical => {
                    (MSDOS_FIRST_LOGICAL_NUMBER..MSDOS_FIRST_LOGICAL_NUMBER + table.max_logical())
                        .contains(&desc.number)
                }
                _ => (1..=table.max_primary()).contains(&desc.number),
            };
            if !valid_number || built.iter().any(|p| p.number == desc.number) {
                return Err(DevicegraphError::InvalidPartitionNumber {
                    disk: parent_name.to_owned(),
                    number: desc.number,
                });
            }
            if desc.kind == PartitionKind::Extended
                && (!table.extended_possible()
                    || built.iter().any(|p| p.kind == PartitionKind::Extended))
            {
                return Err(DevicegraphError::InvalidExtended {
                    disk: parent_name.to_owned(),
                });
            }
            let region = Region::from_bytes(desc.start, desc.size, block_size)
                .ok_or_else(|| DevicegraphError::InvalidSize { name: name.clone() })?;
            if region.end_offset() > usable_end {
                return Err(DevicegraphError::PartitionOutOfBounds {
                    partition: name,
                    disk: parent_name.to_owned(),
                });
            }
            built.push(Partition {
                name,
                number: desc.number,
                region,
                kind: desc.kind,
                id: desc.id,
                bootable: desc.bootable,
            });
        }

        let extended = built
            .iter()
            .find(|p| p.kind == PartitionKind::Extended)
            .map(|p| p.region);
        for part in built.iter().filter(|p| p.kind == PartitionKind::Logical) {
            if !extended.is_some_and(|ext| ext.contains(&part.region)) {
                return Err(DevicegraphError::LogicalOutsideExtended {
                    partition: part.name.clone(),
                });
            }
        }
        for (i, first) in built.iter().enumerate() {
            for second in &built[i + 1..] {
                let same_level = (first.kind == PartitionKind::Logical)
                    == (second.kind == PartitionKind::Logical);
                if same_level && first.region.overlaps(&second.region) {
                    return Err(DevicegraphError::OverlappingPartitions {
                        first: first.name.clone(),
                        second: second.name.clone(),
                    });
                }
            }
        }

        for (part, desc) in built.into_iter().zip(partitions) {
            let name = part.name.clone();
            self.check_name(&name)?;
            let sid = self.graph.add_device(Device::Partition(part));
            self.graph.add_relation(parent, sid, Relation::Holds);
            self.add_filesystem(sid, &name, desc.filesystem.as_ref())?;
        }
        Ok(())
    }

    fn register_mount_point(&mut self, path: &str) -> Result<(), DevicegraphError> {
        if !self.mount_points.insert(path.to_owned()) {
            return Err(DevicegraphError::DuplicateMountPoint(path.to_owned()));
        }
        Ok(())
    }

    fn add_filesystem(
        &mut self,
        sid: Sid,
        name: &str,
        desc: Option<&FilesystemDescription>,
    ) -> Result<(), DevicegraphError> {
        let Some(desc) = desc else {
            return Ok(());
        };
        let fs = self
            .graph
            .format(sid, desc.fs_type, desc.label.clone())
            .map_err(|_| DevicegraphError::InvalidFilesystem {
                device: name.to_owned(),
                fs_type: desc.fs_type.to_string(),
            })?;
        if let Some(ref path) = desc.mount_point {
            self.register_mount_point(path)?;
            self.graph
                .set_mount_point(
                    fs,
                    Some(MountPoint {
                        path: path.clone(),
                        options: desc.mount_options.clone(),
                    }),
                )
                .map_err(|e| rejected(name, e))?;
        }
        Ok(())
    }
}

impl From<&Filesystem> for FilesystemDescription {
    fn from(fs: &Filesystem) -> Self {
        Self {
            fs_type: fs.fs_type,
            label: fs.label.clone(),
            mount_point: fs.mount_point.as_ref().map(|mp| mp.path.clone()),
            mount_options: fs
                .mount_point
                .as_ref()
                .map(|mp| mp.options.clone())
                .unwrap_or_default(),
        }
    }
}

impl Devicegraph {
    fn filesystem_description(&self, sid: Sid) -> Option<FilesystemDescription> {
        self.filesystem(sid).map(FilesystemDescription::from)
    }

    fn partition_descriptions(&self, sid: Sid) -> Vec<PartitionDescription> {
        self.partitions_of(sid)
            .into_iter()
            .filter_map(|p| {
                let part = self.device(p)?.as_partition()?;
                Some(PartitionDescription {
                    number: part.number,
                    start: part.region.start_offset(),
                    size: part.region.size(),
                    kind: part.kind,
                    id: part.id,
                    bootable: part.bootable,
                    filesystem: self.filesystem_description(p),
                })
            })
            .collect()
    }

    fn member_names(&self, sid: Sid, relation: Relation) -> Vec<String> {
        self.parents(sid, relation)
            .into_iter()
            .filter_map(|m| self.name_of(m).map(str::to_owned))
            .collect()
    }

    /// Serializable description of the devicegraph.
    pub fn to_description(&self) -> DevicegraphDescription {
        let mut result = DevicegraphDescription::default();
        for (sid, device) in self.devices() {
            match device {
                Device::Disk(disk) => result.disks.push(DiskDescription {
                    name: disk.name.clone(),
                    size: disk.size,
                    block_size: disk.block_size,
                    partition_table: disk.partition_table,
                    preferred_partition_table: (disk.partition_table.is_none()
                        && disk.preferred_table != PartitionTableType::default())
                    .then_some(disk.preferred_table),
                    partitions: self.partition_descriptions(sid),
                    filesystem: self.filesystem_description(sid),
                }),
                Device::StrayBlkDevice(stray) => result.stray_devices.push(StrayDescription {
                    name: stray.name.clone(),
                    size: stray.size,
                    block_size: stray.block_size,
                    filesystem: self.filesystem_description(sid),
                }),
                Device::Md(md) => result.mds.push(MdDescription {
                    name: md.name.clone(),
                    level: md.level,
                    chunk_size: md.chunk_size,
                    members: self.member_names(sid, Relation::Member),
                    partition_table: md.partition_table,
                    partitions: self.partition_descriptions(sid),
                    filesystem: self.filesystem_description(sid),
                }),
                Device::Bcache(bcache) => result.bcaches.push(BcacheDescription {
                    name: bcache.name.clone(),
                    backing: self
                        .member_names(sid, Relation::Member)
                        .into_iter()
                        .next()
                        .unwrap_or_default(),
                    caching: self.member_names(sid, Relation::Caching).into_iter().next(),
                    cache_mode: bcache.cache_mode,
                    partition_table: bcache.partition_table,
                    partitions: self.partition_descriptions(sid),
                    filesystem: self.filesystem_description(sid),
                }),
                Device::LvmVg(vg) => result.volume_groups.push(VgDescription {
                    name: vg.vg_name.clone(),
                    extent_size: vg.extent_size,
                    physical_volumes: self.member_names(sid, Relation::Member),
                    logical_volumes: self
                        .lvs_of(sid)
                        .into_iter()
                        .filter_map(|lv_sid| {
                            let lv = self.device(lv_sid)?.as_lv()?;
                            Some(LvDescription {
                                name: lv.lv_name.clone(),
                                size: lv.size,
                                stripes: lv.stripes,
                                filesystem: self.filesystem_description(lv_sid),
                            })
                        })
                        .collect(),
                }),
                Device::Filesystem(fs) => {
                    if let Some(ref nfs) = fs.nfs {
                        result.nfs.push(NfsDescription {
                            server: nfs.server.clone(),
                            path: nfs.path.clone(),
                            mount_point: fs.mount_point.as_ref().map(|mp| mp.path.clone()),
                            mount_options: fs
                                .mount_point
                                .as_ref()
                                .map(|mp| mp.options.clone())
                                .unwrap_or_default(),
                        })
                    }
                }
                Device::Partition(_) | Device::LvmLv(_) => {}
            }
        }
        result.disks.sort_by(|a, b| a.name.cmp(&b.name));
        result
    }
}
