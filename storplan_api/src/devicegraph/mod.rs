//! # Devicegraph
//!
//! A snapshot of the storage of a system: disks, partitions, RAID arrays,
//! LVM, bcache and filesystems, stored in a petgraph arena. Edges always
//! point from a device to the devices built on top of it.
//!
//! Every planning attempt works on its own copy (`duplicate()`); ids (`Sid`)
//! survive clones and removals because the arena is a `StableGraph`.

use std::fmt::Display;

use log::trace;
use petgraph::{
    csr::DefaultIx,
    stable_graph::{NodeIndex as PetgraphNodeIndex, StableGraph},
    visit::{Dfs, EdgeRef, Reversed, Walker},
    Directed, Direction,
};
use sysdefs::{
    filesystems::FilesystemType,
    partition_ids::PartitionId,
    partition_tables::{PartitionKind, PartitionTableType, MSDOS_FIRST_LOGICAL_NUMBER},
};

use crate::{
    constants::{BCACHE_BACKING_OVERHEAD, LVM_PV_OVERHEAD, MD_MEMBER_OVERHEAD},
    error::{
        InfeasibleError, InternalError, MissingDependencyError, NoSpaceError, ProposalError,
    },
    primitives::{
        bytes::ByteCount,
        region::{Alignment, Region},
    },
};

pub mod description;
pub mod device;
pub mod error;
pub mod free_space;

use device::{
    partition_name, Bcache, CacheMode, Device, Filesystem, LvmLv, LvmVg, Md, MountPoint,
    NfsSource, Partition, RaidLevel, Relation,
};
use free_space::{compute_free_spaces, usable_area, FreeDiskSpace, PartitionableInfo};

/// The type of the node index used in the devicegraph.
pub(crate) type NodeIndex = PetgraphNodeIndex<DefaultIx>;

/// The type of the graph used to store devices and their relationships.
pub(crate) type DevicePetgraph = StableGraph<Device, Relation, Directed, DefaultIx>;

/// Stable id of a device inside a devicegraph and all its copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sid(pub(crate) NodeIndex);

impl Display for Sid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.index())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Devicegraph {
    inner: DevicePetgraph,
}

impl Devicegraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an independent copy of the devicegraph.
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    pub fn device(&self, sid: Sid) -> Option<&Device> {
        self.inner.node_weight(sid.0)
    }

    #[track_caller]
    fn device_mut(&mut self, sid: Sid) -> Result<&mut Device, ProposalError> {
        self.inner.node_weight_mut(sid.0).ok_or_else(|| {
            ProposalError::new(InternalError::DeviceVanished {
                name: sid.to_string(),
            })
        })
    }

    /// Returns the device or an error when the id is gone.
    #[track_caller]
    pub fn existing(&self, sid: Sid) -> Result<&Device, ProposalError> {
        self.device(sid).ok_or_else(|| {
            ProposalError::new(InternalError::DeviceVanished {
                name: sid.to_string(),
            })
        })
    }

    /// Iterates over all devices in id order.
    pub fn devices(&self) -> impl Iterator<Item = (Sid, &Device)> + '_ {
        self.inner
            .node_indices()
            .map(move |idx| (Sid(idx), &self.inner[idx]))
    }

    pub fn device_count(&self) -> usize {
        self.inner.node_count()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Sid> {
        self.devices()
            .find(|(_, dev)| dev.name() == Some(name))
            .map(|(sid, _)| sid)
    }

    /// Like `find_by_name`, with a structured error when missing.
    #[track_caller]
    pub fn lookup(&self, name: &str) -> Result<Sid, ProposalError> {
        self.find_by_name(name).ok_or_else(|| {
            ProposalError::new(MissingDependencyError::ReuseTargetNotFound {
                name: name.to_owned(),
            })
        })
    }

    pub fn name_of(&self, sid: Sid) -> Option<&str> {
        self.device(sid).and_then(Device::name)
    }

    /// Returns all disks sorted by name.
    pub fn disks(&self) -> Vec<Sid> {
        let mut disks: Vec<_> = self.devices().filter(|(_, d)| d.is_disk()).collect();
        disks.sort_by(|(_, a), (_, b)| a.name().cmp(&b.name()));
        disks.into_iter().map(|(sid, _)| sid).collect()
    }

    /// Devices directly built on `sid` through `relation`.
    pub fn children(&self, sid: Sid, relation: Relation) -> Vec<Sid> {
        self.related(sid, relation, Direction::Outgoing)
    }

    /// Devices `sid` is directly built on through `relation`.
    pub fn parents(&self, sid: Sid, relation: Relation) -> Vec<Sid> {
        self.related(sid, relation, Direction::Incoming)
    }

    fn related(&self, sid: Sid, relation: Relation, direction: Direction) -> Vec<Sid> {
        if !self.inner.contains_node(sid.0) {
            return Vec::new();
        }
        let mut result: Vec<Sid> = self
            .inner
            .edges_directed(sid.0, direction)
            .filter(|edge| *edge.weight() == relation)
            .map(|edge| {
                Sid(match direction {
                    Direction::Outgoing => edge.target(),
                    Direction::Incoming => edge.source(),
                })
            })
            .collect();
        result.sort();
        result
    }

    /// All devices `sid` is built on, directly or not.
    pub fn ancestors(&self, sid: Sid) -> Vec<Sid> {
        if !self.inner.contains_node(sid.0) {
            return Vec::new();
        }
        let reversed = Reversed(&self.inner);
        Dfs::new(reversed, sid.0)
            .iter(reversed)
            .filter(|idx| *idx != sid.0)
            .map(Sid)
            .collect()
    }

    /// All devices built on `sid`, directly or not.
    pub fn descendants(&self, sid: Sid) -> Vec<Sid> {
        if !self.inner.contains_node(sid.0) {
            return Vec::new();
        }
        Dfs::new(&self.inner, sid.0)
            .iter(&self.inner)
            .filter(|idx| *idx != sid.0)
            .map(Sid)
            .collect()
    }

    /// The first disk (by id) `sid` lives on, or `sid` itself when it is a
    /// disk.
    pub fn disk_of(&self, sid: Sid) -> Option<Sid> {
        self.disks_of(sid).into_iter().next()
    }

    /// All disks `sid` lives on, sorted by id.
    pub fn disks_of(&self, sid: Sid) -> Vec<Sid> {
        let mut disks: Vec<Sid> = std::iter::once(sid)
            .chain(self.ancestors(sid))
            .filter(|a| self.device(*a).is_some_and(Device::is_disk))
            .collect();
        disks.sort();
        disks
    }

    pub fn filesystem_of(&self, sid: Sid) -> Option<Sid> {
        self.children(sid, Relation::Formats).into_iter().next()
    }

    pub fn filesystem(&self, sid: Sid) -> Option<&Filesystem> {
        self.filesystem_of(sid)
            .and_then(|fs| self.device(fs))
            .and_then(Device::as_filesystem)
    }

    /// The block device a filesystem sits on. None for NFS.
    pub fn blk_device_of(&self, fs: Sid) -> Option<Sid> {
        self.parents(fs, Relation::Formats).into_iter().next()
    }

    pub fn find_filesystem_by_mount_point(&self, path: &str) -> Option<Sid> {
        self.devices()
            .find(|(_, dev)| {
                dev.as_filesystem()
                    .is_some_and(|fs| fs.mount_path() == Some(path))
            })
            .map(|(sid, _)| sid)
    }

    /// Partitions of a partitionable device, sorted by start.
    pub fn partitions_of(&self, sid: Sid) -> Vec<Sid> {
        let mut partitions: Vec<(u64, Sid)> = self
            .children(sid, Relation::Holds)
            .into_iter()
            .filter_map(|p| {
                self.device(p)
                    .and_then(Device::as_partition)
                    .map(|part| (part.region.start, p))
            })
            .collect();
        partitions.sort();
        partitions.into_iter().map(|(_, sid)| sid).collect()
    }

    /// The device holding the partition `sid`.
    pub fn partitionable_of(&self, sid: Sid) -> Option<Sid> {
        self.device(sid)?.as_partition()?;
        self.parents(sid, Relation::Holds).into_iter().next()
    }

    pub fn partition_table(&self, sid: Sid) -> Option<PartitionTableType> {
        self.device(sid)?.partition_table()
    }

    /// Size of a device in bytes. Filesystems and unknown ids have size 0.
    pub fn size_of(&self, sid: Sid) -> ByteCount {
        match self.device(sid) {
            Some(Device::Disk(d)) => d.size,
            Some(Device::Partition(p)) => p.region.size(),
            Some(Device::Md(m)) => m.size,
            Some(Device::LvmVg(_)) => self.vg_size(sid),
            Some(Device::LvmLv(lv)) => lv.size,
            Some(Device::Bcache(b)) => b.size,
            Some(Device::StrayBlkDevice(s)) => s.size,
            Some(Device::Filesystem(_)) | None => ByteCount::ZERO,
        }
    }

    /// Whether the device is used by anything built on top of it.
    pub fn is_in_use(&self, sid: Sid) -> bool {
        self.inner.contains_node(sid.0)
            && self
                .inner
                .neighbors_directed(sid.0, Direction::Outgoing)
                .next()
                .is_some()
    }

    fn partitionable_info(&self, sid: Sid) -> Option<PartitionableInfo<'_>> {
        let device = self.device(sid)?;
        if !device.is_partitionable() {
            return None;
        }
        Some(PartitionableInfo {
            sid,
            name: device.name()?,
            size: self.size_of(sid),
            block_size: device.block_size()?,
            table: device.partition_table(),
            preferred_table: device.preferred_table(),
        })
    }

    fn partitions_ref(&self, sid: Sid) -> Vec<&Partition> {
        self.partitions_of(sid)
            .into_iter()
            .filter_map(|p| self.device(p).and_then(Device::as_partition))
            .collect()
    }

    /// Free spaces of a partitionable device.
    ///
    /// Devices used directly (formatted or member of something else) have no
    /// free space. Devices without a table report one space covering the
    /// usable area.
    pub fn free_spaces(&self, sid: Sid, alignment: &Alignment) -> Vec<FreeDiskSpace> {
        let Some(info) = self.partitionable_info(sid) else {
            return Vec::new();
        };
        if info.table.is_none() && self.is_in_use(sid) {
            return Vec::new();
        }
        let spaces = compute_free_spaces(&info, &self.partitions_ref(sid), alignment);
        trace!("Free spaces of '{}': {:?}", info.name, spaces);
        spaces
    }

    /// Bytes of free space directly after the partition `sid`, up to the next
    /// partition of the same level or the end of the usable area.
    pub fn free_after(&self, sid: Sid, alignment: &Alignment) -> ByteCount {
        let (Some(part), Some(parent)) = (
            self.device(sid).and_then(Device::as_partition),
            self.partitionable_of(sid),
        ) else {
            return ByteCount::ZERO;
        };
        let end = match part.kind {
            PartitionKind::Logical => self
                .partitions_ref(parent)
                .into_iter()
                .find(|p| p.kind == PartitionKind::Extended)
                .map(|ext| ext.region.end_offset())
                .unwrap_or_default(),
            _ => {
                let table = self.partition_table(parent).unwrap_or_default();
                usable_area(self.size_of(parent), table, alignment.grain).1
            }
        };
        let logical = part.kind == PartitionKind::Logical;
        let next_start = self
            .partitions_ref(parent)
            .into_iter()
            .filter(|p| (p.kind == PartitionKind::Logical) == logical)
            .map(|p| p.region.start_offset())
            .filter(|start| *start >= part.region.end_offset())
            .min()
            .unwrap_or(end)
            .min(end);
        next_start.saturating_sub(part.region.end_offset())
    }

    /// Physical volumes of a volume group.
    pub fn pvs_of(&self, vg: Sid) -> Vec<Sid> {
        self.parents(vg, Relation::Member)
    }

    /// Logical volumes of a volume group.
    pub fn lvs_of(&self, vg: Sid) -> Vec<Sid> {
        self.children(vg, Relation::Holds)
    }

    /// Members of a RAID array, physical volumes of a volume group or the
    /// backing device of a bcache.
    pub fn members_of(&self, sid: Sid) -> Vec<Sid> {
        self.parents(sid, Relation::Member)
    }

    /// Usable size of a volume group: every PV minus its metadata, in whole
    /// extents.
    pub fn vg_size(&self, vg: Sid) -> ByteCount {
        let Some(extent) = self.device(vg).and_then(Device::as_vg).map(|v| v.extent_size) else {
            return ByteCount::ZERO;
        };
        self.pvs_of(vg)
            .into_iter()
            .map(|pv| {
                self.size_of(pv)
                    .saturating_sub(ByteCount(LVM_PV_OVERHEAD))
                    .round_down(extent)
            })
            .sum()
    }

    pub fn vg_free_space(&self, vg: Sid) -> ByteCount {
        let used: ByteCount = self.lvs_of(vg).into_iter().map(|lv| self.size_of(lv)).sum();
        self.vg_size(vg).saturating_sub(used)
    }

    // Mutations

    pub(crate) fn add_device(&mut self, device: Device) -> Sid {
        Sid(self.inner.add_node(device))
    }

    pub(crate) fn add_relation(&mut self, from: Sid, to: Sid, relation: Relation) {
        self.inner.add_edge(from.0, to.0, relation);
    }

    #[track_caller]
    fn ensure_name_free(&self, name: &str) -> Result<(), ProposalError> {
        match self.find_by_name(name) {
            Some(_) => Err(ProposalError::new(InfeasibleError::UnsupportedDevice {
                name: name.to_owned(),
                reason: "a device with this name already exists".into(),
            })),
            None => Ok(()),
        }
    }

    /// Checks that a device can be consumed by a new device on top of it.
    #[track_caller]
    fn ensure_available(&self, sid: Sid) -> Result<(), ProposalError> {
        let device = self.existing(sid)?;
        let name = device.name().unwrap_or_default().to_owned();
        if !device.is_block_device() {
            return Err(ProposalError::new(InfeasibleError::UnsupportedDevice {
                name,
                reason: format!("a {} is not a block device", device.kind()),
            }));
        }
        if self.is_in_use(sid) {
            return Err(ProposalError::new(InfeasibleError::UnsupportedDevice {
                name,
                reason: "the device is already in use".into(),
            }));
        }
        Ok(())
    }

    pub fn create_partition_table(
        &mut self,
        sid: Sid,
        table: PartitionTableType,
    ) -> Result<(), ProposalError> {
        let device = self.existing(sid)?;
        let name = device.name().unwrap_or_default().to_owned();
        if !device.is_partitionable() {
            return Err(ProposalError::new(InfeasibleError::UnsupportedDevice {
                name,
                reason: format!("a {} cannot hold a partition table", device.kind()),
            }));
        }
        if self.is_in_use(sid) {
            return Err(ProposalError::new(InfeasibleError::UnsupportedDevice {
                name,
                reason: "the device is in use".into(),
            }));
        }
        trace!("Creating {} partition table on '{}'", table, name);
        if let Some(slot) = self.device_mut(sid)?.partition_table_mut() {
            *slot = Some(table);
        }
        Ok(())
    }

    /// Creates a partition on `parent` covering `region`.
    ///
    /// The partition gets the lowest free number for its kind. Fails when
    /// the region overlaps another partition, exceeds the usable area or the
    /// table has no free slot of the requested kind.
    pub fn create_partition(
        &mut self,
        parent: Sid,
        region: Region,
        kind: PartitionKind,
        id: PartitionId,
    ) -> Result<Sid, ProposalError> {
        let device = self.existing(parent)?;
        let parent_name = device.name().unwrap_or_default().to_owned();
        let table = device.partition_table().ok_or_else(|| {
            ProposalError::new(InfeasibleError::UnsupportedDevice {
                name: parent_name.clone(),
                reason: "the device has no partition table".into(),
            })
        })?;
        let block_size = device.block_size().unwrap_or(region.block_size);
        let region = if region.block_size == block_size {
            region
        } else {
            Region::from_bytes(region.start_offset(), region.size(), block_size).ok_or_else(
                || ProposalError::internal("region too small for the device block size"),
            )?
        };

        let existing = self.partitions_ref(parent);
        let extended = existing
            .iter()
            .find(|p| p.kind == PartitionKind::Extended)
            .map(|p| p.region);
        let taken: Vec<u32> = existing.iter().map(|p| p.number).collect();

        let number = match kind {
            PartitionKind::Logical => {
                let ext = extended.ok_or_else(|| {
                    ProposalError::new(InfeasibleError::NoLogicalSlot {
                        disk: parent_name.clone(),
                    })
                })?;
                if !ext.contains(&region) {
                    return Err(ProposalError::new(InfeasibleError::OutOfBounds {
                        disk: parent_name,
                    }));
                }
                (MSDOS_FIRST_LOGICAL_NUMBER..MSDOS_FIRST_LOGICAL_NUMBER + table.max_logical())
                    .find(|n| !taken.contains(n))
                    .ok_or_else(|| {
                        ProposalError::new(InfeasibleError::NoLogicalSlot {
                            disk: parent_name.clone(),
                        })
                    })?
            }
            PartitionKind::Primary | PartitionKind::Extended => {
                if kind == PartitionKind::Extended
                    && (!table.extended_possible() || extended.is_some())
                {
                    return Err(ProposalError::new(InfeasibleError::NoExtendedPossible {
                        disk: parent_name,
                    }));
                }
                let (_, usable_end) = usable_area(self.size_of(parent), table, ByteCount::ZERO);
                if region.end_offset() > usable_end {
                    return Err(ProposalError::new(InfeasibleError::OutOfBounds {
                        disk: parent_name,
                    }));
                }
                (1..=table.max_primary())
                    .find(|n| !taken.contains(n))
                    .ok_or_else(|| {
                        ProposalError::new(InfeasibleError::NoPrimarySlot {
                            disk: parent_name.clone(),
                        })
                    })?
            }
        };

        let logical = kind == PartitionKind::Logical;
        if existing
            .iter()
            .filter(|p| (p.kind == PartitionKind::Logical) == logical)
            .any(|p| p.region.overlaps(&region))
        {
            return Err(ProposalError::new(InfeasibleError::Overlap {
                disk: parent_name,
            }));
        }

        let name = partition_name(&parent_name, number);
        trace!("Creating {} partition '{}' at {}", kind, name, region);
        let sid = self.add_device(Device::Partition(Partition {
            name,
            number,
            region,
            kind,
            id,
            bootable: false,
        }));
        self.add_relation(parent, sid, Relation::Holds);
        Ok(sid)
    }

    pub fn set_partition_id(&mut self, sid: Sid, id: PartitionId) -> Result<(), ProposalError> {
        if let Device::Partition(p) = self.device_mut(sid)? {
            p.id = id;
        }
        Ok(())
    }

    pub fn set_bootable(&mut self, sid: Sid, bootable: bool) -> Result<(), ProposalError> {
        if let Device::Partition(p) = self.device_mut(sid)? {
            p.bootable = bootable;
        }
        Ok(())
    }

    /// Changes the size of a partition, keeping its start.
    pub fn resize_partition(
        &mut self,
        sid: Sid,
        size: ByteCount,
        alignment: &Alignment,
    ) -> Result<(), ProposalError> {
        let part = self
            .existing(sid)?
            .as_partition()
            .ok_or_else(|| ProposalError::internal("resizing something that is not a partition"))?
            .clone();
        let new_region = part.region.with_size(size).ok_or_else(|| {
            ProposalError::new(InfeasibleError::UnsupportedDevice {
                name: part.name.clone(),
                reason: format!("cannot resize to {size}"),
            })
        })?;
        if new_region.size() > part.region.size() {
            let growth = new_region.size() - part.region.size();
            if growth > self.free_after(sid, alignment) {
                return Err(ProposalError::new(NoSpaceError::CannotGrow {
                    name: part.name,
                    size: size.to_string(),
                }));
            }
        }
        trace!("Resizing '{}' to {}", part.name, new_region.size());
        if let Device::Partition(p) = self.device_mut(sid)? {
            p.region = new_region;
        }
        Ok(())
    }

    pub fn create_md(
        &mut self,
        name: &str,
        level: RaidLevel,
        chunk_size: Option<ByteCount>,
        members: &[Sid],
    ) -> Result<Sid, ProposalError> {
        self.ensure_name_free(name)?;
        if members.len() < level.min_members() {
            return Err(ProposalError::new(InfeasibleError::TooFewRaidMembers {
                md: name.to_owned(),
                level: level.to_string(),
                required: level.min_members(),
                found: members.len(),
            }));
        }
        for member in members {
            self.ensure_available(*member)?;
        }
        let member_size = members
            .iter()
            .map(|m| self.size_of(*m).saturating_sub(ByteCount(MD_MEMBER_OVERHEAD)))
            .min()
            .unwrap_or_default();
        let block_size = members
            .iter()
            .filter_map(|m| self.device(*m).and_then(Device::block_size))
            .max()
            .unwrap_or(crate::constants::DEFAULT_BLOCK_SIZE);
        let md = self.add_device(Device::Md(Md {
            name: name.to_owned(),
            level,
            chunk_size,
            size: level.array_size(member_size, members.len()),
            block_size,
            partition_table: None,
        }));
        for member in members {
            self.add_relation(*member, md, Relation::Member);
        }
        Ok(md)
    }

    pub fn create_vg(
        &mut self,
        vg_name: &str,
        extent_size: ByteCount,
        pvs: &[Sid],
    ) -> Result<Sid, ProposalError> {
        let name = format!("/dev/{vg_name}");
        self.ensure_name_free(&name)?;
        if pvs.is_empty() {
            return Err(ProposalError::new(MissingDependencyError::NoPhysicalVolumes {
                vg: vg_name.to_owned(),
            }));
        }
        for pv in pvs {
            self.ensure_available(*pv)?;
        }
        let vg = self.add_device(Device::LvmVg(LvmVg {
            name,
            vg_name: vg_name.to_owned(),
            extent_size,
        }));
        for pv in pvs {
            self.add_relation(*pv, vg, Relation::Member);
        }
        Ok(vg)
    }

    /// Creates a logical volume, rounding its size down to whole extents.
    pub fn create_lv(
        &mut self,
        vg: Sid,
        lv_name: &str,
        size: ByteCount,
        stripes: u32,
    ) -> Result<Sid, ProposalError> {
        let vg_dev = self
            .existing(vg)?
            .as_vg()
            .ok_or_else(|| ProposalError::internal("creating a logical volume outside a VG"))?
            .clone();
        let name = format!("{}/{}", vg_dev.name, lv_name);
        self.ensure_name_free(&name)?;
        let size = size.round_down(vg_dev.extent_size);
        if size.is_zero() {
            return Err(ProposalError::new(InfeasibleError::UnsupportedDevice {
                name,
                reason: "logical volume smaller than one extent".into(),
            }));
        }
        let available = self.vg_free_space(vg);
        if size > available {
            return Err(ProposalError::new(NoSpaceError::VolumeGroupTooSmall {
                vg: vg_dev.vg_name,
                available: available.to_string(),
                needed: size.to_string(),
            }));
        }
        let lv = self.add_device(Device::LvmLv(LvmLv {
            name,
            lv_name: lv_name.to_owned(),
            size,
            stripes: stripes.max(1),
        }));
        self.add_relation(vg, lv, Relation::Holds);
        Ok(lv)
    }

    pub fn create_bcache(
        &mut self,
        name: &str,
        cache_mode: CacheMode,
        backing: Sid,
        caching: Option<Sid>,
    ) -> Result<Sid, ProposalError> {
        self.ensure_name_free(name)?;
        self.ensure_available(backing)?;
        if let Some(caching) = caching {
            // A caching set may serve several bcaches, but must not hold data
            let in_data_use = self
                .inner
                .edges_directed(caching.0, Direction::Outgoing)
                .any(|e| *e.weight() != Relation::Caching);
            if in_data_use {
                return Err(ProposalError::new(InfeasibleError::UnsupportedDevice {
                    name: self.name_of(caching).unwrap_or_default().to_owned(),
                    reason: "caching device is already in use".into(),
                }));
            }
        }
        let block_size = self
            .device(backing)
            .and_then(Device::block_size)
            .unwrap_or(crate::constants::DEFAULT_BLOCK_SIZE);
        let bcache = self.add_device(Device::Bcache(Bcache {
            name: name.to_owned(),
            cache_mode,
            size: self
                .size_of(backing)
                .saturating_sub(ByteCount(BCACHE_BACKING_OVERHEAD)),
            block_size,
            partition_table: None,
        }));
        self.add_relation(backing, bcache, Relation::Member);
        if let Some(caching) = caching {
            self.add_relation(caching, bcache, Relation::Caching);
        }
        Ok(bcache)
    }

    /// Puts a new filesystem on a block device, replacing the existing one.
    pub fn format(
        &mut self,
        sid: Sid,
        fs_type: FilesystemType,
        label: Option<String>,
    ) -> Result<Sid, ProposalError> {
        let device = self.existing(sid)?;
        let name = device.name().unwrap_or_default().to_owned();
        if !device.is_block_device() || !fs_type.is_block() {
            return Err(ProposalError::new(InfeasibleError::UnsupportedDevice {
                name,
                reason: format!("cannot put {} on a {}", fs_type, device.kind()),
            }));
        }
        self.remove_filesystem(sid);
        if self.is_in_use(sid) {
            return Err(ProposalError::new(InfeasibleError::UnsupportedDevice {
                name,
                reason: "the device is in use".into(),
            }));
        }
        trace!("Formatting '{}' as {}", name, fs_type);
        let fs = self.add_device(Device::Filesystem(Filesystem {
            label,
            ..Filesystem::new(fs_type)
        }));
        self.add_relation(sid, fs, Relation::Formats);
        Ok(fs)
    }

    pub fn set_mount_point(
        &mut self,
        fs: Sid,
        mount_point: Option<MountPoint>,
    ) -> Result<(), ProposalError> {
        match self.device_mut(fs)? {
            Device::Filesystem(filesystem) => {
                filesystem.mount_point = mount_point;
                Ok(())
            }
            _ => Err(ProposalError::internal("mount point set on a non filesystem")),
        }
    }

    pub fn create_nfs(&mut self, server: &str, path: &str) -> Sid {
        self.add_device(Device::Filesystem(Filesystem {
            nfs: Some(NfsSource {
                server: server.to_owned(),
                path: path.to_owned(),
            }),
            ..Filesystem::new(FilesystemType::Nfs)
        }))
    }

    /// Removes the filesystem of a block device, if any. Returns whether
    /// there was one.
    pub fn remove_filesystem(&mut self, sid: Sid) -> bool {
        match self.filesystem_of(sid) {
            Some(fs) => {
                self.inner.remove_node(fs.0);
                true
            }
            None => false,
        }
    }

}

impl Display for Devicegraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn describe(graph: &Devicegraph, sid: Sid) -> String {
            match graph.device(sid) {
                Some(Device::Filesystem(fs)) => match (&fs.nfs, fs.mount_path()) {
                    (Some(nfs), mp) => {
                        format!("nfs {}:{} on {}", nfs.server, nfs.path, mp.unwrap_or("-"))
                    }
                    (None, mp) => format!("{} on {}", fs.fs_type, mp.unwrap_or("-")),
                },
                Some(dev) => format!(
                    "{} '{}' ({})",
                    dev.kind(),
                    dev.name().unwrap_or_default(),
                    graph.size_of(sid)
                ),
                None => "?".into(),
            }
        }

        fn walk(
            graph: &Devicegraph,
            sid: Sid,
            depth: usize,
            f: &mut std::fmt::Formatter<'_>,
        ) -> std::fmt::Result {
            writeln!(f, "{:indent$}{}", "", describe(graph, sid), indent = depth * 2)?;
            for child in graph.inner.neighbors_directed(sid.0, Direction::Outgoing) {
                walk(graph, Sid(child), depth + 1, f)?;
            }
            Ok(())
        }

        let roots = self.devices().filter(|(sid, _)| {
            self.inner
                .neighbors_directed(sid.0, Direction::Incoming)
                .next()
                .is_none()
        });
        for (sid, _) in roots {
            walk(self, sid, 0, f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use device::Disk;

    pub(crate) fn disk(graph: &mut Devicegraph, name: &str, size: ByteCount) -> Sid {
        graph.add_device(Device::Disk(Disk {
            name: name.into(),
            size,
            block_size: 512,
            partition_table: None,
            preferred_table: PartitionTableType::Gpt,
        }))
    }

    fn region(start_mib: u64, size_mib: u64) -> Region {
        Region::from_bytes(ByteCount::mib(start_mib), ByteCount::mib(size_mib), 512).unwrap()
    }

    #[test]
    fn test_create_partitions() {
        let mut graph = Devicegraph::new();
        let sda = disk(&mut graph, "/dev/sda", ByteCount::gib(10));

        // No table yet
        let err = graph
            .create_partition(sda, region(1, 100), PartitionKind::Primary, PartitionId::Linux)
            .unwrap_err();
        assert_eq!(err.category(), "infeasible");

        graph
            .create_partition_table(sda, PartitionTableType::Gpt)
            .unwrap();
        let p1 = graph
            .create_partition(sda, region(1, 100), PartitionKind::Primary, PartitionId::Linux)
            .unwrap();
        let p2 = graph
            .create_partition(sda, region(101, 100), PartitionKind::Primary, PartitionId::Swap)
            .unwrap();
        assert_eq!(graph.name_of(p1), Some("/dev/sda1"));
        assert_eq!(graph.name_of(p2), Some("/dev/sda2"));
        assert_eq!(graph.partitions_of(sda), vec![p1, p2]);
        assert_eq!(graph.disk_of(p2), Some(sda));
        assert_eq!(graph.size_of(p1), ByteCount::mib(100));

        // Overlap is rejected
        let err = graph
            .create_partition(sda, region(150, 100), PartitionKind::Primary, PartitionId::Linux)
            .unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::Infeasible(InfeasibleError::Overlap {
                disk: "/dev/sda".into()
            })
        );

        // Extended partitions are MS-DOS only
        let err = graph
            .create_partition(sda, region(300, 100), PartitionKind::Extended, PartitionId::Extended)
            .unwrap_err();
        assert_eq!(err.category(), "infeasible");

        // Table cannot be replaced while partitions exist
        assert!(graph
            .create_partition_table(sda, PartitionTableType::Msdos)
            .is_err());
    }

    #[test]
    fn test_msdos_numbering() {
        let mut graph = Devicegraph::new();
        let sda = disk(&mut graph, "/dev/sda", ByteCount::gib(10));
        graph
            .create_partition_table(sda, PartitionTableType::Msdos)
            .unwrap();
        for i in 0..3 {
            graph
                .create_partition(
                    sda,
                    region(1 + i * 100, 100),
                    PartitionKind::Primary,
                    PartitionId::Linux,
                )
                .unwrap();
        }

        // Logical without extended
        assert!(graph
            .create_partition(sda, region(400, 100), PartitionKind::Logical, PartitionId::Linux)
            .is_err());

        graph
            .create_partition(sda, region(400, 1000), PartitionKind::Extended, PartitionId::Extended)
            .unwrap();
        let l5 = graph
            .create_partition(sda, region(401, 100), PartitionKind::Logical, PartitionId::Linux)
            .unwrap();
        let l6 = graph
            .create_partition(sda, region(502, 100), PartitionKind::Logical, PartitionId::Linux)
            .unwrap();
        assert_eq!(graph.name_of(l5), Some("/dev/sda5"));
        assert_eq!(graph.name_of(l6), Some("/dev/sda6"));

        // All four primary slots are taken
        let err = graph
            .create_partition(sda, region(2000, 100), PartitionKind::Primary, PartitionId::Linux)
            .unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::Infeasible(InfeasibleError::NoPrimarySlot {
                disk: "/dev/sda".into()
            })
        );
    }

    #[test]
    fn test_resize_partition() {
        let alignment = Alignment::default();
        let mut graph = Devicegraph::new();
        let sda = disk(&mut graph, "/dev/sda", ByteCount::gib(1));
        graph
            .create_partition_table(sda, PartitionTableType::Gpt)
            .unwrap();
        let p1 = graph
            .create_partition(sda, region(1, 100), PartitionKind::Primary, PartitionId::Linux)
            .unwrap();
        graph
            .create_partition(sda, region(201, 100), PartitionKind::Primary, PartitionId::Linux)
            .unwrap();
        assert_eq!(graph.free_after(p1, &alignment), ByteCount::mib(100));

        graph
            .resize_partition(p1, ByteCount::mib(50), &alignment)
            .unwrap();
        assert_eq!(graph.size_of(p1), ByteCount::mib(50));
        graph
            .resize_partition(p1, ByteCount::mib(200), &alignment)
            .unwrap();
        let err = graph
            .resize_partition(p1, ByteCount::mib(201), &alignment)
            .unwrap_err();
        assert!(err.is_no_space());
    }

    #[test]
    fn test_lvm_and_raid() {
        let mut graph = Devicegraph::new();
        let sda = disk(&mut graph, "/dev/sda", ByteCount::gib(10));
        let sdb = disk(&mut graph, "/dev/sdb", ByteCount::gib(20));

        let err = graph
            .create_md("/dev/md0", RaidLevel::Raid5, None, &[sda, sdb])
            .unwrap_err();
        assert_eq!(err.category(), "infeasible");

        let md = graph
            .create_md("/dev/md0", RaidLevel::Raid1, None, &[sda, sdb])
            .unwrap();
        assert_eq!(
            graph.size_of(md),
            ByteCount::gib(10) - ByteCount(MD_MEMBER_OVERHEAD)
        );
        assert_eq!(graph.members_of(md), vec![sda, sdb]);
        assert_eq!(graph.disks_of(md), vec![sda, sdb]);

        // Members cannot be reused
        assert!(graph.create_vg("system", ByteCount::mib(4), &[sda]).is_err());

        let vg = graph.create_vg("system", ByteCount::mib(4), &[md]).unwrap();
        let vg_size = graph.vg_size(vg);
        assert_eq!(vg_size, ByteCount::gib(10) - ByteCount::mib(4));

        let lv = graph
            .create_lv(vg, "root", ByteCount::gib(4) + ByteCount(1), 1)
            .unwrap();
        assert_eq!(graph.name_of(lv), Some("/dev/system/root"));
        assert_eq!(graph.size_of(lv), ByteCount::gib(4));
        assert_eq!(graph.vg_free_space(vg), vg_size - ByteCount::gib(4));

        let err = graph.create_lv(vg, "home", ByteCount::gib(8), 1).unwrap_err();
        assert!(err.is_no_space());

        let fs = graph.format(lv, FilesystemType::Ext4, None).unwrap();
        graph
            .set_mount_point(
                fs,
                Some(MountPoint {
                    path: "/".into(),
                    options: vec![],
                }),
            )
            .unwrap();
        assert_eq!(graph.find_filesystem_by_mount_point("/"), Some(fs));
        assert_eq!(graph.disk_of(fs), Some(sda));
        assert!(graph.ancestors(fs).contains(&vg));
        assert!(graph.descendants(sdb).contains(&fs));
    }

    #[test]
    fn test_clone_is_independent() {
        let mut graph = Devicegraph::new();
        let sda = disk(&mut graph, "/dev/sda", ByteCount::gib(10));
        let copy = graph.duplicate();
        graph.format(sda, FilesystemType::Xfs, None).unwrap();
        assert!(graph.filesystem(sda).is_some());
        assert!(copy.filesystem(sda).is_none());
        assert_eq!(copy.find_by_name("/dev/sda"), Some(sda));
    }

    #[test]
    fn test_reformat_replaces_filesystem() {
        let mut graph = Devicegraph::new();
        let sda = disk(&mut graph, "/dev/sda", ByteCount::gib(10));
        graph.format(sda, FilesystemType::Xfs, None).unwrap();
        graph
            .format(sda, FilesystemType::Ext4, Some("data".into()))
            .unwrap();
        let fs = graph.filesystem(sda).unwrap();
        assert_eq!(fs.fs_type, FilesystemType::Ext4);
        assert_eq!(fs.label.as_deref(), Some("data"));
        assert_eq!(graph.children(sda, Relation::Formats).len(), 1);

        // Formatted disks have no free space to offer
        assert!(graph.free_spaces(sda, &Alignment::default()).is_empty());
        assert!(graph.remove_filesystem(sda));
        assert_eq!(graph.free_spaces(sda, &Alignment::default()).len(), 1);
    }
}
