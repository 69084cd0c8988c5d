//! # Devices creator
//!
//! Turns a catalog of planned devices into devices of a devicegraph copy,
//! one category at a time so that members exist before the devices built on
//! top of them:
//!
//! 1. Partitions: reused ones first (shrinking before growing), then the new
//!    ones, placed by the distribution calculator on the given disks.
//! 2. Stray block devices.
//! 3. RAID arrays, out of the devices with a matching RAID role.
//! 4. Bcaches, out of the devices with a matching backing/caching role.
//! 5. Volume groups and their logical volumes, out of the devices with a
//!    matching physical volume role.
//! 6. NFS mounts.
//!
//! In `Strict` mode the first failure aborts the whole population. In
//! `BestEffort` mode failures are recorded as issues and the remaining
//! categories are still processed; sizes that do not fit are also retried
//! once with flexible limits.

use std::collections::BTreeMap;

use log::{debug, info, warn};

use storplan_api::{
    devicegraph::Devicegraph,
    error::{ErrorKind, MissingDependencyError, ProposalError},
    issues::{IssueKind, IssuesList},
    planned::{
        DevicesCollection, MemberRole, PlannedBcache, PlannedDevice, PlannedMd, PlannedPartition,
        PlannedVg,
    },
    primitives::region::Alignment,
};

use super::{
    creators::{
        BcacheCreator, CreatorResult, LvmCreator, MdCreator, NfsCreator, PartitionCreator,
        StrayCreator,
    },
    distribution::DistributionCalculator,
};

/// How failures are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreatorMode {
    /// Any failure aborts. Used by the guided proposal.
    #[default]
    Strict,

    /// Failures become issues and the rest of the devices are still created.
    BestEffort,
}

/// Outcome of populating a devicegraph.
#[derive(Debug, Clone)]
pub struct PopulateResult {
    pub devicegraph: Devicegraph,

    /// Planned device behind every created or reused device, by device name.
    pub devices_map: BTreeMap<String, PlannedDevice>,
    pub issues: IssuesList,

    /// Names of the created devices. Steps come in creation order (members
    /// before the devices built on them); names from one step are sorted.
    pub created: Vec<String>,

    /// Names of the reused devices, ordered like `created`.
    pub reused: Vec<String>,
}

pub struct DevicesCreator<'a> {
    original: &'a Devicegraph,
    mode: CreatorMode,
    alignment: Alignment,
}

/// Running state of one population.
struct Population {
    result: CreatorResult,
    issues: IssuesList,
    created: Vec<String>,
    reused: Vec<String>,
    mode: CreatorMode,
}

impl Population {
    fn graph(&self) -> &Devicegraph {
        &self.result.devicegraph
    }

    /// Merges a step into the running result.
    fn record(&mut self, step: CreatorResult) {
        for (name, planned) in &step.devices_map {
            if self.result.devices_map.contains_key(name) {
                continue;
            }
            if planned.common().is_reuse() {
                self.reused.push(name.clone());
            } else {
                self.created.push(name.clone());
            }
        }
        self.result = self.result.merge(&step);
    }

    /// Records the outcome of a step. In strict mode errors are returned,
    /// otherwise they become issues.
    fn handle(
        &mut self,
        category: &str,
        device: Option<String>,
        step: Result<CreatorResult, ProposalError>,
    ) -> Result<(), ProposalError> {
        match step {
            Ok(step) => {
                self.record(step);
                Ok(())
            }
            Err(e) if self.mode == CreatorMode::Strict => Err(e),
            Err(e) => {
                let kind = issue_for(category, &e);
                warn!(
                    "{kind}{}",
                    device
                        .as_ref()
                        .map(|d| format!(" ('{d}')"))
                        .unwrap_or_default()
                );
                debug!("Issue caused by: {e:?}");
                self.issues.add(kind, device);
                Ok(())
            }
        }
    }

    /// Names of the devices already playing `role`.
    fn members(&self, role: &MemberRole) -> Vec<String> {
        self.result.created_names(|d| d.role() == Some(role))
    }
}

/// Maps a failure in a category to the issue reported for it.
fn issue_for(category: &str, error: &ProposalError) -> IssueKind {
    match error.kind() {
        ErrorKind::MissingDependency(MissingDependencyError::NoPhysicalVolumes { vg }) => {
            IssueKind::NoPhysicalVolumes { vg: vg.clone() }
        }
        ErrorKind::MissingDependency(MissingDependencyError::NoRaidMembers { md }) => {
            IssueKind::MissingRaidMembers { md: md.clone() }
        }
        ErrorKind::MissingDependency(MissingDependencyError::NoBcacheBacking { bcache }) => {
            IssueKind::MissingBcacheBacking {
                bcache: bcache.clone(),
            }
        }
        ErrorKind::MissingDependency(MissingDependencyError::ReuseTargetNotFound { name }) => {
            IssueKind::MissingReusableDevice { name: name.clone() }
        }
        ErrorKind::NoSpace(_) => IssueKind::NoDiskSpace {
            category: category.to_owned(),
        },
        _ => IssueKind::CouldNotCreate {
            category: category.to_owned(),
            reason: error.to_string(),
        },
    }
}

impl<'a> DevicesCreator<'a> {
    pub fn new(original: &'a Devicegraph, mode: CreatorMode, alignment: Alignment) -> Self {
        Self {
            original,
            mode,
            alignment,
        }
    }

    fn flexible(&self) -> bool {
        self.mode == CreatorMode::BestEffort
    }

    /// Creates every device of `catalog` on a copy of the original
    /// devicegraph. New partitions only go to the disks in `disk_names`.
    pub fn populated_devicegraph(
        &self,
        catalog: &DevicesCollection,
        disk_names: &[String],
    ) -> Result<PopulateResult, ProposalError> {
        debug!("Populating devicegraph on {disk_names:?} ({:?} mode)", self.mode);
        let mut population = Population {
            result: CreatorResult::unchanged(self.original.duplicate()),
            issues: IssuesList::new(),
            created: Vec::new(),
            reused: Vec::new(),
            mode: self.mode,
        };

        self.process_partitions(&mut population, catalog, disk_names)?;
        for stray in catalog.strays() {
            let step = StrayCreator::new(population.graph()).reuse_stray(stray);
            population.handle("stray block devices", Some(stray.name.clone()), step)?;
        }
        for md in catalog.mds() {
            let step = self.process_md(&population, md);
            population.handle("RAID devices", Some(md.name.clone()), step)?;
        }
        for bcache in catalog.bcaches() {
            let step = self.process_bcache(&population, bcache);
            population.handle("bcache devices", Some(bcache.name.clone()), step)?;
        }
        for vg in catalog.vgs() {
            let step = self.process_vg(&population, vg);
            population.handle("volume groups", Some(vg.name.clone()), step)?;
        }
        for nfs in catalog.nfs() {
            let step = NfsCreator::new(population.graph()).create_nfs(nfs);
            population.handle("NFS filesystems", None, step)?;
        }

        info!(
            "Populated devicegraph: {} created, {} reused, {} issue(s)",
            population.created.len(),
            population.reused.len(),
            population.issues.len()
        );
        Ok(PopulateResult {
            devicegraph: population.result.devicegraph,
            devices_map: population.result.devices_map,
            issues: population.issues,
            created: population.created,
            reused: population.reused,
        })
    }

    fn process_partitions(
        &self,
        population: &mut Population,
        catalog: &DevicesCollection,
        disk_names: &[String],
    ) -> Result<(), ProposalError> {
        let mut to_reuse = Vec::new();
        let mut to_create = Vec::new();
        for planned in catalog.partitions() {
            let id = planned.common.id.clone();
            match self.resolve_percent(planned) {
                Ok(resolved) if resolved.common.is_reuse() => to_reuse.push(resolved),
                Ok(resolved) => to_create.push(resolved),
                Err(e) => population.handle("partitions", id, Err(e))?,
            }
        }

        // Shrinking first frees the space growing partitions may need
        let graph = population.graph();
        let (shrinking, growing): (Vec<_>, Vec<_>) = to_reuse.into_iter().partition(|p| {
            p.common
                .reuse_name
                .as_deref()
                .and_then(|name| graph.find_by_name(name))
                .is_some_and(|sid| p.shrinks(graph.size_of(sid)))
        });
        for planned in shrinking.iter().chain(&growing) {
            let step =
                PartitionCreator::new(population.graph(), self.alignment).reuse_partition(planned);
            population.handle("partitions", planned.common.reuse_name.clone(), step)?;
        }

        if to_create.is_empty() {
            return Ok(());
        }
        let step = self.create_partitions(population.graph(), &to_create, disk_names);
        population.handle("partitions", None, step)
    }

    fn resolve_percent(&self, planned: &PlannedPartition) -> Result<PlannedPartition, ProposalError> {
        let (Some(_), Some(disk)) = (planned.percent_size, planned.disk.as_deref()) else {
            return Ok(planned.clone());
        };
        let sid = self.original.find_by_name(disk).ok_or_else(|| {
            ProposalError::new(MissingDependencyError::DiskNotFound {
                name: disk.to_owned(),
            })
        })?;
        Ok(planned.with_resolved_percent(self.original.size_of(sid)))
    }

    fn create_partitions(
        &self,
        devicegraph: &Devicegraph,
        planned: &[PlannedPartition],
        disk_names: &[String],
    ) -> Result<CreatorResult, ProposalError> {
        let spaces: Vec<_> = devicegraph
            .disks()
            .into_iter()
            .filter(|disk| {
                devicegraph
                    .name_of(*disk)
                    .is_some_and(|name| disk_names.iter().any(|n| n == name))
            })
            .flat_map(|disk| devicegraph.free_spaces(disk, &self.alignment))
            .collect();
        debug!("Placing {} partition(s) in {} free space(s)", planned.len(), spaces.len());

        let mut distribution =
            DistributionCalculator::new(planned, &spaces, self.alignment).distribution();
        if distribution.is_err() && self.flexible() {
            warn!("Partitions do not fit, retrying with flexible sizes");
            let flexible: Vec<PlannedPartition> = planned
                .iter()
                .map(|p| PlannedPartition {
                    common: p.common.flexible(),
                    ..p.clone()
                })
                .collect();
            distribution =
                DistributionCalculator::new(&flexible, &spaces, self.alignment).distribution();
        }
        let distribution = distribution?;
        debug!("Partitions distribution:\n{distribution}");
        PartitionCreator::new(devicegraph, self.alignment).create_partitions(&distribution)
    }

    fn process_md(
        &self,
        population: &Population,
        md: &PlannedMd,
    ) -> Result<CreatorResult, ProposalError> {
        let creator = MdCreator::new(population.graph(), self.alignment, self.flexible());
        if md.common.is_reuse() {
            return creator.reuse_md(md);
        }
        let members = population.members(&MemberRole::Raid(md.name.clone()));
        if members.is_empty() {
            return Err(ProposalError::new(MissingDependencyError::NoRaidMembers {
                md: md.name.clone(),
            }));
        }
        creator.create_md(md, &members)
    }

    fn process_bcache(
        &self,
        population: &Population,
        bcache: &PlannedBcache,
    ) -> Result<CreatorResult, ProposalError> {
        let creator = BcacheCreator::new(population.graph(), self.alignment, self.flexible());
        if bcache.common.is_reuse() {
            return creator.reuse_bcache(bcache);
        }
        let backing = population
            .members(&MemberRole::BcacheBacking(bcache.name.clone()))
            .into_iter()
            .next()
            .ok_or_else(|| {
                ProposalError::new(MissingDependencyError::NoBcacheBacking {
                    bcache: bcache.name.clone(),
                })
            })?;
        let caching = population
            .members(&MemberRole::BcacheCaching(bcache.name.clone()))
            .into_iter()
            .next();
        creator.create_bcache(bcache, &backing, caching.as_deref())
    }

    fn process_vg(
        &self,
        population: &Population,
        vg: &PlannedVg,
    ) -> Result<CreatorResult, ProposalError> {
        let creator = LvmCreator::new(population.graph(), self.flexible());
        if vg.common.is_reuse() {
            return creator.reuse_volumes(vg);
        }
        let pvs = population.members(&MemberRole::PhysicalVolume(vg.name.clone()));
        if pvs.is_empty() {
            return Err(ProposalError::new(MissingDependencyError::NoPhysicalVolumes {
                vg: vg.name.clone(),
            }));
        }
        creator.create_volumes(vg, &pvs)
    }
}
