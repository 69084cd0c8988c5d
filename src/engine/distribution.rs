//! # Distribution calculator
//!
//! Assigns the planned partitions to the free spaces of the candidate disks.
//! Every complete assignment is checked against the partition table limits
//! of its disks and scored; the cheapest one wins.

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
};

use log::{debug, trace};

use storplan_api::{
    devicegraph::free_space::FreeDiskSpace,
    error::{InfeasibleError, NoSpaceError, ProposalError},
    planned::PlannedPartition,
    primitives::region::Alignment,
    ByteCount,
};
use sysdefs::partition_tables::PartitionKind;

/// Complete assignments evaluated before the search settles for the best one
/// found so far.
const MAX_EVALUATED_LEAVES: usize = 200_000;

/// A sizing input: the part of a planned device `distribute_space` needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimits {
    pub min: ByteCount,
    pub desired: ByteCount,
    pub max: ByteCount,
    pub weight: u64,
}

impl From<&storplan_api::planned::CommonAttrs> for SizeLimits {
    fn from(common: &storplan_api::planned::CommonAttrs) -> Self {
        Self {
            min: common.min_size,
            desired: common.desired(),
            max: common.max_size,
            weight: common.weight,
        }
    }
}

/// Splits `available` bytes among devices with the given limits.
///
/// Each device pays `overhead` bytes in front of it. Sizes are multiples of
/// `grain` and never below the minimum rounded up to the grain. Returns
/// `None` when the minimums do not fit.
pub fn distribute_space(
    devices: &[SizeLimits],
    available: ByteCount,
    grain: ByteCount,
    overhead: ByteCount,
) -> Option<Vec<ByteCount>> {
    if devices.is_empty() {
        return Some(Vec::new());
    }
    let grain = if grain.is_zero() { ByteCount(1) } else { grain };
    let overhead_total = overhead.bytes().checked_mul(devices.len() as u64)?;
    let usable = available.bytes().checked_sub(overhead_total)?;

    let floors: Vec<u64> = devices
        .iter()
        .map(|d| d.min.round_up(grain).max(grain).bytes())
        .collect();
    let maxima: Vec<u64> = devices
        .iter()
        .zip(&floors)
        .map(|(d, floor)| {
            if d.max.is_unlimited() {
                u64::MAX
            } else {
                d.max.round_down(grain).bytes().max(*floor)
            }
        })
        .collect();
    let desired: Vec<u64> = devices
        .iter()
        .enumerate()
        .map(|(i, d)| d.desired.round_down(grain).bytes().clamp(floors[i], maxima[i]))
        .collect();

    let floor_total: u128 = floors.iter().map(|f| *f as u128).sum();
    if floor_total > usable as u128 {
        return None;
    }
    let desired_total: u128 = desired.iter().map(|d| *d as u128).sum();
    let at_desired = desired_total <= usable as u128;
    let mut sizes = if at_desired { desired } else { floors.clone() };
    let used: u64 = sizes.iter().sum();
    let mut slack = usable - used;

    let weighted = devices.iter().any(|d| d.weight > 0);
    if weighted {
        loop {
            let active: Vec<usize> = (0..devices.len())
                .filter(|i| devices[*i].weight > 0 && sizes[*i] < maxima[*i])
                .collect();
            if active.is_empty() || slack < grain.bytes() {
                break;
            }
            let total_weight: u128 = active.iter().map(|i| devices[*i].weight as u128).sum();
            let mut granted = 0;
            for i in active {
                let share = (slack as u128 * devices[i].weight as u128 / total_weight) as u64;
                let share = ByteCount(share).round_down(grain).bytes();
                let grant = share.min(maxima[i] - sizes[i]);
                sizes[i] += grant;
                granted += grant;
            }
            slack -= granted;
            if granted == 0 {
                break;
            }
        }

        // Whole grains left by rounding go to the heaviest devices first
        let mut by_weight: Vec<usize> = (0..devices.len())
            .filter(|i| devices[*i].weight > 0)
            .collect();
        by_weight.sort_by_key(|i| std::cmp::Reverse(devices[*i].weight));
        for i in by_weight {
            let grant = ByteCount(slack)
                .round_down(grain)
                .bytes()
                .min(maxima[i] - sizes[i]);
            sizes[i] += grant;
            slack -= grant;
        }

        // The tail below one grain (unaligned space end) goes to the last device
        let last = devices.len() - 1;
        if slack > 0
            && devices[last].weight > 0
            && ByteCount(sizes[last] + slack) <= devices[last].max
        {
            sizes[last] += slack;
        }
    } else if !at_desired {
        let gaps: Vec<u64> = sizes
            .iter()
            .enumerate()
            .map(|(i, size)| {
                let target = devices[i]
                    .desired
                    .round_down(grain)
                    .bytes()
                    .clamp(floors[i], maxima[i]);
                target - size
            })
            .collect();
        let total_gap: u128 = gaps.iter().map(|g| *g as u128).sum();
        if total_gap > 0 {
            for (i, gap) in gaps.iter().enumerate() {
                let share = (slack as u128 * *gap as u128 / total_gap) as u64;
                sizes[i] += ByteCount(share).round_down(grain).bytes().min(*gap);
            }
        }
    }

    let total: u128 = sizes.iter().map(|s| *s as u128).sum();
    (total <= usable as u128).then(|| sizes.into_iter().map(ByteCount).collect())
}

/// A planned partition with the size it gets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedPartition {
    pub planned: PlannedPartition,
    pub size: ByteCount,
}

/// A free space with the partitions placed in it, in on-disk order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedSpace {
    pub space: FreeDiskSpace,

    /// `Primary`, `Logical` for spaces inside an existing extended partition,
    /// or `Extended` when a new extended partition covering the whole space
    /// must be created first.
    pub kind: PartitionKind,
    pub partitions: Vec<AssignedPartition>,
}

impl AssignedSpace {
    /// Whether the partitions of this space are logical ones.
    pub fn holds_logicals(&self) -> bool {
        self.kind != PartitionKind::Primary
    }

    pub fn used(&self, grain: ByteCount) -> ByteCount {
        let overhead = if self.holds_logicals() {
            ByteCount(grain.bytes() * self.partitions.len() as u64)
        } else {
            ByteCount::ZERO
        };
        self.partitions.iter().map(|p| p.size).sum::<ByteCount>() + overhead
    }

    /// Bytes of the space left unused.
    pub fn gap(&self, grain: ByteCount) -> ByteCount {
        self.space.size().saturating_sub(self.used(grain))
    }
}

/// Assignment of every planned partition to a free space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionsDistribution {
    pub spaces: Vec<AssignedSpace>,
    grain: ByteCount,
}

impl PartitionsDistribution {
    pub fn partitions(&self) -> impl Iterator<Item = &AssignedPartition> {
        self.spaces.iter().flat_map(|s| s.partitions.iter())
    }

    pub fn gap(&self) -> ByteCount {
        self.spaces.iter().map(|s| s.gap(self.grain)).sum()
    }

    pub fn disk_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .spaces
            .iter()
            .map(|s| s.space.disk_name.as_str())
            .collect();
        names.dedup();
        names
    }
}

impl Display for PartitionsDistribution {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for space in &self.spaces {
            writeln!(
                f,
                "{} {} ({:?}):",
                space.space.disk_name, space.space.region, space.kind
            )?;
            for part in &space.partitions {
                writeln!(
                    f,
                    "  {} -> {}",
                    part.planned.common.id.as_deref().unwrap_or("?"),
                    part.size
                )?;
            }
        }
        Ok(())
    }
}

/// Lexicographic cost of a complete assignment, lower is better.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Cost {
    gap: ByteCount,
    disks: usize,
    spaces_with_gap: usize,
    used_spaces: usize,
    key: Vec<usize>,
}

pub struct DistributionCalculator<'a> {
    planned: Vec<&'a PlannedPartition>,
    spaces: &'a [FreeDiskSpace],
    alignment: Alignment,
}

struct Search {
    best: Option<(Cost, PartitionsDistribution)>,
    leaves: usize,
}

impl<'a> DistributionCalculator<'a> {
    /// Primary-only partitions are placed first; the rest keep catalog order.
    pub fn new(
        planned: &'a [PlannedPartition],
        spaces: &'a [FreeDiskSpace],
        alignment: Alignment,
    ) -> Self {
        let (mut ordered, rest): (Vec<_>, Vec<_>) = planned.iter().partition(|p| p.primary);
        ordered.extend(rest);
        Self {
            planned: ordered,
            spaces,
            alignment,
        }
    }

    fn grain(&self) -> ByteCount {
        self.alignment.grain
    }

    fn floor(&self, planned: &PlannedPartition) -> ByteCount {
        planned.common.min_size.round_up(self.grain()).max(self.grain())
    }

    /// Whether `space` could hold `planned` if partition slots were no concern.
    fn fits(&self, planned: &PlannedPartition, space: &FreeDiskSpace) -> bool {
        if let Some(disk) = &planned.disk {
            if *disk != space.disk_name {
                return false;
            }
        }
        if let Some(offset) = planned.max_start_offset {
            if space.start_offset() > offset {
                return false;
            }
        }
        let overhead = if space.is_logical() {
            self.grain()
        } else {
            ByteCount::ZERO
        };
        self.floor(planned) + overhead <= space.size()
    }

    fn admissible(&self, planned: &PlannedPartition, space: &FreeDiskSpace) -> bool {
        if planned.primary && (space.is_logical() || !space.primary_possible) {
            return false;
        }
        self.fits(planned, space)
    }

    /// Like [`Self::best_distribution`], but tells why there is none.
    pub fn distribution(&self) -> Result<PartitionsDistribution, ProposalError> {
        self.best_distribution().ok_or_else(|| match self.slot_failure() {
            Some(infeasible) => ProposalError::new(infeasible),
            None => ProposalError::new(NoSpaceError::NoDistribution),
        })
    }

    /// Partition table limit that rules out every distribution, if any.
    ///
    /// `None` means the planned partitions are too big, or that the search
    /// failed for a reason the slot counts alone do not show.
    pub fn slot_failure(&self) -> Option<InfeasibleError> {
        // Big enough somewhere, but only where no primary slot is left
        for planned in &self.planned {
            let mut fitting = self.spaces.iter().filter(|s| self.fits(planned, s));
            if let Some(space) = fitting.next() {
                if !self.admissible(planned, space) && !fitting.any(|s| self.admissible(planned, s))
                {
                    return Some(InfeasibleError::NoPrimarySlot {
                        disk: space.disk_name.clone(),
                    });
                }
            }
        }

        // Partitions that can only go to one disk, (all, primary-only)
        let mut per_disk: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        for planned in &self.planned {
            let mut disks = self
                .spaces
                .iter()
                .filter(|s| self.admissible(planned, s))
                .map(|s| s.disk_name.as_str());
            let Some(first) = disks.next() else {
                continue;
            };
            if disks.all(|disk| disk == first) {
                let counts = per_disk.entry(first).or_default();
                counts.0 += 1;
                if planned.primary {
                    counts.1 += 1;
                }
            }
        }

        for (disk, (all, primary_only)) in per_disk {
            let spaces: Vec<&FreeDiskSpace> =
                self.spaces.iter().filter(|s| s.disk_name == disk).collect();
            let Some(first) = spaces.first() else {
                continue;
            };
            let primary = first.free_primary_slots as usize;
            let logical = first.free_logical_slots as usize;
            if primary_only > primary {
                return Some(InfeasibleError::NoPrimarySlot { disk: disk.to_owned() });
            }

            let inside_extended = spaces.iter().any(|s| s.is_logical());
            let capacity = if inside_extended {
                primary + logical
            } else if first.extended_possible {
                primary.max(primary.saturating_sub(1) + logical)
            } else {
                primary
            };
            if all > capacity {
                let infeasible = if inside_extended || first.extended_possible {
                    InfeasibleError::NoLogicalSlot { disk: disk.to_owned() }
                } else {
                    InfeasibleError::NoPrimarySlot { disk: disk.to_owned() }
                };
                return Some(infeasible);
            }
        }
        None
    }

    /// Finds the best distribution, or `None` when there is none.
    pub fn best_distribution(&self) -> Option<PartitionsDistribution> {
        if self.planned.is_empty() {
            return Some(PartitionsDistribution {
                spaces: Vec::new(),
                grain: self.grain(),
            });
        }
        let candidates: Vec<Vec<usize>> = self
            .planned
            .iter()
            .map(|p| {
                (0..self.spaces.len())
                    .filter(|s| self.admissible(p, &self.spaces[*s]))
                    .collect()
            })
            .collect();
        if let Some(index) = candidates.iter().position(Vec::is_empty) {
            debug!(
                "No free space can hold planned partition '{}'",
                self.planned[index].common.id.as_deref().unwrap_or("?")
            );
            return None;
        }

        let mut search = Search {
            best: None,
            leaves: 0,
        };
        let mut assignment = Vec::with_capacity(self.planned.len());
        let mut used = vec![ByteCount::ZERO; self.spaces.len()];
        self.explore(&candidates, &mut assignment, &mut used, &mut search);
        if search.leaves >= MAX_EVALUATED_LEAVES {
            debug!("Distribution search stopped after {} assignments", search.leaves);
        }
        trace!("Evaluated {} complete assignments", search.leaves);
        search.best.map(|(cost, distribution)| {
            debug!("Best distribution (gap {}):\n{}", cost.gap, distribution);
            distribution
        })
    }

    fn explore(
        &self,
        candidates: &[Vec<usize>],
        assignment: &mut Vec<usize>,
        used: &mut [ByteCount],
        search: &mut Search,
    ) {
        if search.leaves >= MAX_EVALUATED_LEAVES {
            return;
        }
        let index = assignment.len();
        if index == self.planned.len() {
            search.leaves += 1;
            if let Some((cost, distribution)) = self.evaluate(assignment) {
                if search.best.as_ref().map_or(true, |(best, _)| cost < *best) {
                    search.best = Some((cost, distribution));
                }
            }
            return;
        }

        let planned = self.planned[index];
        for &space in &candidates[index] {
            let overhead = if self.spaces[space].is_logical() {
                self.grain()
            } else {
                ByteCount::ZERO
            };
            let needed = used[space] + self.floor(planned) + overhead;
            if needed > self.spaces[space].size() {
                continue;
            }
            let previous = used[space];
            used[space] = needed;
            assignment.push(space);
            self.explore(candidates, assignment, used, search);
            assignment.pop();
            used[space] = previous;
        }
    }

    /// Decides the kind of every used space, sizes the partitions and
    /// scores the result.
    fn evaluate(&self, assignment: &[usize]) -> Option<(Cost, PartitionsDistribution)> {
        // Planned partitions per space, in placement order
        let mut per_space: BTreeMap<usize, Vec<&PlannedPartition>> = BTreeMap::new();
        for (planned, space) in self.planned.iter().zip(assignment) {
            per_space.entry(*space).or_default().push(*planned);
        }
        for members in per_space.values_mut() {
            members.sort_by_key(|p| p.max_start_offset.is_none());
        }

        let kinds = self.space_kinds(&per_space)?;

        let mut spaces = Vec::with_capacity(per_space.len());
        for (index, members) in per_space {
            let space = &self.spaces[index];
            let kind = kinds[&index];
            let overhead = if kind == PartitionKind::Primary {
                ByteCount::ZERO
            } else {
                self.grain()
            };
            let limits: Vec<SizeLimits> = members.iter().map(|p| (&p.common).into()).collect();
            let sizes = distribute_space(&limits, space.size(), self.grain(), overhead)?;

            let mut offset = space.start_offset();
            let mut partitions = Vec::with_capacity(members.len());
            for (planned, size) in members.into_iter().zip(sizes) {
                offset = offset + overhead;
                if let Some(max_start) = planned.max_start_offset {
                    if offset > max_start {
                        return None;
                    }
                }
                offset = offset + size;
                partitions.push(AssignedPartition {
                    planned: planned.clone(),
                    size,
                });
            }
            spaces.push(AssignedSpace {
                space: space.clone(),
                kind,
                partitions,
            });
        }

        let distribution = PartitionsDistribution {
            spaces,
            grain: self.grain(),
        };
        let cost = Cost {
            gap: distribution.gap(),
            disks: distribution.disk_names().len(),
            spaces_with_gap: distribution
                .spaces
                .iter()
                .filter(|s| s.gap(self.grain()) >= self.grain())
                .count(),
            used_spaces: distribution.spaces.len(),
            key: assignment.to_vec(),
        };
        Some((cost, distribution))
    }

    /// Kind of each used space, or `None` when some disk cannot hold the
    /// assigned partitions.
    fn space_kinds(
        &self,
        per_space: &BTreeMap<usize, Vec<&PlannedPartition>>,
    ) -> Option<BTreeMap<usize, PartitionKind>> {
        let mut kinds = BTreeMap::new();
        let mut per_disk: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for index in per_space.keys() {
            per_disk
                .entry(self.spaces[*index].disk_name.as_str())
                .or_default()
                .push(*index);
        }

        for indexes in per_disk.values() {
            let first = &self.spaces[indexes[0]];
            let (logical, primary): (Vec<usize>, Vec<usize>) = indexes
                .iter()
                .copied()
                .partition(|i| self.spaces[*i].is_logical());

            let logical_count: usize = logical.iter().map(|i| per_space[i].len()).sum();
            if logical_count > first.free_logical_slots as usize {
                return None;
            }
            for index in &logical {
                kinds.insert(*index, PartitionKind::Logical);
            }

            let primary_count: usize = primary.iter().map(|i| per_space[i].len()).sum();
            if primary_count <= first.free_primary_slots as usize {
                for index in &primary {
                    kinds.insert(*index, PartitionKind::Primary);
                }
                continue;
            }

            // Too many partitions for the primary slots: one space becomes an
            // extended partition holding logical ones
            if !first.extended_possible || !logical.is_empty() {
                return None;
            }
            let extended = primary
                .iter()
                .copied()
                .filter(|i| per_space[i].iter().all(|p| !p.primary))
                .max_by_key(|i| (per_space[i].len(), std::cmp::Reverse(*i)))?;
            let remaining = primary_count - per_space[&extended].len();
            if remaining + 1 > first.free_primary_slots as usize
                || per_space[&extended].len() > first.free_logical_slots as usize
            {
                return None;
            }
            for index in &primary {
                let kind = if *index == extended {
                    PartitionKind::Extended
                } else {
                    PartitionKind::Primary
                };
                kinds.insert(*index, kind);
            }
        }
        Some(kinds)
    }
}
