use serde::Serialize;

use sysdefs::partition_tables::{PartitionKind, PartitionTableType};

use crate::primitives::{
    bytes::ByteCount,
    region::{Alignment, Region},
};

use super::{device::Partition, Sid};

/// Bytes kept free at the start of a partitionable device for the table
/// itself.
const TABLE_HEADER_RESERVE: ByteCount = ByteCount::mib(1);

/// Level of the partition table a free space belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotKind {
    /// Outside any extended partition.
    Primary,

    /// Inside an existing extended partition.
    Logical,
}

/// An unused region of a partitionable device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeDiskSpace {
    #[serde(skip)]
    pub disk: Sid,
    pub disk_name: String,

    /// Aligned free region.
    pub region: Region,
    pub slot: SlotKind,

    /// Table the space belongs to, or the one that will be created.
    pub table: PartitionTableType,

    /// Whether the device has no partition table yet.
    pub needs_table: bool,

    pub primary_possible: bool,
    pub extended_possible: bool,
    pub logical_possible: bool,
    pub free_primary_slots: u32,
    pub free_logical_slots: u32,
}

impl FreeDiskSpace {
    pub fn size(&self) -> ByteCount {
        self.region.size()
    }

    pub fn start_offset(&self) -> ByteCount {
        self.region.start_offset()
    }

    /// Whether partitions created here end up inside an extended partition.
    pub fn is_logical(&self) -> bool {
        self.slot == SlotKind::Logical
    }
}

/// Returns the byte range `[start, end)` partitions can use on a device of
/// `size` bytes.
pub(crate) fn usable_area(
    size: ByteCount,
    table: PartitionTableType,
    grain: ByteCount,
) -> (ByteCount, ByteCount) {
    let start = TABLE_HEADER_RESERVE.max(grain).round_up(grain);
    let end = size.saturating_sub(ByteCount(table.end_overhead()));
    (start, end)
}

/// Gaps between the `occupied` regions inside `[start, end)`.
fn gaps(
    start: ByteCount,
    end: ByteCount,
    occupied: &[Region],
) -> Vec<(ByteCount, ByteCount)> {
    let mut result = Vec::new();
    let mut cursor = start;
    for region in occupied {
        let region_start = region.start_offset();
        if region_start > cursor {
            result.push((cursor, region_start.min(end)));
        }
        cursor = cursor.max(region.end_offset());
    }
    if end > cursor {
        result.push((cursor, end));
    }
    result.retain(|(s, e)| e > s);
    result
}

pub(crate) struct PartitionableInfo<'a> {
    pub sid: Sid,
    pub name: &'a str,
    pub size: ByteCount,
    pub block_size: u64,
    pub table: Option<PartitionTableType>,
    pub preferred_table: PartitionTableType,
}

/// Computes the free spaces of a partitionable device holding `partitions`.
pub(crate) fn compute_free_spaces(
    device: &PartitionableInfo,
    partitions: &[&Partition],
    alignment: &Alignment,
) -> Vec<FreeDiskSpace> {
    let table = device.table.unwrap_or(device.preferred_table);
    let (usable_start, usable_end) = usable_area(device.size, table, alignment.grain);

    let mut top_level: Vec<Region> = partitions
        .iter()
        .filter(|p| p.kind != PartitionKind::Logical)
        .map(|p| p.region)
        .collect();
    top_level.sort();
    let mut logicals: Vec<Region> = partitions
        .iter()
        .filter(|p| p.kind == PartitionKind::Logical)
        .map(|p| p.region)
        .collect();
    logicals.sort();
    let extended = partitions
        .iter()
        .find(|p| p.kind == PartitionKind::Extended)
        .map(|p| p.region);

    let used_primary = top_level.len() as u32;
    let free_primary_slots = table.max_primary().saturating_sub(used_primary);
    let free_logical_slots = match extended {
        Some(_) => table.max_logical().saturating_sub(logicals.len() as u32),
        None => table.max_logical(),
    };
    let extended_possible =
        table.extended_possible() && extended.is_none() && free_primary_slots > 0;

    let space = |start: ByteCount, end: ByteCount, slot: SlotKind| -> Option<FreeDiskSpace> {
        let region = Region::from_bytes(start, end - start, device.block_size)?
            .align(alignment.grain, alignment.policy)?;
        let logical = slot == SlotKind::Logical;
        // A logical gap must hold more than its own EBR
        if logical && region.size() <= alignment.grain {
            return None;
        }
        Some(FreeDiskSpace {
            disk: device.sid,
            disk_name: device.name.to_owned(),
            region,
            slot,
            table,
            needs_table: device.table.is_none(),
            primary_possible: !logical && free_primary_slots > 0,
            extended_possible: !logical && extended_possible,
            logical_possible: if logical {
                free_logical_slots > 0
            } else {
                extended_possible
            },
            free_primary_slots,
            free_logical_slots,
        })
    };

    let mut result: Vec<FreeDiskSpace> = gaps(usable_start, usable_end, &top_level)
        .into_iter()
        .filter_map(|(s, e)| space(s, e, SlotKind::Primary))
        .collect();

    if let Some(ext) = extended {
        result.extend(
            gaps(ext.start_offset(), ext.end_offset(), &logicals)
                .into_iter()
                .filter_map(|(s, e)| space(s, e, SlotKind::Logical)),
        );
    }

    result.sort_by_key(|s| s.region.start);
    result
}

#[cfg(test)]
mod tests {
    use petgraph::stable_graph::NodeIndex;
    use sysdefs::partition_ids::PartitionId;

    use super::*;

    fn partition(number: u32, start_mib: u64, size_mib: u64, kind: PartitionKind) -> Partition {
        Partition {
            name: format!("/dev/sda{number}"),
            number,
            region: Region::from_bytes(ByteCount::mib(start_mib), ByteCount::mib(size_mib), 512)
                .unwrap(),
            kind,
            id: PartitionId::Linux,
            bootable: false,
        }
    }

    fn info(table: Option<PartitionTableType>) -> PartitionableInfo<'static> {
        PartitionableInfo {
            sid: Sid(NodeIndex::new(0)),
            name: "/dev/sda",
            size: ByteCount::gib(10),
            block_size: 512,
            table,
            preferred_table: PartitionTableType::Gpt,
        }
    }

    #[test]
    fn test_empty_disk() {
        let spaces = compute_free_spaces(&info(None), &[], &Alignment::default());
        assert_eq!(spaces.len(), 1);
        let space = &spaces[0];
        assert!(space.needs_table);
        assert_eq!(space.table, PartitionTableType::Gpt);
        assert_eq!(space.start_offset(), ByteCount::mib(1));
        // The GPT backup header takes the last MiB after alignment
        assert_eq!(space.size(), ByteCount::gib(10) - ByteCount::mib(2));
        assert!(space.primary_possible);
        assert!(!space.extended_possible);
    }

    #[test]
    fn test_gaps_between_partitions() {
        let p1 = partition(1, 1, 1024, PartitionKind::Primary);
        let p2 = partition(2, 2048, 1024, PartitionKind::Primary);
        let spaces = compute_free_spaces(
            &info(Some(PartitionTableType::Gpt)),
            &[&p1, &p2],
            &Alignment::default(),
        );
        assert_eq!(spaces.len(), 2);
        assert_eq!(spaces[0].start_offset(), ByteCount::mib(1025));
        assert_eq!(spaces[0].size(), ByteCount::mib(1023));
        assert_eq!(spaces[1].start_offset(), ByteCount::mib(3072));
        assert_eq!(spaces[0].free_primary_slots, 126);
    }

    #[test]
    fn test_msdos_slots() {
        let p1 = partition(1, 1, 1024, PartitionKind::Primary);
        let ext = partition(2, 1025, 4096, PartitionKind::Extended);
        let l5 = partition(5, 1026, 1023, PartitionKind::Logical);
        let spaces = compute_free_spaces(
            &info(Some(PartitionTableType::Msdos)),
            &[&p1, &ext, &l5],
            &Alignment::default(),
        );

        let logical: Vec<_> = spaces.iter().filter(|s| s.is_logical()).collect();
        assert_eq!(logical.len(), 1);
        assert_eq!(logical[0].start_offset(), ByteCount::mib(2049));
        assert!(logical[0].logical_possible);
        assert!(!logical[0].primary_possible);
        assert_eq!(logical[0].free_logical_slots, 250);

        let primary: Vec<_> = spaces.iter().filter(|s| !s.is_logical()).collect();
        assert_eq!(primary.len(), 1);
        assert!(primary[0].primary_possible);
        assert!(!primary[0].extended_possible);
        assert_eq!(primary[0].free_primary_slots, 2);
    }

    #[test]
    fn test_full_msdos_table() {
        let parts: Vec<Partition> = (1..=4)
            .map(|n| partition(n, 1 + (n as u64 - 1) * 1024, 512, PartitionKind::Primary))
            .collect();
        let refs: Vec<&Partition> = parts.iter().collect();
        let spaces = compute_free_spaces(
            &info(Some(PartitionTableType::Msdos)),
            &refs,
            &Alignment::default(),
        );
        assert!(!spaces.is_empty());
        assert!(spaces
            .iter()
            .all(|s| !s.primary_possible && !s.extended_possible && !s.logical_possible));
    }
}
