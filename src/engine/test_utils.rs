#![allow(dead_code)]
//! Test utilities for the engine: small devicegraphs and planned devices
//! built with as little ceremony as possible.

use storplan_api::{
    devicegraph::description::{DevicegraphDescription, DiskDescription, PartitionDescription},
    planned::{CommonAttrs, DevicesCollection, PlannedPartition},
    ByteCount, Devicegraph,
};
use sysdefs::{
    filesystems::FilesystemType,
    partition_tables::{PartitionKind, PartitionTableType},
};

/// Empty disks without a partition table. GPT is created on first use.
pub(crate) fn graph_with_disks(disks: &[(&str, ByteCount)]) -> Devicegraph {
    DevicegraphDescription {
        disks: disks
            .iter()
            .map(|(name, size)| DiskDescription {
                name: (*name).to_owned(),
                size: *size,
                block_size: 512,
                partition_table: None,
                preferred_partition_table: Some(PartitionTableType::Gpt),
                partitions: Vec::new(),
                filesystem: None,
            })
            .collect(),
        ..Default::default()
    }
    .build()
    .expect("valid test devicegraph")
}

/// A 10GiB disk with an MS-DOS table and `primaries` 1GiB primary partitions
/// packed at its start.
pub(crate) fn msdos_graph(primaries: u32) -> Devicegraph {
    DevicegraphDescription {
        disks: vec![DiskDescription {
            name: "/dev/sda".into(),
            size: ByteCount::gib(10),
            block_size: 512,
            partition_table: Some(PartitionTableType::Msdos),
            preferred_partition_table: None,
            partitions: (0..primaries)
                .map(|i| PartitionDescription {
                    number: i + 1,
                    start: ByteCount::mib(1) + ByteCount::gib(u64::from(i)),
                    size: ByteCount::gib(1),
                    kind: PartitionKind::Primary,
                    id: Default::default(),
                    bootable: false,
                    filesystem: None,
                })
                .collect(),
            filesystem: None,
        }],
        ..Default::default()
    }
    .build()
    .expect("valid test devicegraph")
}

/// Devicegraph out of its YAML description.
pub(crate) fn graph_from_yaml(yaml: &str) -> Devicegraph {
    serde_yaml::from_str::<DevicegraphDescription>(yaml)
        .expect("valid devicegraph YAML")
        .build()
        .expect("valid test devicegraph")
}

/// An ext4 partition. A `max_gib` of 0 means unlimited. An empty mount point
/// leaves the partition unmounted.
pub(crate) fn planned_partition(
    mount_point: &str,
    min_gib: u64,
    desired_gib: u64,
    max_gib: u64,
) -> PlannedPartition {
    PlannedPartition {
        common: CommonAttrs {
            id: (!mount_point.is_empty()).then(|| mount_point.to_owned()),
            min_size: ByteCount::gib(min_gib),
            desired_size: Some(ByteCount::gib(desired_gib)),
            max_size: if max_gib == 0 {
                ByteCount::UNLIMITED
            } else {
                ByteCount::gib(max_gib)
            },
            mount_point: (!mount_point.is_empty()).then(|| mount_point.to_owned()),
            filesystem_type: Some(FilesystemType::Ext4),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Validated catalog out of a YAML list of planned devices.
pub(crate) fn catalog_from_yaml(yaml: &str) -> DevicesCollection {
    DevicesCollection::new(serde_yaml::from_str(yaml).expect("valid catalog YAML"))
        .expect("valid catalog")
}
