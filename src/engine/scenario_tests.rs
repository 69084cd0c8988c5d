//! End to end scenarios: catalogs proposed or populated on small
//! devicegraphs, checked through the public entry points.

use indoc::indoc;

use storplan_api::{
    error::{ErrorKind, ExhaustedError, InfeasibleError},
    issues::IssueKind,
    planned::DevicesCollection,
    settings::{AllocateMode, EngineOptions, ProposalSettings, SettingsAdjustment, VolumeSpec},
    ByteCount, Devicegraph,
};

use crate::{calculate, populate};

use super::test_utils::{catalog_from_yaml, graph_from_yaml, graph_with_disks, msdos_graph};

fn settings(candidates: &[&str]) -> ProposalSettings {
    ProposalSettings {
        candidate_devices: candidates.iter().map(|c| (*c).to_owned()).collect(),
        ..Default::default()
    }
}

fn volume(mount_point: &str) -> VolumeSpec {
    VolumeSpec {
        mount_point: mount_point.into(),
        proposed: true,
        ..Default::default()
    }
}

fn size_at(graph: &Devicegraph, name: &str) -> ByteCount {
    graph.size_of(graph.find_by_name(name).unwrap())
}

/// Disk holding the filesystem mounted at `path`.
fn disk_of_mount(graph: &Devicegraph, path: &str) -> String {
    let fs = graph.find_filesystem_by_mount_point(path).unwrap();
    let blk = graph.blk_device_of(fs).unwrap();
    let disk = graph.disk_of(blk).unwrap();
    graph.name_of(disk).unwrap().to_owned()
}

fn free_on(graph: &Devicegraph, disk: &str) -> ByteCount {
    let sid = graph.find_by_name(disk).unwrap();
    graph
        .free_spaces(sid, &Default::default())
        .iter()
        .map(|space| space.size())
        .sum()
}

fn two_partitions(min_gib: u64) -> DevicesCollection {
    catalog_from_yaml(&format!(
        indoc! {r#"
            - type: partition
              minSize: {min}G
              mountPoint: /
              filesystemType: ext4
            - type: partition
              minSize: {min}G
              mountPoint: /home
              filesystemType: xfs
        "#},
        min = min_gib
    ))
}

#[test]
fn test_desired_size_on_single_disk() {
    let graph = graph_with_disks(&[("/dev/sda", ByteCount::gib(20))]);
    let catalog = catalog_from_yaml(indoc! {r#"
        - type: partition
          minSize: 10G
          desiredSize: 12G
          maxSize: 15G
          mountPoint: /
          filesystemType: ext4
    "#});

    let proposal = calculate(
        &graph,
        &catalog,
        settings(&["/dev/sda"]),
        &EngineOptions::default(),
    )
    .unwrap();

    assert_eq!(proposal.attempts, 1);
    assert_eq!(proposal.created, vec!["/dev/sda1".to_owned()]);
    assert!(proposal.reused.is_empty());
    assert_eq!(size_at(&proposal.devicegraph, "/dev/sda1"), ByteCount::gib(12));
    assert!(free_on(&proposal.devicegraph, "/dev/sda") > ByteCount::gib(7));
    assert_eq!(proposal.settings.root_device.as_deref(), Some("/dev/sda"));

    // The original devicegraph is never touched
    assert!(graph.find_by_name("/dev/sda1").is_none());
}

#[test]
fn test_not_enough_space() {
    let graph = graph_with_disks(&[("/dev/sda", ByteCount::gib(5))]);
    let catalog = two_partitions(4);

    let err = calculate(
        &graph,
        &catalog,
        settings(&["/dev/sda"]),
        &EngineOptions::default(),
    )
    .unwrap_err();
    assert_eq!(
        err.kind(),
        &ErrorKind::Exhausted(ExhaustedError::NoValidLayout)
    );
    assert!(err.cause().unwrap().is_no_space());

    // Populating shares the disk by the original minimums instead
    let result = populate(&graph, &catalog, &[], &EngineOptions::default()).unwrap();
    assert!(result.issues.is_empty());
    let root = size_at(&result.devicegraph, "/dev/sda1");
    let home = size_at(&result.devicegraph, "/dev/sda2");
    assert!(root >= ByteCount::gib(2));
    assert!(home >= ByteCount::gib(2));
    assert!(root + home <= ByteCount::gib(5));
}

#[test]
fn test_fits_only_on_second_disk() {
    let graph = graph_with_disks(&[
        ("/dev/sda", ByteCount::gib(10)),
        ("/dev/sdb", ByteCount::gib(50)),
    ]);
    let catalog = catalog_from_yaml(indoc! {r#"
        - type: partition
          minSize: 20G
          mountPoint: /
          filesystemType: ext4
        - type: partition
          minSize: 10G
          mountPoint: /home
          filesystemType: xfs
    "#});

    let proposal = calculate(
        &graph,
        &catalog,
        settings(&["/dev/sda", "/dev/sdb"]),
        &EngineOptions::default(),
    )
    .unwrap();

    // Desired and minimum sizes on /dev/sda alone, then /dev/sdb alone
    assert_eq!(proposal.attempts, 3);
    assert_eq!(proposal.settings.candidate_devices, vec!["/dev/sdb".to_owned()]);
    assert_eq!(disk_of_mount(&proposal.devicegraph, "/"), "/dev/sdb");
    assert_eq!(disk_of_mount(&proposal.devicegraph, "/home"), "/dev/sdb");
    assert!(proposal.devicegraph.partitions_of(
        proposal.devicegraph.find_by_name("/dev/sda").unwrap()
    )
    .is_empty());
}

#[test]
fn test_root_on_smaller_disk() {
    let graph = graph_from_yaml(indoc! {r#"
        disks:
          - name: /dev/sda
            size: 30G
            partitionTable: gpt
            partitions:
              - number: 1
                start: 1M
                size: 25G
                filesystem:
                  type: ext4
          - name: /dev/sdb
            size: 20G
            preferredPartitionTable: gpt
    "#});
    let catalog = catalog_from_yaml(indoc! {r#"
        - type: partition
          minSize: 17G
          mountPoint: /
          filesystemType: ext4
        - type: partition
          minSize: 4G
          mountPoint: /home
          filesystemType: xfs
    "#});

    let proposal = calculate(
        &graph,
        &catalog,
        settings(&["/dev/sda", "/dev/sdb"]),
        &EngineOptions::default(),
    )
    .unwrap();

    assert_eq!(proposal.settings.root_device.as_deref(), Some("/dev/sdb"));
    assert_eq!(disk_of_mount(&proposal.devicegraph, "/"), "/dev/sdb");
    assert_eq!(disk_of_mount(&proposal.devicegraph, "/home"), "/dev/sda");
    // The existing partition is kept
    assert_eq!(size_at(&proposal.devicegraph, "/dev/sda1"), ByteCount::gib(25));
}

#[test]
fn test_settings_relaxation() {
    let graph = graph_with_disks(&[("/dev/sda", ByteCount::gib(20))]);
    let catalog = catalog_from_yaml(indoc! {r#"
        - type: partition
          minSize: 10G
          mountPoint: /
          filesystemType: btrfs
        - type: partition
          minSize: 15G
          mountPoint: /home
          filesystemType: xfs
    "#});
    let mut settings = settings(&["/dev/sda"]);
    settings.volumes = vec![
        VolumeSpec {
            snapshots: true,
            snapshots_configurable: true,
            snapshots_size: ByteCount::gib(5),
            disable_order: Some(2),
            ..volume("/")
        },
        VolumeSpec {
            proposed_configurable: true,
            disable_order: Some(1),
            ..volume("/home")
        },
    ];

    let proposal = calculate(&graph, &catalog, settings, &EngineOptions::default()).unwrap();

    assert_eq!(
        proposal.adjustments,
        vec![SettingsAdjustment::DisableVolume("/home".into())]
    );
    assert_eq!(proposal.attempts, 3);
    assert!(proposal
        .devicegraph
        .find_filesystem_by_mount_point("/home")
        .is_none());
    // Snapshots are still on: root got their space
    assert_eq!(size_at(&proposal.devicegraph, "/dev/sda1"), ByteCount::gib(15));
    assert!(proposal.settings.volume("/").unwrap().snapshots);
    assert!(!proposal.settings.volume("/home").unwrap().proposed);
}

#[test]
fn test_explicit_device_allocation() {
    let graph = graph_with_disks(&[
        ("/dev/sda", ByteCount::gib(20)),
        ("/dev/sdb", ByteCount::gib(20)),
    ]);
    let catalog = catalog_from_yaml(indoc! {r#"
        - type: partition
          minSize: 8G
          mountPoint: /
          filesystemType: ext4
        - type: partition
          minSize: 8G
          mountPoint: /home
          filesystemType: xfs
        - type: partition
          minSize: 8G
          mountPoint: /var
          filesystemType: xfs
    "#});
    let mut settings = settings(&["/dev/sda", "/dev/sdb"]);
    settings.allocate_mode = AllocateMode::Device;
    settings.volumes = vec![volume("/"), volume("/home"), volume("/var")];

    let proposal = calculate(&graph, &catalog, settings, &EngineOptions::default()).unwrap();

    let graph = &proposal.devicegraph;
    assert_eq!(disk_of_mount(graph, "/"), "/dev/sda");
    assert_eq!(disk_of_mount(graph, "/home"), "/dev/sda");
    assert_eq!(disk_of_mount(graph, "/var"), "/dev/sdb");
    assert_eq!(
        proposal.settings.volume("/var").unwrap().device.as_deref(),
        Some("/dev/sdb")
    );
}

#[test]
fn test_missing_dependency_aborts_search() {
    let graph = graph_with_disks(&[
        ("/dev/sda", ByteCount::gib(20)),
        ("/dev/sdb", ByteCount::gib(20)),
    ]);
    let catalog = catalog_from_yaml(indoc! {r#"
        - type: partition
          minSize: 5G
          mountPoint: /
          filesystemType: ext4
        - type: lvm-vg
          name: data
          lvs:
            - name: srv
              minSize: 5G
              mountPoint: /srv
              filesystemType: xfs
    "#});

    let err = calculate(
        &graph,
        &catalog,
        settings(&["/dev/sda", "/dev/sdb"]),
        &EngineOptions::default(),
    )
    .unwrap_err();
    assert_eq!(err.category(), "missing-dependency");

    // Populating records it and creates the rest
    let result = populate(&graph, &catalog, &[], &EngineOptions::default()).unwrap();
    let kinds: Vec<&IssueKind> = result.issues.iter().map(|i| &i.kind).collect();
    assert_eq!(
        kinds,
        vec![&IssueKind::NoPhysicalVolumes { vg: "data".into() }]
    );
    assert!(result
        .devicegraph
        .find_filesystem_by_mount_point("/")
        .is_some());
}

#[test]
fn test_reuse_and_create() {
    let graph = graph_from_yaml(indoc! {r#"
        disks:
          - name: /dev/sda
            size: 40G
            partitionTable: gpt
            partitions:
              - number: 1
                start: 1M
                size: 10G
                filesystem:
                  type: ext4
                  mountPoint: /data
              - number: 2
                start: 10241M
                size: 20G
                filesystem:
                  type: ext4
    "#});
    let catalog = catalog_from_yaml(indoc! {r#"
        - type: partition
          reuseName: /dev/sda1
          mountPoint: /data
        - type: partition
          reuseName: /dev/sda2
          resize: true
          maxSize: 10G
          mountPoint: /old
        - type: partition
          minSize: 15G
          mountPoint: /
          filesystemType: xfs
    "#});

    let proposal = calculate(
        &graph,
        &catalog,
        settings(&["/dev/sda"]),
        &EngineOptions::default(),
    )
    .unwrap();

    assert_eq!(
        proposal.reused,
        vec!["/dev/sda2".to_owned(), "/dev/sda1".to_owned()]
    );
    assert_eq!(proposal.created, vec!["/dev/sda3".to_owned()]);
    let graph = &proposal.devicegraph;
    assert_eq!(size_at(graph, "/dev/sda2"), ByteCount::gib(10));
    assert_eq!(size_at(graph, "/dev/sda3"), ByteCount::gib(15));
    assert!(graph.find_filesystem_by_mount_point("/old").is_some());
}

#[test]
fn test_search_timeout() {
    let graph = graph_with_disks(&[("/dev/sda", ByteCount::gib(5))]);
    let options = EngineOptions {
        search_timeout_secs: Some(0),
        ..Default::default()
    };
    let err = calculate(&graph, &two_partitions(1), settings(&["/dev/sda"]), &options)
        .unwrap_err();
    assert_eq!(
        err.kind(),
        &ErrorKind::Exhausted(ExhaustedError::Cancelled { attempts: 0 })
    );
}

#[test]
fn test_no_candidate_devices() {
    let graph = graph_with_disks(&[("/dev/sda", ByteCount::gib(5))]);
    let err = calculate(
        &graph,
        &two_partitions(1),
        settings(&["/dev/nvme0n1"]),
        &EngineOptions::default(),
    )
    .unwrap_err();
    assert_eq!(
        err.kind(),
        &ErrorKind::Exhausted(ExhaustedError::NoCandidateDevices)
    );
}

#[test]
fn test_no_primary_slot_left() {
    let graph = msdos_graph(4);
    let catalog = catalog_from_yaml(indoc! {r#"
        - type: partition
          minSize: 1G
          primary: true
          mountPoint: /boot
          filesystemType: ext4
    "#});

    let err = calculate(
        &graph,
        &catalog,
        settings(&["/dev/sda"]),
        &EngineOptions::default(),
    )
    .unwrap_err();
    assert_eq!(
        err.kind(),
        &ErrorKind::Exhausted(ExhaustedError::NoValidLayout)
    );
    assert_eq!(
        err.cause().unwrap().kind(),
        &ErrorKind::Infeasible(InfeasibleError::NoPrimarySlot {
            disk: "/dev/sda".into()
        })
    );

    // Populating reports it instead of failing
    let result = populate(&graph, &catalog, &[], &EngineOptions::default()).unwrap();
    let issue = result.issues.iter().next().unwrap();
    assert!(matches!(
        &issue.kind,
        IssueKind::CouldNotCreate { category, .. } if category == "partitions"
    ));
    assert!(result.created.is_empty());
}
