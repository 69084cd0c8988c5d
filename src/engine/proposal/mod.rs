//! # Guided proposal
//!
//! Searches for the first layout that can be created out of a catalog of
//! planned devices, trying ever less demanding combinations:
//!
//! 1. Groups of candidate disks: every candidate on its own, then all of
//!    them together.
//! 2. Settings, from the initial ones to the most relaxed ones.
//! 3. The disk holding the root filesystem, biggest candidate first.
//! 4. In `Device` allocate mode, the disks of the other proposed volumes,
//!    spreading them over as many disks as possible first.
//! 5. Desired sizes, then minimum sizes.
//!
//! Every attempt populates a fresh copy of the original devicegraph in
//! strict mode. The first one that succeeds wins.

use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use log::{debug, info, trace};

use storplan_api::{
    devicegraph::Devicegraph,
    error::{ErrorKind, ExhaustedError, ProposalError},
    planned::{DevicesCollection, PlannedDevice},
    settings::{AllocateMode, EngineOptions, ProposalSettings, SettingsAdjustment},
};

use super::devices_creator::{CreatorMode, DevicesCreator};

mod planner;
mod settings_generator;

pub use planner::{DevicesPlanner, TargetSize};
pub use settings_generator::SettingsGenerator;

/// A successful guided proposal.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub devicegraph: Devicegraph,
    pub devices_map: BTreeMap<String, PlannedDevice>,

    /// Settings of the successful attempt, including its root device.
    pub settings: ProposalSettings,

    /// Relaxations applied to the initial settings.
    pub adjustments: Vec<SettingsAdjustment>,

    /// Number of attempts made, the successful one included.
    pub attempts: usize,

    pub created: Vec<String>,
    pub reused: Vec<String>,
}

pub struct InitialGuidedProposal<'a> {
    devicegraph: &'a Devicegraph,
    catalog: &'a DevicesCollection,
    settings: ProposalSettings,
    options: EngineOptions,
    deadline: Option<Instant>,
    attempts: usize,
}

impl<'a> InitialGuidedProposal<'a> {
    pub fn new(
        devicegraph: &'a Devicegraph,
        catalog: &'a DevicesCollection,
        settings: ProposalSettings,
        options: EngineOptions,
    ) -> Self {
        Self {
            devicegraph,
            catalog,
            settings,
            options,
            deadline: None,
            attempts: 0,
        }
    }

    /// Runs the search. Errors other than running out of space or feasible
    /// layouts abort it right away.
    pub fn propose(&mut self) -> Result<Proposal, ProposalError> {
        self.settings.validate()?;
        self.attempts = 0;
        self.deadline = self
            .options
            .search_timeout_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs));

        let candidates: Vec<String> = self
            .settings
            .candidate_devices
            .iter()
            .filter(|name| {
                let known = self
                    .devicegraph
                    .find_by_name(name)
                    .is_some_and(|sid| self.devicegraph.disks().contains(&sid));
                if !known {
                    debug!("Ignoring unknown candidate device '{name}'");
                }
                known
            })
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Err(ProposalError::new(ExhaustedError::NoCandidateDevices));
        }

        let result = first_success(candidate_groups(&candidates), |group| {
            self.try_group(group)
        });
        match result {
            Ok(proposal) => {
                info!(
                    "Proposal found after {} attempt(s) with root on '{}'",
                    proposal.attempts,
                    proposal.settings.root_device.as_deref().unwrap_or_default()
                );
                Ok(proposal)
            }
            Err(e) if e.is_recoverable() && !matches!(e.kind(), ErrorKind::Exhausted(_)) => {
                info!("No proposal found after {} attempt(s)", self.attempts);
                Err(ProposalError::caused_by(ExhaustedError::NoValidLayout, e))
            }
            Err(e) => Err(e),
        }
    }

    fn try_group(&mut self, group: Vec<String>) -> Result<Proposal, ProposalError> {
        debug!("Trying candidate devices {group:?}");
        let mut settings = self.settings.clone();
        settings.candidate_devices = group;
        first_success(SettingsGenerator::new(settings), |(settings, adjustments)| {
            self.try_root_devices(settings, &adjustments)
        })
    }

    fn try_root_devices(
        &mut self,
        settings: ProposalSettings,
        adjustments: &[SettingsAdjustment],
    ) -> Result<Proposal, ProposalError> {
        let roots = self.candidate_roots(&settings);
        first_success(roots, |root| {
            let mut settings = settings.clone();
            settings.root_device = Some(root);
            self.try_permutations(settings, adjustments)
        })
    }

    fn try_permutations(
        &mut self,
        settings: ProposalSettings,
        adjustments: &[SettingsAdjustment],
    ) -> Result<Proposal, ProposalError> {
        if settings.allocate_mode == AllocateMode::Auto {
            return self.try_target_sizes(&settings, adjustments);
        }

        let floating: Vec<String> = settings
            .non_root_proposed()
            .filter(|v| v.device.is_none())
            .map(|v| v.mount_point.clone())
            .collect();
        let root = settings.root_device.clone().unwrap_or_default();
        let permutations = disks_permutations(&settings.candidate_devices, floating.len(), &root);
        first_success(permutations, |permutation| {
            let mut settings = settings.clone();
            for (mount_point, disk) in floating.iter().zip(permutation) {
                if let Some(volume) = settings.volume_mut(mount_point) {
                    volume.device = Some(disk);
                }
            }
            self.try_target_sizes(&settings, adjustments)
        })
    }

    fn try_target_sizes(
        &mut self,
        settings: &ProposalSettings,
        adjustments: &[SettingsAdjustment],
    ) -> Result<Proposal, ProposalError> {
        first_success([TargetSize::Desired, TargetSize::Min], |target| {
            self.attempt(settings, adjustments, target)
        })
    }

    fn attempt(
        &mut self,
        settings: &ProposalSettings,
        adjustments: &[SettingsAdjustment],
        target: TargetSize,
    ) -> Result<Proposal, ProposalError> {
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(ProposalError::new(ExhaustedError::Cancelled {
                attempts: self.attempts,
            }));
        }
        self.attempts += 1;
        debug!(
            "Attempt {}: devices {:?}, root '{}', {target:?} sizes, {} adjustment(s)",
            self.attempts,
            settings.candidate_devices,
            settings.root_device.as_deref().unwrap_or_default(),
            adjustments.len()
        );

        let catalog = DevicesPlanner::new(self.catalog, settings).planned_devices(target);
        let populated = DevicesCreator::new(
            self.devicegraph,
            CreatorMode::Strict,
            self.options.alignment,
        )
        .populated_devicegraph(&catalog, &settings.candidate_devices)
        .map_err(|e| {
            trace!("Attempt {} failed: {e:?}", self.attempts);
            e
        })?;

        Ok(Proposal {
            devicegraph: populated.devicegraph,
            devices_map: populated.devices_map,
            settings: settings.clone(),
            adjustments: adjustments.to_vec(),
            attempts: self.attempts,
            created: populated.created,
            reused: populated.reused,
        })
    }

    /// Disks to try for the root filesystem. A root device chosen upfront is
    /// kept in `Auto` mode. Otherwise bigger disks go first.
    fn candidate_roots(&self, settings: &ProposalSettings) -> Vec<String> {
        if settings.allocate_mode == AllocateMode::Auto {
            if let Some(root) = &settings.root_device {
                return vec![root.clone()];
            }
        }
        let mut roots: Vec<_> = settings
            .candidate_devices
            .iter()
            .filter_map(|name| {
                self.devicegraph
                    .find_by_name(name)
                    .map(|sid| (name.clone(), self.devicegraph.size_of(sid)))
            })
            .collect();
        roots.sort_by(|a, b| b.1.cmp(&a.1));
        roots.into_iter().map(|(name, _)| name).collect()
    }
}

/// Every candidate on its own, then all of them, without repeating a group.
fn candidate_groups(candidates: &[String]) -> Vec<Vec<String>> {
    let mut groups: Vec<Vec<String>> = candidates.iter().map(|c| vec![c.clone()]).collect();
    groups.push(candidates.to_vec());
    groups.dedup();
    let mut unique = Vec::new();
    for group in groups {
        if !unique.contains(&group) {
            unique.push(group);
        }
    }
    unique
}

/// All assignments of `count` volumes to `disks`, repetitions allowed. The
/// ones using more distinct disks (root included) come first.
fn disks_permutations(disks: &[String], count: usize, root: &str) -> Vec<Vec<String>> {
    let mut permutations: Vec<Vec<String>> = vec![Vec::new()];
    for _ in 0..count {
        permutations = permutations
            .into_iter()
            .flat_map(|prefix| {
                disks.iter().map(move |disk| {
                    let mut next = prefix.clone();
                    next.push(disk.clone());
                    next
                })
            })
            .collect();
    }

    let distinct = |permutation: &Vec<String>| {
        let mut used: Vec<&str> = permutation.iter().map(String::as_str).collect();
        used.push(root);
        used.sort_unstable();
        used.dedup();
        used.len()
    };
    permutations.sort_by_key(|p| std::cmp::Reverse(distinct(p)));
    permutations
}

/// Returns the first successful attempt. When all of them fail, the first
/// recoverable error is returned. Unrecoverable errors and cancellation stop
/// the iteration.
pub fn first_success<T, O>(
    options: impl IntoIterator<Item = O>,
    mut attempt: impl FnMut(O) -> Result<T, ProposalError>,
) -> Result<T, ProposalError> {
    let mut first_error = None;
    for option in options {
        match attempt(option) {
            Ok(value) => return Ok(value),
            Err(e)
                if !e.is_recoverable()
                    || matches!(
                        e.kind(),
                        ErrorKind::Exhausted(ExhaustedError::Cancelled { .. })
                    ) =>
            {
                return Err(e)
            }
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }
    Err(first_error.unwrap_or_else(|| ProposalError::new(ExhaustedError::NoValidLayout)))
}

#[cfg(test)]
mod tests {
    use storplan_api::error::{InfeasibleError, NoSpaceError};

    use super::*;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_owned()).collect()
    }

    #[test]
    fn test_candidate_groups() {
        assert_eq!(
            candidate_groups(&names(&["/dev/sda", "/dev/sdb"])),
            vec![
                names(&["/dev/sda"]),
                names(&["/dev/sdb"]),
                names(&["/dev/sda", "/dev/sdb"])
            ]
        );
        assert_eq!(
            candidate_groups(&names(&["/dev/sda"])),
            vec![names(&["/dev/sda"])]
        );
    }

    #[test]
    fn test_disks_permutations() {
        let disks = names(&["/dev/sda", "/dev/sdb"]);
        let permutations = disks_permutations(&disks, 2, "/dev/sda");
        assert_eq!(permutations.len(), 4);
        // Everything but [sda, sda] spans both disks
        assert_eq!(permutations[3], names(&["/dev/sda", "/dev/sda"]));
        assert_eq!(permutations[0], names(&["/dev/sda", "/dev/sdb"]));

        assert_eq!(disks_permutations(&disks, 0, "/dev/sda"), vec![Vec::<String>::new()]);
    }

    #[test]
    fn test_first_success() {
        let no_space = || ProposalError::new(NoSpaceError::NoDistribution);

        let result = first_success([1, 2, 3], |n| if n < 3 { Err(no_space()) } else { Ok(n) });
        assert_eq!(result.unwrap(), 3);

        // The first error wins
        let err = first_success([1, 2], |n| -> Result<(), _> {
            if n == 1 {
                Err(no_space())
            } else {
                Err(ProposalError::new(ExhaustedError::NoValidLayout))
            }
        })
        .unwrap_err();
        assert!(err.is_no_space());

        // Unrecoverable errors stop the search
        let mut tried = Vec::new();
        let err = first_success([1, 2], |n| -> Result<(), _> {
            tried.push(n);
            Err(ProposalError::internal("broken"))
        })
        .unwrap_err();
        assert_eq!(err.category(), "internal");
        assert_eq!(tried, vec![1]);

        let mut tried = Vec::new();
        let err = first_success([1, 2], |n| -> Result<(), _> {
            tried.push(n);
            Err(ProposalError::new(ExhaustedError::Cancelled { attempts: 4 }))
        })
        .unwrap_err();
        assert_eq!(tried, vec![1]);
        assert_eq!(
            err.kind(),
            &ErrorKind::Exhausted(ExhaustedError::Cancelled { attempts: 4 })
        );

        let err = first_success(Vec::<u32>::new(), |_| -> Result<(), _> {
            Err(ProposalError::new(InfeasibleError::UnsupportedDevice {
                name: "x".into(),
                reason: "y".into(),
            }))
        })
        .unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::Exhausted(ExhaustedError::NoValidLayout)
        );
    }
}
