use std::collections::VecDeque;

use log::debug;

use storplan_api::settings::{ProposalSettings, SettingsAdjustment};

/// Produces progressively less ambitious settings.
///
/// The first item is the initial settings. Then, for every volume with a
/// disable order (lowest first), its snapshots are dropped and after that
/// the volume itself, as far as each is configurable. Every item carries the
/// adjustments accumulated so far.
pub struct SettingsGenerator {
    current: ProposalSettings,
    adjustments: Vec<SettingsAdjustment>,
    pending: VecDeque<SettingsAdjustment>,
    started: bool,
}

impl SettingsGenerator {
    pub fn new(settings: ProposalSettings) -> Self {
        let mut ordered: Vec<_> = settings
            .volumes
            .iter()
            .filter_map(|v| v.disable_order.map(|order| (order, v)))
            .collect();
        ordered.sort_by_key(|(order, _)| *order);

        let mut pending = VecDeque::new();
        for (_, volume) in ordered {
            if volume.snapshots && volume.snapshots_configurable {
                pending.push_back(SettingsAdjustment::DisableSnapshots(
                    volume.mount_point.clone(),
                ));
            }
            if volume.proposed && volume.proposed_configurable {
                pending.push_back(SettingsAdjustment::DisableVolume(volume.mount_point.clone()));
            }
        }

        Self {
            current: settings,
            adjustments: Vec::new(),
            pending,
            started: false,
        }
    }

    fn apply(&mut self, adjustment: &SettingsAdjustment) {
        match adjustment {
            SettingsAdjustment::DisableSnapshots(mount_point) => {
                if let Some(volume) = self.current.volume_mut(mount_point) {
                    volume.snapshots = false;
                }
            }
            SettingsAdjustment::DisableVolume(mount_point) => {
                if let Some(volume) = self.current.volume_mut(mount_point) {
                    volume.proposed = false;
                }
            }
        }
    }
}

impl Iterator for SettingsGenerator {
    type Item = (ProposalSettings, Vec<SettingsAdjustment>);

    fn next(&mut self) -> Option<Self::Item> {
        if !self.started {
            self.started = true;
        } else {
            let adjustment = self.pending.pop_front()?;
            debug!("Relaxing settings: {adjustment:?}");
            self.apply(&adjustment);
            self.adjustments.push(adjustment);
        }
        Some((self.current.clone(), self.adjustments.clone()))
    }
}
