//! Storage proposal engine.
//!
//! Given a snapshot of the storage devices of a machine (a devicegraph) and
//! a catalog of planned devices, computes a new devicegraph where every
//! planned device exists:
//!
//! - [`calculate`] runs the guided proposal, searching disks, settings and
//!   sizes until a layout fits.
//! - [`populate`] creates the catalog as given, recording what could not be
//!   created as issues.

use log::info;

use storplan_api::{
    error::ProposalError,
    planned::DevicesCollection,
    settings::{EngineOptions, ProposalSettings},
    Devicegraph,
};

pub mod cli;
pub mod engine;
mod logging;
pub mod request;

pub use engine::{
    devices_creator::{CreatorMode, DevicesCreator, PopulateResult},
    proposal::{InitialGuidedProposal, Proposal},
};
pub use logging::{file_log::FileLog, logger, multilog::MultiLogger};

pub const STORPLAN_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Runs the guided proposal over the candidate devices of `settings`.
pub fn calculate(
    devicegraph: &Devicegraph,
    planned: &DevicesCollection,
    settings: ProposalSettings,
    options: &EngineOptions,
) -> Result<Proposal, ProposalError> {
    info!(
        "Calculating proposal for {} planned device(s) on {:?}",
        planned.devices().len(),
        settings.candidate_devices
    );
    InitialGuidedProposal::new(devicegraph, planned, settings, options.clone()).propose()
}

/// Creates every planned device, placing new partitions on `disk_names`
/// (every disk when empty). Failures become issues of the result.
pub fn populate(
    devicegraph: &Devicegraph,
    planned: &DevicesCollection,
    disk_names: &[String],
    options: &EngineOptions,
) -> Result<PopulateResult, ProposalError> {
    let disk_names: Vec<String> = if disk_names.is_empty() {
        devicegraph
            .disks()
            .into_iter()
            .filter_map(|sid| devicegraph.name_of(sid).map(str::to_owned))
            .collect()
    } else {
        disk_names.to_vec()
    };
    info!(
        "Populating {} planned device(s) on {disk_names:?}",
        planned.devices().len()
    );
    DevicesCreator::new(devicegraph, CreatorMode::BestEffort, options.alignment)
        .populated_devicegraph(planned, &disk_names)
}
