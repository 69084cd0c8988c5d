//! The proposal engine: where planned devices fit, how they are created on a
//! devicegraph copy, and the guided search over settings and disks.

pub mod creators;
pub mod devices_creator;
pub mod distribution;
pub mod proposal;

#[cfg(test)]
mod scenario_tests;
#[cfg(test)]
pub(crate) mod test_utils;
