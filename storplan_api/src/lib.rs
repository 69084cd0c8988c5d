//! Data model of the storage proposal engine: sizes and regions, the
//! devicegraph, planned devices, proposal settings, issues and errors.

pub mod constants;
pub mod devicegraph;
pub mod error;
pub mod issues;
pub mod planned;
pub mod primitives;
pub mod settings;

pub use devicegraph::{Devicegraph, Sid};
pub use primitives::bytes::ByteCount;
