//! sysdefs (System Definitions) is a dependency-light crate meant exclusively
//! to contain definitions for simple, basic, or axiomatic storage concepts
//! shared by the data model and the engine.
//!
//! As the name implies, the crate mainly provides definitions, and should
//! contain minimal or no behavior at all.
//!

pub mod filesystems;
pub mod partition_ids;
pub mod partition_tables;
