pub mod bytes;
pub mod region;
