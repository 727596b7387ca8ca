//! Data models for the consent service.
//!
//! Field names serialize in camelCase to match the IAB-style JSON documents and
//! the command API responses third-party scripts consume.

mod catalog;
mod command;
mod consent;

pub use catalog::*;
pub use command::*;
pub use consent::*;
