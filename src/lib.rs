//! Keel — deployment artifacts for an Azure Redis cache.
//!
//! Declare resources and their modifiers once; keel resolves how each one is
//! provisioned and emits Bicep modules plus a deployment manifest whose
//! connection strings are symbolic expressions over those modules' outputs.

pub mod cli;
pub mod core;
pub mod logging;
pub mod resources;
pub mod tripwire;
