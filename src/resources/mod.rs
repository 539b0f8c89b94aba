//! Resource emitters — one Bicep template builder per managed resource kind.
//!
//! Each emitter reads only the resolved decision record and produces:
//! 1. Parameters, with manifest bindings where the deployer must supply them
//! 2. The resource declaration and any sub-resources (access policies, secrets)
//! 3. Outputs other resources and the manifest can reference

pub mod cache;
pub mod vault;
