//! Tripwire — BLAKE3 fingerprints and drift detection for generated output.

pub mod drift;
pub mod hasher;
