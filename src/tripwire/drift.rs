//! KL-013: Drift detection — compare artifacts on disk to a fresh generation.

use crate::core::error::{Error, Result};
use crate::core::generator::Generation;
use crate::tripwire::hasher;
use std::fmt;
use std::path::Path;

const TEMPLATE_SUFFIX: &str = ".module.bicep";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftKind {
    /// Expected artifact is not on disk.
    Missing,
    /// On-disk content differs from the regenerated content.
    Modified,
    /// Template on disk that the graph no longer produces.
    Stale,
}

impl fmt::Display for DriftKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "MISSING"),
            Self::Modified => write!(f, "MODIFIED"),
            Self::Stale => write!(f, "STALE"),
        }
    }
}

/// A single drift finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftFinding {
    pub path: String,
    pub kind: DriftKind,
    pub expected_hash: String,
    pub actual_hash: String,
}

/// Compare `dir` against `generation`. Findings are in artifact order,
/// stale templates last (sorted).
pub fn detect_drift(dir: &Path, generation: &Generation) -> Result<Vec<DriftFinding>> {
    let mut findings = Vec::new();
    let artifacts = generation.artifacts()?;

    for (rel, content) in &artifacts {
        let expected = hasher::hash_string(content);
        let path = dir.join(rel);
        if !path.exists() {
            findings.push(DriftFinding {
                path: rel.clone(),
                kind: DriftKind::Missing,
                expected_hash: expected,
                actual_hash: "MISSING".to_string(),
            });
            continue;
        }
        let actual = hasher::hash_file(&path)?;
        if actual != expected {
            findings.push(DriftFinding {
                path: rel.clone(),
                kind: DriftKind::Modified,
                expected_hash: expected,
                actual_hash: actual,
            });
        }
    }

    if dir.is_dir() {
        let mut stale: Vec<String> = std::fs::read_dir(dir)
            .map_err(|e| Error::io(dir, e))?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| name.ends_with(TEMPLATE_SUFFIX))
            .filter(|name| !artifacts.iter().any(|(rel, _)| rel == name))
            .collect();
        stale.sort();
        for name in stale {
            let actual = hasher::hash_file(&dir.join(&name))?;
            findings.push(DriftFinding {
                path: name,
                kind: DriftKind::Stale,
                expected_hash: "NONE".to_string(),
                actual_hash: actual,
            });
        }
    }

    Ok(findings)
}
