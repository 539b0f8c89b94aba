//! KL-014: Output writer — persist a generation to a directory.
//!
//! Every artifact is staged as a hidden temp file first and only renamed into
//! place once all of them were written. On failure the staged files and any
//! artifacts already renamed in this run are removed.

use super::error::{Error, Result};
use super::generator::Generation;
use std::path::{Path, PathBuf};

/// Staging path for an artifact (`.cache.module.bicep.tmp`).
fn staging_path(dir: &Path, rel: &str) -> PathBuf {
    dir.join(format!(".{}.tmp", rel))
}

/// Write `manifest.json` and every template into `dir`. Returns the final
/// artifact paths in write order.
pub fn write_generation(dir: &Path, generation: &Generation) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    let artifacts = generation.artifacts()?;

    let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(artifacts.len());
    for (rel, content) in &artifacts {
        let tmp = staging_path(dir, rel);
        if let Err(e) = std::fs::write(&tmp, content) {
            remove_all(staged.iter().map(|(t, _)| t));
            return Err(Error::io(tmp, e));
        }
        staged.push((tmp, dir.join(rel)));
    }

    let mut written = Vec::with_capacity(staged.len());
    for (i, (tmp, path)) in staged.iter().enumerate() {
        if let Err(e) = std::fs::rename(tmp, path) {
            remove_all(written.iter().chain(staged[i..].iter().map(|(t, _)| t)));
            return Err(Error::io(path, e));
        }
        tracing::debug!(path = %path.display(), "wrote artifact");
        written.push(path.clone());
    }

    tracing::info!(dir = %dir.display(), artifacts = written.len(), "wrote generation");
    Ok(written)
}

fn remove_all<'a>(paths: impl Iterator<Item = &'a PathBuf>) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "cleanup failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::generator::{generate, MANIFEST_FILE};
    use crate::core::graph::ResourceGraph;
    use crate::core::types::{DeploymentContext, ResourceKind};

    fn generation() -> Generation {
        let mut g = ResourceGraph::new();
        let cache = g.declare("cache", ResourceKind::Cache).unwrap();
        g.with_access_key_authentication(cache, None).unwrap();
        generate(&g, &DeploymentContext::default()).unwrap()
    }

    #[test]
    fn test_kl014_write_generation() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("infra");
        let gen = generation();
        let written = write_generation(&out, &gen).unwrap();
        assert_eq!(
            written,
            vec![out.join(MANIFEST_FILE), out.join("cache.module.bicep")]
        );
        let manifest = std::fs::read_to_string(out.join(MANIFEST_FILE)).unwrap();
        assert_eq!(manifest, gen.manifest.to_json().unwrap());
        let bicep = std::fs::read_to_string(out.join("cache.module.bicep")).unwrap();
        assert_eq!(bicep, gen.templates["cache.module.bicep"]);
        assert!(!out.join(".manifest.json.tmp").exists());
    }

    #[test]
    fn test_kl014_overwrite_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let gen = generation();
        write_generation(dir.path(), &gen).unwrap();
        let first = std::fs::read(dir.path().join(MANIFEST_FILE)).unwrap();
        write_generation(dir.path(), &gen).unwrap();
        let second = std::fs::read(dir.path().join(MANIFEST_FILE)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_kl014_failure_leaves_no_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the template's staging file should go.
        std::fs::create_dir(dir.path().join(".cache.module.bicep.tmp")).unwrap();
        let err = write_generation(dir.path(), &generation()).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert!(!dir.path().join(MANIFEST_FILE).exists());
        assert!(!dir.path().join(".manifest.json.tmp").exists());
        assert!(!dir.path().join("cache.module.bicep").exists());
    }

    #[test]
    fn test_kl014_dir_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("out");
        std::fs::write(&file, "x").unwrap();
        assert!(write_generation(&file, &generation()).is_err());
    }
}
