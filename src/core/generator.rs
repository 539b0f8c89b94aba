//! KL-010: Generation pipeline — resolve → emit → catalog → compose.
//!
//! Runs synchronously over a closed graph (borrowed immutably, so nothing can
//! be attached mid-run). Any error aborts the whole run; no partial
//! generation is ever returned.

use super::codegen::{self, Template};
use super::error::{Error, Result};
use super::expr::{OutputCatalog, ProvidedOutputs};
use super::graph::{is_valid_name, ResourceGraph};
use super::manifest::{self, ManifestDocument};
use super::resolver::{self, Resolved};
use super::types::DeploymentContext;
use crate::tripwire::hasher;
use indexmap::IndexMap;

/// File name of the manifest within an output directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Outputs a shared hosting environment is known to expose.
pub const ENVIRONMENT_OUTPUTS: &[&str] = &["principalId", "principalName"];

/// Result of one generation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub manifest: ManifestDocument,
    /// Template path → rendered Bicep, in manifest order.
    pub templates: IndexMap<String, String>,
}

impl Generation {
    /// Every artifact as (relative path, content), manifest first.
    pub fn artifacts(&self) -> Result<Vec<(String, String)>> {
        let mut out = vec![(MANIFEST_FILE.to_string(), self.manifest.to_json()?)];
        out.extend(self.templates.iter().map(|(p, t)| (p.clone(), t.clone())));
        Ok(out)
    }

    /// BLAKE3 composite over every artifact path and content.
    pub fn fingerprint(&self) -> Result<String> {
        let artifacts = self.artifacts()?;
        let hashes: Vec<String> = artifacts
            .iter()
            .map(|(path, content)| {
                hasher::composite_hash(&[path.as_str(), hasher::hash_string(content).as_str()])
            })
            .collect();
        let refs: Vec<&str> = hashes.iter().map(String::as_str).collect();
        Ok(hasher::composite_hash(&refs))
    }
}

/// Generate the manifest and templates for a declared graph.
pub fn generate(graph: &ResourceGraph, context: &DeploymentContext) -> Result<Generation> {
    if let Some(ref env) = context.environment {
        if !is_valid_name(env) {
            return Err(Error::configuration(
                env,
                "shared environment name must start with a letter and contain only letters, \
                 digits and inner hyphens",
            ));
        }
        if graph.lookup(env).is_ok() {
            return Err(Error::configuration(
                env,
                "shared environment name collides with a declared resource",
            ));
        }
    }

    let resolved = resolver::resolve_all(graph, context)?;
    let templates: Vec<Option<Template>> = resolved.iter().map(codegen::emit).collect();
    let catalog = build_catalog(&resolved, &templates, context);

    let mut document = ManifestDocument::default();
    let mut rendered = IndexMap::new();
    for (r, template) in resolved.iter().zip(&templates) {
        let entry = manifest::compose(r, template.as_ref(), &catalog)?;
        document.resources.insert(r.name().to_string(), entry);
        if let Some(t) = template {
            rendered.insert(t.path(), t.render());
        }
    }

    tracing::info!(
        resources = document.resources.len(),
        templates = rendered.len(),
        "generated manifest"
    );
    Ok(Generation {
        manifest: document,
        templates: rendered,
    })
}

fn build_catalog(
    resolved: &[Resolved],
    templates: &[Option<Template>],
    context: &DeploymentContext,
) -> OutputCatalog {
    let mut catalog = OutputCatalog::new();
    if let Some(ref env) = context.environment {
        catalog.insert(
            env.clone(),
            ProvidedOutputs {
                outputs: ENVIRONMENT_OUTPUTS.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
        );
    }
    for (r, template) in resolved.iter().zip(templates) {
        catalog.insert(r.name(), manifest::provided_outputs(r, template.as_ref()));
    }
    manifest::register_secrets(resolved, &mut catalog);
    catalog
}
