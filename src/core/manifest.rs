//! KL-009: Manifest composition — serialise resolved decisions and emitted
//! templates into the orchestrator-facing manifest document.
//!
//! The composer never re-derives a decision: connection expressions follow
//! the resolved auth mode and parameter bindings come from the template.

use super::codegen::Template;
use super::error::{Error, Result};
use super::expr::{Expr, OutputCatalog, ProvidedOutputs};
use super::resolver::{AuthMode, Resolved, SecretPlacement};
use crate::resources::cache::secret_key;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const TEMPLATE_TYPE: &str = "azure.bicep.v0";
pub const CONTAINER_TYPE: &str = "container.v0";
pub const PROJECT_TYPE: &str = "project.v0";

/// Entry for a resource deployed from a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateEntry {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(rename = "connectionString")]
    pub connection_string: String,

    pub path: String,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub params: IndexMap<String, String>,
}

/// One container endpoint binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingEntry {
    pub scheme: String,
    pub protocol: String,
    pub transport: String,

    #[serde(rename = "targetPort")]
    pub target_port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Entry for a resource replaced by a local container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerEntry {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(rename = "connectionString")]
    pub connection_string: String,

    pub image: String,

    pub bindings: IndexMap<String, BindingEntry>,
}

/// Entry for a consuming project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectEntry {
    #[serde(rename = "type")]
    pub kind: String,

    pub path: String,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManifestEntry {
    Template(TemplateEntry),
    Container(ContainerEntry),
    Project(ProjectEntry),
}

/// The whole-application manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDocument {
    pub resources: IndexMap<String, ManifestEntry>,
}

impl ManifestDocument {
    /// Pretty JSON with a trailing newline.
    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Connection expression decided for a resolved resource.
pub fn connection_expr(resolved: &Resolved) -> Option<Expr> {
    match resolved {
        Resolved::Cache(cache) => Some(match &cache.auth {
            AuthMode::Identity { .. } => Expr::concat(vec![
                Expr::output(&cache.name, "hostName"),
                Expr::literal(",ssl=true"),
            ]),
            AuthMode::AccessKey(SecretPlacement::Inline) => {
                Expr::output(&cache.name, "connectionString")
            }
            AuthMode::AccessKey(SecretPlacement::Vault(vault)) => {
                Expr::secret(&vault.name, secret_key(&cache.name))
            }
        }),
        Resolved::Vault(vault) => Some(Expr::output(&vault.name, "vaultUri")),
        Resolved::Container(container) => {
            let endpoint = container.endpoints.first()?;
            Some(Expr::concat(vec![
                Expr::binding(&container.name, &endpoint.name, "host"),
                Expr::literal(":"),
                Expr::binding(&container.name, &endpoint.name, "port"),
            ]))
        }
        Resolved::Project(_) => None,
    }
}

/// What `resolved` exposes to other expressions.
pub fn provided_outputs(resolved: &Resolved, template: Option<&Template>) -> ProvidedOutputs {
    ProvidedOutputs {
        outputs: template.map(Template::output_names).unwrap_or_default(),
        secrets: Vec::new(),
        endpoints: match resolved {
            Resolved::Container(c) => c.endpoints.iter().map(|e| e.name.clone()).collect(),
            _ => Vec::new(),
        },
        connection: connection_expr(resolved),
    }
}

/// Register secrets that caches write into their vaults.
pub fn register_secrets(resolved: &[Resolved], catalog: &mut OutputCatalog) {
    for r in resolved {
        if let Resolved::Cache(cache) = r {
            if let AuthMode::AccessKey(SecretPlacement::Vault(vault)) = &cache.auth {
                catalog.entry(&vault.name).secrets.push(secret_key(&cache.name));
            }
        }
    }
}

/// Compose the manifest entry for one resource.
pub fn compose(
    resolved: &Resolved,
    template: Option<&Template>,
    catalog: &OutputCatalog,
) -> Result<ManifestEntry> {
    let name = resolved.name();
    let connection = |r: &Resolved| -> Result<String> {
        let expr = connection_expr(r)
            .ok_or_else(|| Error::configuration(name, "no connection string to expose"))?;
        expr.evaluate_as(name, catalog)
    };

    match resolved {
        Resolved::Cache(_) | Resolved::Vault(_) => {
            let template = template.ok_or_else(|| {
                Error::configuration(name, "managed resource has no emitted template")
            })?;
            let mut params = IndexMap::new();
            for p in &template.parameters {
                if let Some(ref binding) = p.binding {
                    params.insert(p.name.clone(), binding.evaluate(catalog)?);
                }
            }
            Ok(ManifestEntry::Template(TemplateEntry {
                kind: TEMPLATE_TYPE.to_string(),
                connection_string: connection(resolved)?,
                path: template.path(),
                params,
            }))
        }
        Resolved::Container(container) => Ok(ManifestEntry::Container(ContainerEntry {
            kind: CONTAINER_TYPE.to_string(),
            connection_string: connection(resolved)?,
            image: container.spec.reference(),
            bindings: container
                .endpoints
                .iter()
                .map(|e| {
                    (
                        e.name.clone(),
                        BindingEntry {
                            scheme: e.scheme.clone(),
                            protocol: "tcp".to_string(),
                            transport: "tcp".to_string(),
                            target_port: e.target_port,
                            port: e.port,
                        },
                    )
                })
                .collect(),
        })),
        Resolved::Project(project) => {
            let mut env = IndexMap::new();
            for provider in &project.connections {
                let value = Expr::connection(provider).evaluate_as(name, catalog)?;
                env.insert(format!("ConnectionStrings__{}", provider), value);
            }
            Ok(ManifestEntry::Project(ProjectEntry {
                kind: PROJECT_TYPE.to_string(),
                path: project.path.clone(),
                env,
            }))
        }
    }
}
