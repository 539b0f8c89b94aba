//! KL-011: YAML parsing, validation and graph construction.
//!
//! Parses keel.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - References and key_vault targets must exist
//! - Containers are never declared directly
//! - Required fields per resource kind

use super::annotation::{Annotation, AttachMode, VaultRef};
use super::error::{Error, Result};
use super::graph::{is_valid_name, normalized_name, ReferenceRole, ResourceGraph};
use super::resolver::RESOURCE_NAME_TAG;
use super::types::*;
use std::path::Path;

/// `key_vault` value that asks for the derived `<name>-kv` vault.
pub const DEFAULT_VAULT: &str = "default";

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a keel.yaml file from disk.
pub fn parse_app_file(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_app(&content)
}

/// Parse a keel.yaml from a string.
pub fn parse_app(yaml: &str) -> Result<AppConfig> {
    Ok(serde_yaml_ng::from_str(yaml)?)
}

/// Validate a parsed app. Returns a list of errors (empty = valid).
pub fn validate_app(app: &AppConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ValidationError { message });

    if app.version != "1.0" {
        push(format!("version must be \"1.0\", got \"{}\"", app.version));
    }
    if app.name.is_empty() {
        push("name must not be empty".to_string());
    }
    if let Some(ref env) = app.context.environment {
        if !is_valid_name(env) {
            push(format!(
                "context environment '{}' must start with a letter and contain only letters, \
                 digits and inner hyphens",
                env
            ));
        }
        if app.resources.contains_key(env) {
            push(format!(
                "context environment '{}' collides with a declared resource",
                env
            ));
        }
    }

    for (i, (id, decl)) in app.resources.iter().enumerate() {
        if !is_valid_name(id) {
            push(format!(
                "resource '{}' must start with a letter and contain only letters, digits and \
                 inner hyphens",
                id
            ));
        }
        let normalized = normalized_name(id);
        let clash = app.resources.keys().take(i).find(|n| normalized_name(n) == normalized);
        if let Some(earlier) = clash {
            push(format!(
                "resource '{}' collides with '{}' once case and hyphens are ignored",
                id, earlier
            ));
        }
        for message in validate_resource(app, id, decl) {
            push(message);
        }
    }

    errors
}

fn validate_resource(app: &AppConfig, id: &str, decl: &ResourceDecl) -> Vec<String> {
    let mut errors = Vec::new();
    let kind = decl.kind;

    if kind == ResourceKind::KeyVault && id == DEFAULT_VAULT {
        errors.push(format!(
            "resource '{}' uses a reserved name; `key_vault: {}` selects the derived vault",
            id, DEFAULT_VAULT
        ));
    }
    if decl.tags.contains_key(RESOURCE_NAME_TAG) {
        errors.push(format!("resource '{}' sets reserved tag '{}'", id, RESOURCE_NAME_TAG));
    }

    if kind == ResourceKind::Container {
        errors.push(format!(
            "resource '{}' cannot be declared as a container; set `container` on a cache",
            id
        ));
        return errors;
    }

    if kind != ResourceKind::Cache {
        for (field, set) in [
            ("access_key", decl.access_key),
            ("disable_key_auth", decl.disable_key_auth),
            ("key_vault", decl.key_vault.is_some()),
            ("sku", decl.sku.is_some()),
            ("roles", !decl.roles.is_empty()),
            ("container", decl.container.is_some()),
            ("endpoints", !decl.endpoints.is_empty()),
        ] {
            if set {
                errors.push(format!("resource '{}' ({}) does not support '{}'", id, kind, field));
            }
        }
    }

    match kind {
        ResourceKind::Cache => {
            if decl.access_key && decl.disable_key_auth {
                errors.push(format!(
                    "resource '{}' sets both access_key and disable_key_auth",
                    id
                ));
            }
            if decl.key_vault.is_some() && !decl.access_key {
                errors.push(format!("resource '{}' sets key_vault without access_key", id));
            }
            if let Some(ref vault) = decl.key_vault {
                if vault != DEFAULT_VAULT {
                    match app.resources.get(vault) {
                        None => errors.push(format!(
                            "resource '{}' references unknown key vault '{}'",
                            id, vault
                        )),
                        Some(target) if target.kind != ResourceKind::KeyVault => {
                            errors.push(format!(
                                "resource '{}' key_vault '{}' is a {}, not a key_vault",
                                id, vault, target.kind
                            ))
                        }
                        Some(_) => {}
                    }
                }
            }
            if !decl.endpoints.is_empty() && decl.container.is_none() {
                errors.push(format!(
                    "resource '{}' declares endpoints but does not run as a container",
                    id
                ));
            }
            for (i, endpoint) in decl.endpoints.iter().enumerate() {
                if decl.endpoints[..i].iter().any(|e| e.name == endpoint.name) {
                    errors.push(format!(
                        "resource '{}' declares endpoint '{}' more than once",
                        id, endpoint.name
                    ));
                }
            }
        }
        ResourceKind::Project => {
            if decl.path.as_deref().is_none_or(str::is_empty) {
                errors.push(format!("resource '{}' (project) has no path", id));
            }
            if !decl.tags.is_empty() {
                errors.push(format!("resource '{}' (project) does not support 'tags'", id));
            }
        }
        ResourceKind::KeyVault | ResourceKind::Container => {}
    }

    if !decl.references.is_empty() && kind != ResourceKind::Project {
        errors.push(format!(
            "resource '{}' ({}) cannot reference other resources",
            id, kind
        ));
    }
    for reference in &decl.references {
        let target = reference.resource();
        match app.resources.get(target) {
            None => errors.push(format!(
                "resource '{}' references unknown resource '{}'",
                id, target
            )),
            Some(provider) if provider.kind == ResourceKind::Project => errors.push(format!(
                "resource '{}' references project '{}', which exposes no connection string",
                id, target
            )),
            Some(provider) => {
                if reference.role().is_some() && provider.kind != ResourceKind::Cache {
                    errors.push(format!(
                        "resource '{}' requests a role on '{}', which is not a cache",
                        id, target
                    ));
                }
            }
        }
        if target == id {
            errors.push(format!("resource '{}' references itself", id));
        }
    }

    errors
}

/// Build the resource graph for a parsed app. Every resource is declared
/// first so annotations and references may point forward.
pub fn build_graph(app: &AppConfig) -> Result<ResourceGraph> {
    let mut graph = ResourceGraph::new();

    for (name, decl) in &app.resources {
        match decl.kind {
            ResourceKind::Project => {
                let path = decl
                    .path
                    .as_deref()
                    .ok_or_else(|| Error::configuration(name, "project has no path"))?;
                graph.declare_project(name, path)?;
            }
            ResourceKind::KeyVault if name == DEFAULT_VAULT => {
                return Err(Error::configuration(
                    name,
                    "reserved name; `key_vault: default` selects the derived vault",
                ));
            }
            kind => {
                graph.declare(name, kind)?;
            }
        }
    }

    for (name, decl) in &app.resources {
        let id = graph.lookup(name)?;
        apply_modifiers(&mut graph, name, decl)?;
        for reference in &decl.references {
            let provider = graph.lookup(reference.resource())?;
            let role = match reference.role() {
                Some(policy) => ReferenceRole::Access(policy),
                None => ReferenceRole::Connection,
            };
            graph.reference(id, provider, role)?;
        }
    }

    tracing::debug!(resources = graph.len(), "built resource graph");
    Ok(graph)
}

fn apply_modifiers(graph: &mut ResourceGraph, name: &str, decl: &ResourceDecl) -> Result<()> {
    let id = graph.lookup(name)?;

    let vault = match decl.key_vault.as_deref() {
        None => None,
        Some(DEFAULT_VAULT) => Some(VaultRef::Derived),
        Some(other) => Some(VaultRef::Declared(graph.lookup(other)?)),
    };
    match (decl.access_key, vault) {
        (true, Some(VaultRef::Declared(v))) => graph.with_access_key_authentication(id, Some(v))?,
        (true, derived) => {
            graph.with_access_key_authentication(id, None)?;
            if let Some(derived) = derived {
                graph.attach(id, Annotation::KeyVault(derived), AttachMode::Add)?;
            }
        }
        // The resolver reports a vault without access keys.
        (false, Some(v)) => graph.attach(id, Annotation::KeyVault(v), AttachMode::Add)?,
        (false, None) => {}
    }

    if decl.disable_key_auth {
        graph.attach(id, Annotation::DisableKeyAuthentication, AttachMode::Add)?;
    }
    if let Some(ref sku) = decl.sku {
        graph.attach(id, Annotation::Sku(sku.clone()), AttachMode::Add)?;
    }
    for policy in &decl.roles {
        graph.attach(id, Annotation::RoleAssignment(*policy), AttachMode::Add)?;
    }
    for (key, value) in &decl.tags {
        graph.attach(
            id,
            Annotation::Tag {
                key: key.clone(),
                value: value.clone(),
            },
            AttachMode::Add,
        )?;
    }
    if let Some(ref spec) = decl.container {
        graph.run_as_container(id, spec.clone())?;
    }
    for endpoint in &decl.endpoints {
        graph.attach(id, Annotation::Endpoint(endpoint.clone()), AttachMode::Add)?;
    }
    Ok(())
}
