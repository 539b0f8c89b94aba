//! KL-005: Provisioning resolver — turns a resource's annotations and edges
//! into one explicit decision record.
//!
//! For each resource, in order: deployment target (managed vs. container),
//! authentication mode (identity vs. access key), secret placement (inline
//! output vs. vault), and role scope (per-resource vs. shared environment).
//! Emitters and the manifest composer only read the result; they never look
//! at annotations again.

use super::annotation::{Annotation, AnnotationTag, VaultRef};
use super::error::{Error, Result};
use super::graph::{ReferenceRole, ResourceGraph, ResourceId};
use super::types::{AccessPolicy, ContainerSpec, DeploymentContext, Endpoint, ResourceKind, Sku};
use indexmap::IndexMap;
use std::collections::BTreeSet;

/// Default port of the cache container.
pub const CACHE_PORT: u16 = 6379;

/// Tag every emitted resource carries with its logical name.
pub const RESOURCE_NAME_TAG: &str = "keel-resource-name";

/// Who receives identity-based access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleScope {
    /// The deploying principal, bound per resource.
    PerResource,
    /// The identity of a shared hosting environment.
    Environment(String),
}

/// Vault that stores an access-key connection secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultBinding {
    pub name: String,
    /// Name derived as `<resource>-kv` rather than explicitly referenced.
    pub derived: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretPlacement {
    /// Connection string exposed as a template output.
    Inline,
    Vault(VaultBinding),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    Identity {
        scope: RoleScope,
        policies: Vec<AccessPolicy>,
    },
    AccessKey(SecretPlacement),
}

/// A managed cache after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCache {
    pub name: String,
    pub sku: Sku,
    pub auth: AuthMode,
    pub tags: IndexMap<String, String>,
}

/// A resource replaced by a local container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContainer {
    pub name: String,
    pub spec: ContainerSpec,
    pub endpoints: Vec<Endpoint>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVault {
    pub name: String,
    pub tags: IndexMap<String, String>,
    /// Owner when synthesised for a derived vault name.
    pub derived_for: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProject {
    pub name: String,
    pub path: String,
    /// Providers whose connection strings the project receives.
    pub connections: Vec<String>,
}

/// The final shape of one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Cache(ResolvedCache),
    Container(ResolvedContainer),
    Vault(ResolvedVault),
    Project(ResolvedProject),
}

impl Resolved {
    pub fn name(&self) -> &str {
        match self {
            Self::Cache(c) => &c.name,
            Self::Container(c) => &c.name,
            Self::Vault(v) => &v.name,
            Self::Project(p) => &p.name,
        }
    }
}

/// Derived default vault name for `resource`.
pub fn derived_vault_name(resource: &str) -> String {
    format!("{}-kv", resource)
}

/// Resolve every declared resource in deployment order. Vaults synthesised
/// for derived names follow their owner.
pub fn resolve_all(graph: &ResourceGraph, context: &DeploymentContext) -> Result<Vec<Resolved>> {
    let order = graph.deployment_order()?;
    let mut resolved = Vec::with_capacity(order.len());

    for id in order {
        let shape = resolve(graph, id, context)?;
        let synthesised = match &shape {
            Resolved::Cache(ResolvedCache {
                name,
                auth: AuthMode::AccessKey(SecretPlacement::Vault(vault)),
                ..
            }) if vault.derived => derived_vault(graph, name, &vault.name)?,
            _ => None,
        };
        resolved.push(shape);
        resolved.extend(synthesised);
    }

    tracing::debug!(count = resolved.len(), "resolved resource graph");
    Ok(resolved)
}

/// A vault to synthesise for `owner`, or `None` when it is declared.
fn derived_vault(graph: &ResourceGraph, owner: &str, vault: &str) -> Result<Option<Resolved>> {
    match graph.lookup(vault) {
        Ok(id) if graph.record(id)?.kind() == ResourceKind::KeyVault => Ok(None),
        Ok(id) => Err(Error::configuration(
            owner,
            format!(
                "derived vault name '{}' is taken by a {} resource",
                vault,
                graph.record(id)?.kind()
            ),
        )),
        Err(Error::NotFound(_)) => Ok(Some(Resolved::Vault(ResolvedVault {
            name: vault.to_string(),
            tags: IndexMap::new(),
            derived_for: Some(owner.to_string()),
        }))),
        Err(e) => Err(e),
    }
}

/// Resolve a single declared resource.
pub fn resolve(
    graph: &ResourceGraph,
    id: ResourceId,
    context: &DeploymentContext,
) -> Result<Resolved> {
    let record = graph.record(id)?;
    let name = record.name().to_string();
    check_applicable(graph, id, &name, record.kind())?;

    let shape = match record.kind() {
        ResourceKind::Cache => {
            let auth = resolve_auth(graph, id, &name, context)?;
            match record.substitute() {
                Some(sub) => Resolved::Container(resolve_container(graph, sub, &name)?),
                None => Resolved::Cache(ResolvedCache {
                    sku: resolve_sku(graph, id)?,
                    tags: resolve_tags(graph, id, &name)?,
                    auth,
                    name,
                }),
            }
        }
        ResourceKind::KeyVault => Resolved::Vault(ResolvedVault {
            tags: resolve_tags(graph, id, &name)?,
            derived_for: None,
            name,
        }),
        ResourceKind::Project => Resolved::Project(ResolvedProject {
            path: record.project_path().unwrap_or_default().to_string(),
            connections: project_connections(graph, id)?,
            name,
        }),
        ResourceKind::Container => {
            return Err(Error::configuration(
                name,
                "container substitutes are resolved through their original",
            ))
        }
    };

    tracing::debug!(resource = %shape.name(), ?shape, "resolved");
    Ok(shape)
}

/// Cache-only annotations on other kinds are configuration errors.
fn check_applicable(
    graph: &ResourceGraph,
    id: ResourceId,
    name: &str,
    kind: ResourceKind,
) -> Result<()> {
    let allowed: &[AnnotationTag] = match kind {
        ResourceKind::Cache | ResourceKind::Container => return Ok(()),
        ResourceKind::KeyVault => &[AnnotationTag::Tag],
        ResourceKind::Project => &[],
    };
    match graph.annotations(id)?.iter().find(|a| !allowed.contains(&a.tag())) {
        Some(a) => Err(Error::configuration(
            name,
            format!("'{}' does not apply to {} resources", a.tag(), kind),
        )),
        None => Ok(()),
    }
}

fn resolve_auth(
    graph: &ResourceGraph,
    id: ResourceId,
    name: &str,
    context: &DeploymentContext,
) -> Result<AuthMode> {
    let annotations = graph.annotations(id)?;
    let access_key = annotations.has(AnnotationTag::AccessKeyAuthentication);

    if access_key && annotations.has(AnnotationTag::DisableKeyAuthentication) {
        return Err(Error::conflict(
            name,
            &AnnotationTag::DisableKeyAuthentication.to_string(),
            &AnnotationTag::AccessKeyAuthentication.to_string(),
        ));
    }

    let vault = resolve_vault(graph, id, name)?;

    if !access_key {
        if vault.is_some() {
            return Err(Error::configuration(
                name,
                format!(
                    "'{}' requires '{}'",
                    AnnotationTag::KeyVault,
                    AnnotationTag::AccessKeyAuthentication
                ),
            ));
        }
        let scope = match &context.environment {
            Some(env) => RoleScope::Environment(env.clone()),
            None => RoleScope::PerResource,
        };
        return Ok(AuthMode::Identity {
            scope,
            policies: resolve_policies(graph, id)?,
        });
    }

    Ok(AuthMode::AccessKey(match vault {
        Some(v) => SecretPlacement::Vault(v),
        None => SecretPlacement::Inline,
    }))
}

/// An explicitly referenced vault always wins over the derived default,
/// whatever order the annotations were attached in.
fn resolve_vault(
    graph: &ResourceGraph,
    id: ResourceId,
    name: &str,
) -> Result<Option<VaultBinding>> {
    let mut explicit: Option<ResourceId> = None;
    let mut derived = false;

    for annotation in graph.query(id, AnnotationTag::KeyVault)? {
        match annotation {
            Annotation::KeyVault(VaultRef::Declared(vault)) => match explicit {
                Some(existing) if existing != *vault => {
                    return Err(Error::configuration(
                        name,
                        format!(
                            "key vaults '{}' and '{}' are both referenced",
                            graph.name(existing)?,
                            graph.name(*vault)?
                        ),
                    ))
                }
                _ => explicit = Some(*vault),
            },
            Annotation::KeyVault(VaultRef::Derived) => derived = true,
            _ => {}
        }
    }

    if let Some(vault) = explicit {
        let record = graph.record(vault)?;
        if record.kind() != ResourceKind::KeyVault {
            return Err(Error::configuration(
                name,
                format!("'{}' is a {}, not a key_vault", record.name(), record.kind()),
            ));
        }
        return Ok(Some(VaultBinding {
            name: record.name().to_string(),
            derived: false,
        }));
    }

    Ok(derived.then(|| VaultBinding {
        name: derived_vault_name(name),
        derived: true,
    }))
}

fn resolve_policies(graph: &ResourceGraph, id: ResourceId) -> Result<Vec<AccessPolicy>> {
    let mut policies = BTreeSet::new();
    for annotation in graph.query(id, AnnotationTag::RoleAssignment)? {
        if let Annotation::RoleAssignment(p) = annotation {
            policies.insert(*p);
        }
    }
    for edge in graph.references_to(id) {
        if let ReferenceRole::Access(p) = edge.role {
            policies.insert(p);
        }
    }
    if policies.is_empty() {
        policies.insert(AccessPolicy::DataContributor);
    }
    Ok(policies.into_iter().collect())
}

fn resolve_sku(graph: &ResourceGraph, id: ResourceId) -> Result<Sku> {
    Ok(graph
        .query(id, AnnotationTag::Sku)?
        .into_iter()
        .find_map(|a| match a {
            Annotation::Sku(sku) => Some(sku.clone()),
            _ => None,
        })
        .unwrap_or_default())
}

/// Tag annotations; a repeated key keeps its first position and last value.
fn resolve_tags(
    graph: &ResourceGraph,
    id: ResourceId,
    name: &str,
) -> Result<IndexMap<String, String>> {
    let mut tags = IndexMap::new();
    for annotation in graph.query(id, AnnotationTag::Tag)? {
        if let Annotation::Tag { key, value } = annotation {
            if key == RESOURCE_NAME_TAG {
                return Err(Error::configuration(
                    name,
                    format!("tag '{}' is reserved", RESOURCE_NAME_TAG),
                ));
            }
            tags.insert(key.clone(), value.clone());
        }
    }
    Ok(tags)
}

fn resolve_container(
    graph: &ResourceGraph,
    sub: ResourceId,
    name: &str,
) -> Result<ResolvedContainer> {
    let record = graph.record(sub)?;
    let mut endpoints: Vec<Endpoint> = graph
        .query(sub, AnnotationTag::Endpoint)?
        .into_iter()
        .filter_map(|a| match a {
            Annotation::Endpoint(e) => Some(e.clone()),
            _ => None,
        })
        .collect();
    for (i, endpoint) in endpoints.iter().enumerate() {
        if endpoints[..i].iter().any(|e| e.name == endpoint.name) {
            return Err(Error::configuration(
                name,
                format!("endpoint '{}' is declared more than once", endpoint.name),
            ));
        }
    }
    if endpoints.is_empty() {
        endpoints.push(Endpoint::tcp(CACHE_PORT));
    }
    Ok(ResolvedContainer {
        name: name.to_string(),
        spec: record.container().cloned().unwrap_or_default(),
        endpoints,
    })
}

fn project_connections(graph: &ResourceGraph, id: ResourceId) -> Result<Vec<String>> {
    let mut connections = Vec::new();
    for edge in graph.references().iter().filter(|r| r.consumer == id) {
        if matches!(edge.role, ReferenceRole::SecretStore) {
            continue;
        }
        let provider = graph.name(edge.provider)?.to_string();
        if !connections.contains(&provider) {
            connections.push(provider);
        }
    }
    Ok(connections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::annotation::AttachMode;

    fn cache_graph() -> (ResourceGraph, ResourceId) {
        let mut g = ResourceGraph::new();
        let id = g.declare("cache", ResourceKind::Cache).unwrap();
        (g, id)
    }

    fn cache_auth(g: &ResourceGraph, id: ResourceId, ctx: &DeploymentContext) -> AuthMode {
        match resolve(g, id, ctx).unwrap() {
            Resolved::Cache(c) => c.auth,
            other => panic!("expected cache, got {:?}", other),
        }
    }

    #[test]
    fn test_kl005_default_identity_per_resource() {
        let (g, id) = cache_graph();
        assert_eq!(
            cache_auth(&g, id, &DeploymentContext::default()),
            AuthMode::Identity {
                scope: RoleScope::PerResource,
                policies: vec![AccessPolicy::DataContributor],
            }
        );
    }

    #[test]
    fn test_kl005_identity_environment_scope() {
        let (g, id) = cache_graph();
        let ctx = DeploymentContext::with_environment("env");
        assert_eq!(
            cache_auth(&g, id, &ctx),
            AuthMode::Identity {
                scope: RoleScope::Environment("env".into()),
                policies: vec![AccessPolicy::DataContributor],
            }
        );
    }

    #[test]
    fn test_kl005_access_key_inline() {
        let (mut g, id) = cache_graph();
        g.with_access_key_authentication(id, None).unwrap();
        assert_eq!(
            cache_auth(&g, id, &DeploymentContext::default()),
            AuthMode::AccessKey(SecretPlacement::Inline)
        );
    }

    #[test]
    fn test_kl005_access_key_declared_vault() {
        let (mut g, id) = cache_graph();
        let kv = g.declare("secrets", ResourceKind::KeyVault).unwrap();
        g.with_access_key_authentication(id, Some(kv)).unwrap();
        assert_eq!(
            cache_auth(&g, id, &DeploymentContext::default()),
            AuthMode::AccessKey(SecretPlacement::Vault(VaultBinding {
                name: "secrets".into(),
                derived: false,
            }))
        );
    }

    #[test]
    fn test_kl005_explicit_vault_overrides_derived_either_order() {
        for derived_first in [true, false] {
            let (mut g, id) = cache_graph();
            let kv = g.declare("secrets", ResourceKind::KeyVault).unwrap();
            g.attach(id, Annotation::AccessKeyAuthentication, AttachMode::Add).unwrap();
            let derived = Annotation::KeyVault(VaultRef::Derived);
            let explicit = Annotation::KeyVault(VaultRef::Declared(kv));
            let (first, second) = if derived_first {
                (derived, explicit)
            } else {
                (explicit, derived)
            };
            g.attach(id, first, AttachMode::Add).unwrap();
            g.attach(id, second, AttachMode::Add).unwrap();
            assert_eq!(
                cache_auth(&g, id, &DeploymentContext::default()),
                AuthMode::AccessKey(SecretPlacement::Vault(VaultBinding {
                    name: "secrets".into(),
                    derived: false,
                }))
            );
        }
    }

    #[test]
    fn test_kl005_conflict_fails_fast() {
        let (mut g, id) = cache_graph();
        g.attach(id, Annotation::DisableKeyAuthentication, AttachMode::Add).unwrap();
        g.attach(id, Annotation::AccessKeyAuthentication, AttachMode::Add).unwrap();
        let err = resolve(&g, id, &DeploymentContext::default()).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        let msg = err.to_string();
        assert!(msg.contains("disable-key-authentication"));
        assert!(msg.contains("access-key-authentication"));
    }

    #[test]
    fn test_kl005_conflict_checked_under_container() {
        let (mut g, id) = cache_graph();
        g.run_as_container(id, ContainerSpec::default()).unwrap();
        g.attach(id, Annotation::DisableKeyAuthentication, AttachMode::Add).unwrap();
        g.attach(id, Annotation::AccessKeyAuthentication, AttachMode::Add).unwrap();
        assert!(resolve(&g, id, &DeploymentContext::default()).is_err());
    }

    #[test]
    fn test_kl005_vault_without_access_key() {
        let (mut g, id) = cache_graph();
        g.attach(id, Annotation::KeyVault(VaultRef::Derived), AttachMode::Add).unwrap();
        let err = resolve(&g, id, &DeploymentContext::default()).unwrap_err();
        assert!(err.to_string().contains("requires"));
    }

    #[test]
    fn test_kl005_vault_must_be_key_vault() {
        let (mut g, id) = cache_graph();
        let other = g.declare("other", ResourceKind::Cache).unwrap();
        g.attach(id, Annotation::AccessKeyAuthentication, AttachMode::Add).unwrap();
        g.attach(id, Annotation::KeyVault(VaultRef::Declared(other)), AttachMode::Add).unwrap();
        assert!(resolve(&g, id, &DeploymentContext::default()).is_err());
    }

    #[test]
    fn test_kl005_two_explicit_vaults_rejected() {
        let (mut g, id) = cache_graph();
        let a = g.declare("kva", ResourceKind::KeyVault).unwrap();
        let b = g.declare("kvb", ResourceKind::KeyVault).unwrap();
        g.with_access_key_authentication(id, Some(a)).unwrap();
        g.with_access_key_authentication(id, Some(b)).unwrap();
        let err = resolve(&g, id, &DeploymentContext::default()).unwrap_err();
        assert!(err.to_string().contains("both referenced"));
    }

    #[test]
    fn test_kl005_policies_union() {
        let (mut g, id) = cache_graph();
        let api = g.declare_project("api", "api.csproj").unwrap();
        g.attach(
            id,
            Annotation::RoleAssignment(AccessPolicy::DataReader),
            AttachMode::Add,
        )
        .unwrap();
        g.reference(api, id, ReferenceRole::Access(AccessPolicy::DataOwner)).unwrap();
        assert_eq!(
            cache_auth(&g, id, &DeploymentContext::default()),
            AuthMode::Identity {
                scope: RoleScope::PerResource,
                policies: vec![AccessPolicy::DataOwner, AccessPolicy::DataReader],
            }
        );
    }

    #[test]
    fn test_kl005_container_substitution() {
        let (mut g, id) = cache_graph();
        g.run_as_container(id, ContainerSpec::default()).unwrap();
        match resolve(&g, id, &DeploymentContext::default()).unwrap() {
            Resolved::Container(c) => {
                assert_eq!(c.name, "cache");
                assert_eq!(c.endpoints, vec![Endpoint::tcp(CACHE_PORT)]);
            }
            other => panic!("expected container, got {:?}", other),
        }
    }

    #[test]
    fn test_kl005_resolve_all_synthesises_derived_vault() {
        let (mut g, id) = cache_graph();
        g.with_access_key_authentication(id, None).unwrap();
        g.attach(id, Annotation::KeyVault(VaultRef::Derived), AttachMode::Add).unwrap();
        let all = resolve_all(&g, &DeploymentContext::default()).unwrap();
        let names: Vec<_> = all.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["cache", "cache-kv"]);
        assert!(matches!(
            &all[1],
            Resolved::Vault(ResolvedVault { derived_for: Some(owner), .. }) if owner == "cache"
        ));
    }

    #[test]
    fn test_kl005_derived_vault_declared_is_reused() {
        let (mut g, id) = cache_graph();
        g.declare("cache-kv", ResourceKind::KeyVault).unwrap();
        g.with_access_key_authentication(id, None).unwrap();
        g.attach(id, Annotation::KeyVault(VaultRef::Derived), AttachMode::Add).unwrap();
        let all = resolve_all(&g, &DeploymentContext::default()).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_kl005_derived_vault_name_taken() {
        let (mut g, id) = cache_graph();
        g.declare("cache-kv", ResourceKind::Cache).unwrap();
        g.with_access_key_authentication(id, None).unwrap();
        g.attach(id, Annotation::KeyVault(VaultRef::Derived), AttachMode::Add).unwrap();
        assert!(resolve_all(&g, &DeploymentContext::default()).is_err());
    }

    #[test]
    fn test_kl005_annotation_not_applicable() {
        let mut g = ResourceGraph::new();
        let kv = g.declare("vault", ResourceKind::KeyVault).unwrap();
        g.attach(kv, Annotation::AccessKeyAuthentication, AttachMode::Add).unwrap();
        let err = resolve(&g, kv, &DeploymentContext::default()).unwrap_err();
        assert!(err.to_string().contains("does not apply"));
    }

    #[test]
    fn test_kl005_project_connections() {
        let (mut g, cache) = cache_graph();
        let api = g.declare_project("api", "../Api/Api.csproj").unwrap();
        g.reference(api, cache, ReferenceRole::Connection).unwrap();
        g.reference(api, cache, ReferenceRole::Access(AccessPolicy::DataReader)).unwrap();
        match resolve(&g, api, &DeploymentContext::default()).unwrap() {
            Resolved::Project(p) => {
                assert_eq!(p.path, "../Api/Api.csproj");
                assert_eq!(p.connections, vec!["cache"]);
            }
            other => panic!("expected project, got {:?}", other),
        }
    }

    #[test]
    fn test_kl005_reserved_tag_rejected() {
        let (mut g, id) = cache_graph();
        let tag = Annotation::Tag {
            key: RESOURCE_NAME_TAG.into(),
            value: "x".into(),
        };
        g.attach(id, tag.clone(), AttachMode::Add).unwrap();
        let err = resolve(&g, id, &DeploymentContext::default()).unwrap_err();
        assert!(err.to_string().contains("tag 'keel-resource-name' is reserved"));

        let kv = g.declare("vault", ResourceKind::KeyVault).unwrap();
        g.attach(kv, tag, AttachMode::Add).unwrap();
        assert!(resolve(&g, kv, &DeploymentContext::default()).is_err());
    }

    #[test]
    fn test_kl005_duplicate_endpoint_names_rejected() {
        let (mut g, id) = cache_graph();
        g.run_as_container(id, ContainerSpec::default()).unwrap();
        let mut second = Endpoint::tcp(6380);
        second.port = Some(16380);
        g.attach(id, Annotation::Endpoint(Endpoint::tcp(CACHE_PORT)), AttachMode::Add).unwrap();
        g.attach(id, Annotation::Endpoint(second), AttachMode::Add).unwrap();
        let err = resolve(&g, id, &DeploymentContext::default()).unwrap_err();
        assert!(err.to_string().contains("endpoint 'tcp' is declared more than once"));
    }
}
