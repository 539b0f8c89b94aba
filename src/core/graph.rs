//! KL-003: Resource graph — an arena of resource records plus typed
//! consumer → provider references.
//!
//! Records are addressed by `ResourceId`. A container substitute is a second
//! record that shares the original's annotation set, so annotations attached
//! through either handle, before or after substitution, land in one place.
//! Deployment order is Kahn's algorithm with alphabetical tie-breaking.

use super::annotation::{Annotation, AnnotationSet, AnnotationTag, AttachMode, VaultRef};
use super::error::{Error, Result};
use super::types::{AccessPolicy, ContainerSpec, ResourceKind};
use indexmap::IndexMap;
use regex::Regex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::LazyLock;

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z]([a-zA-Z0-9-]*[a-zA-Z0-9])?$").unwrap());

/// Letters, digits and inner hyphens, starting with a letter.
pub fn is_valid_name(name: &str) -> bool {
    NAME_PATTERN.is_match(name)
}

/// Lowercased alphanumerics of `name`. Physical names and secret keys are
/// derived from this form, so two resources must never share it.
pub fn normalized_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Stable handle into the graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(usize);

/// What a reference is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceRole {
    /// Consumer receives the provider's connection string.
    Connection,
    /// Connection string plus a data-plane access policy on the provider.
    Access(AccessPolicy),
    /// Provider stores the consumer's secrets.
    SecretStore,
}

/// A typed consumer → provider edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub consumer: ResourceId,
    pub provider: ResourceId,
    pub role: ReferenceRole,
}

/// One record in the arena.
#[derive(Debug, Clone)]
pub struct ResourceRecord {
    name: String,
    kind: ResourceKind,
    annotations: usize,
    project_path: Option<String>,
    container: Option<ContainerSpec>,
    /// Container record standing in for this one.
    substitute: Option<ResourceId>,
    /// Original record this container realises.
    realizes: Option<ResourceId>,
}

impl ResourceRecord {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn project_path(&self) -> Option<&str> {
        self.project_path.as_deref()
    }

    pub fn container(&self) -> Option<&ContainerSpec> {
        self.container.as_ref()
    }

    pub fn substitute(&self) -> Option<ResourceId> {
        self.substitute
    }

    pub fn realizes(&self) -> Option<ResourceId> {
        self.realizes
    }
}

/// The declared resources of one generation run.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    records: Vec<ResourceRecord>,
    annotation_sets: Vec<AnnotationSet>,
    names: IndexMap<String, ResourceId>,
    references: Vec<Reference>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a resource. Names are unique; containers are only created
    /// through [`ResourceGraph::run_as_container`].
    pub fn declare(&mut self, name: &str, kind: ResourceKind) -> Result<ResourceId> {
        if kind == ResourceKind::Container {
            return Err(Error::configuration(
                name,
                "containers are declared by substituting an existing resource",
            ));
        }
        if !is_valid_name(name) {
            return Err(Error::configuration(
                name,
                "names must start with a letter and contain only letters, digits and inner hyphens",
            ));
        }
        if self.names.contains_key(name) {
            return Err(Error::configuration(name, "resource already declared"));
        }
        let normalized = normalized_name(name);
        if let Some(existing) = self.names.keys().find(|n| normalized_name(n) == normalized) {
            return Err(Error::configuration(
                name,
                format!("name collides with '{}' once case and hyphens are ignored", existing),
            ));
        }
        let id = self.push_record(name, kind, None);
        self.names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Declare a project consumer with its project file path.
    pub fn declare_project(&mut self, name: &str, path: &str) -> Result<ResourceId> {
        let id = self.declare(name, ResourceKind::Project)?;
        self.records[id.0].project_path = Some(path.to_string());
        Ok(id)
    }

    fn push_record(
        &mut self,
        name: &str,
        kind: ResourceKind,
        annotations: Option<usize>,
    ) -> ResourceId {
        let annotations = annotations.unwrap_or_else(|| {
            self.annotation_sets.push(AnnotationSet::default());
            self.annotation_sets.len() - 1
        });
        self.records.push(ResourceRecord {
            name: name.to_string(),
            kind,
            annotations,
            project_path: None,
            container: None,
            substitute: None,
            realizes: None,
        });
        ResourceId(self.records.len() - 1)
    }

    pub fn lookup(&self, name: &str) -> Result<ResourceId> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    pub fn record(&self, id: ResourceId) -> Result<&ResourceRecord> {
        self.records
            .get(id.0)
            .ok_or_else(|| Error::NotFound(format!("#{}", id.0)))
    }

    pub fn name(&self, id: ResourceId) -> Result<&str> {
        Ok(self.record(id)?.name())
    }

    /// Declared resources in declaration order (substitutes excluded).
    pub fn declared(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.names.values().copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    // ------------------------------------------------------------------
    // Annotations
    // ------------------------------------------------------------------

    pub fn attach(
        &mut self,
        id: ResourceId,
        annotation: Annotation,
        mode: AttachMode,
    ) -> Result<()> {
        let record = self.record(id)?;
        let set = record.annotations;
        let owner = record.name.clone();
        self.annotation_sets[set].attach(&owner, annotation, mode)
    }

    pub fn query(&self, id: ResourceId, tag: AnnotationTag) -> Result<Vec<&Annotation>> {
        Ok(self.annotations(id)?.query(tag))
    }

    pub fn annotations(&self, id: ResourceId) -> Result<&AnnotationSet> {
        let set = self.record(id)?.annotations;
        Ok(&self.annotation_sets[set])
    }

    /// Use access keys; with `vault` the secret goes to that declared vault.
    pub fn with_access_key_authentication(
        &mut self,
        id: ResourceId,
        vault: Option<ResourceId>,
    ) -> Result<()> {
        self.attach(id, Annotation::AccessKeyAuthentication, AttachMode::Replace)?;
        if let Some(vault) = vault {
            self.attach(id, Annotation::KeyVault(VaultRef::Declared(vault)), AttachMode::Add)?;
            self.reference(id, vault, ReferenceRole::SecretStore)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Substitution
    // ------------------------------------------------------------------

    /// Run `id` as a local container. Returns the substitute's handle, which
    /// aliases the original's annotations. A second call replaces the spec.
    pub fn run_as_container(&mut self, id: ResourceId, spec: ContainerSpec) -> Result<ResourceId> {
        let record = self.record(id)?;
        if record.realizes.is_some() {
            return Err(Error::configuration(&record.name, "already a container substitute"));
        }
        if record.kind != ResourceKind::Cache {
            return Err(Error::configuration(
                &record.name,
                format!("{} resources cannot run as a container", record.kind),
            ));
        }
        if let Some(existing) = record.substitute {
            self.records[existing.0].container = Some(spec);
            return Ok(existing);
        }
        let name = record.name.clone();
        let set = record.annotations;
        let sub = self.push_record(&name, ResourceKind::Container, Some(set));
        self.records[sub.0].container = Some(spec);
        self.records[sub.0].realizes = Some(id);
        self.records[id.0].substitute = Some(sub);
        Ok(sub)
    }

    /// The node that is actually deployed for `id`.
    pub fn effective(&self, id: ResourceId) -> Result<ResourceId> {
        Ok(self.record(id)?.substitute.unwrap_or(id))
    }

    /// Original declared handle for `id` (itself unless a substitute).
    fn canonical(&self, id: ResourceId) -> Result<ResourceId> {
        Ok(self.record(id)?.realizes.unwrap_or(id))
    }

    // ------------------------------------------------------------------
    // References
    // ------------------------------------------------------------------

    /// Record a consumer → provider edge. Both ends must be declared and the
    /// edge must not close a cycle.
    pub fn reference(
        &mut self,
        consumer: ResourceId,
        provider: ResourceId,
        role: ReferenceRole,
    ) -> Result<()> {
        let consumer = self.canonical(consumer)?;
        let provider = self.canonical(provider)?;
        let consumer_name = self.name(consumer)?.to_string();
        if consumer == provider {
            return Err(Error::configuration(consumer_name, "resource references itself"));
        }
        if self.reaches(provider, consumer) {
            return Err(Error::configuration(
                consumer_name,
                format!("reference to '{}' would create a cycle", self.name(provider)?),
            ));
        }
        let target = self.record(provider)?;
        if target.kind == ResourceKind::Project {
            return Err(Error::configuration(
                consumer_name,
                format!("'{}' is a project and exposes no connection string", target.name),
            ));
        }
        let edge = Reference {
            consumer,
            provider,
            role,
        };
        if !self.references.contains(&edge) {
            self.references.push(edge);
        }
        Ok(())
    }

    fn reaches(&self, from: ResourceId, to: ResourceId) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if seen.insert(current) {
                stack.extend(
                    self.references
                        .iter()
                        .filter(|r| r.consumer == current)
                        .map(|r| r.provider),
                );
            }
        }
        false
    }

    /// Providers referenced by `id`, first-reference order, no duplicates.
    pub fn neighbors(&self, id: ResourceId) -> Result<Vec<ResourceId>> {
        let id = self.canonical(id)?;
        let mut out = Vec::new();
        for r in self.references.iter().filter(|r| r.consumer == id) {
            if !out.contains(&r.provider) {
                out.push(r.provider);
            }
        }
        Ok(out)
    }

    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    /// Edges whose provider is `id`.
    pub fn references_to(&self, id: ResourceId) -> impl Iterator<Item = &Reference> + '_ {
        self.references.iter().filter(move |r| r.provider == id)
    }

    /// Topological order over declared resources (providers first).
    pub fn deployment_order(&self) -> Result<Vec<ResourceId>> {
        let mut in_degree: HashMap<ResourceId, usize> =
            self.declared().map(|id| (id, 0)).collect();
        let mut adjacency: HashMap<ResourceId, Vec<ResourceId>> =
            self.declared().map(|id| (id, Vec::new())).collect();

        for r in &self.references {
            if let Some(dependents) = adjacency.get_mut(&r.provider) {
                dependents.push(r.consumer);
            }
            if let Some(degree) = in_degree.get_mut(&r.consumer) {
                *degree += 1;
            }
        }

        let by_name = |ids: &mut Vec<ResourceId>| {
            ids.sort_by(|a, b| self.records[a.0].name.cmp(&self.records[b.0].name))
        };

        let mut ready: Vec<ResourceId> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(id, _)| *id)
            .collect();
        by_name(&mut ready);
        let mut queue: VecDeque<ResourceId> = ready.into();

        let mut order = Vec::new();
        while let Some(current) = queue.pop_front() {
            order.push(current);
            let mut next_ready = Vec::new();
            for dependent in adjacency.get(&current).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        next_ready.push(*dependent);
                    }
                }
            }
            by_name(&mut next_ready);
            queue.extend(next_ready);
        }

        if order.len() != self.len() {
            let mut stuck: Vec<&str> = self
                .declared()
                .filter(|id| !order.contains(id))
                .map(|id| self.records[id.0].name.as_str())
                .collect();
            stuck.sort();
            return Err(Error::configuration(
                stuck.join(", "),
                "reference cycle between resources",
            ));
        }
        Ok(order)
    }
}
