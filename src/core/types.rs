//! KL-001: Shared types — the YAML app model and the value types that
//! annotations, the resolver and the emitters all speak.
//!
//! All app-model types derive Serialize/Deserialize for YAML roundtripping.
//! Maps are `IndexMap` so declaration order survives into the output.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Top-level keel.yaml
// ============================================================================

/// Root app model: the declared resource graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Application name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Pre-existing infrastructure the deployment lands in
    #[serde(default)]
    pub context: DeploymentContext,

    /// Resource declarations (order-preserving)
    #[serde(default)]
    pub resources: IndexMap<String, ResourceDecl>,
}

/// Externally supplied deployment context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentContext {
    /// Name of a shared container-hosting environment. When set, identity
    /// access is granted to the environment's identity instead of the
    /// deploying principal.
    #[serde(default)]
    pub environment: Option<String>,
}

impl DeploymentContext {
    pub fn with_environment(name: impl Into<String>) -> Self {
        Self {
            environment: Some(name.into()),
        }
    }
}

// ============================================================================
// Resources
// ============================================================================

/// A single declared resource in keel.yaml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDecl {
    /// Resource kind
    #[serde(rename = "type")]
    pub kind: ResourceKind,

    // -- Cache fields --
    /// Use access keys instead of identity-based access
    #[serde(default)]
    pub access_key: bool,

    /// Explicitly forbid access keys
    #[serde(default)]
    pub disable_key_auth: bool,

    /// Vault for the connection secret: a declared key_vault name or "default"
    #[serde(default)]
    pub key_vault: Option<String>,

    /// Pricing tier
    #[serde(default)]
    pub sku: Option<Sku>,

    /// Extra access policies granted under identity auth
    #[serde(default)]
    pub roles: Vec<AccessPolicy>,

    /// Run locally as a container instead of the managed service
    #[serde(default)]
    pub container: Option<ContainerSpec>,

    /// Endpoints exposed when running as a container
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,

    /// Extra resource tags
    #[serde(default)]
    pub tags: IndexMap<String, String>,

    // -- Project fields --
    /// Project file path
    #[serde(default)]
    pub path: Option<String>,

    /// Resources this one consumes
    #[serde(default)]
    pub references: Vec<ReferenceDecl>,
}

/// Resource kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Cache,
    KeyVault,
    Project,
    Container,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cache => write!(f, "cache"),
            Self::KeyVault => write!(f, "key_vault"),
            Self::Project => write!(f, "project"),
            Self::Container => write!(f, "container"),
        }
    }
}

/// A reference from a consumer to a provider in keel.yaml: a bare name or
/// a name with an access policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReferenceDecl {
    Name(String),
    Detailed {
        resource: String,
        #[serde(default)]
        role: Option<AccessPolicy>,
    },
}

impl ReferenceDecl {
    pub fn resource(&self) -> &str {
        match self {
            Self::Name(n) => n,
            Self::Detailed { resource, .. } => resource,
        }
    }

    pub fn role(&self) -> Option<AccessPolicy> {
        match self {
            Self::Name(_) => None,
            Self::Detailed { role, .. } => *role,
        }
    }
}

// ============================================================================
// Modifier values
// ============================================================================

/// Data-plane access policy on a cache. Ordered strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessPolicy {
    DataOwner,
    DataContributor,
    DataReader,
}

impl AccessPolicy {
    /// Suffix for the assignment's Bicep symbol.
    pub fn symbol_suffix(&self) -> &'static str {
        match self {
            Self::DataOwner => "owner",
            Self::DataContributor => "contributor",
            Self::DataReader => "reader",
        }
    }
}

impl fmt::Display for AccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataOwner => write!(f, "Data Owner"),
            Self::DataContributor => write!(f, "Data Contributor"),
            Self::DataReader => write!(f, "Data Reader"),
        }
    }
}

/// Cache pricing tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sku {
    #[serde(default = "default_sku_name")]
    pub name: String,

    #[serde(default = "default_sku_family")]
    pub family: String,

    #[serde(default = "default_sku_capacity")]
    pub capacity: u32,
}

impl Default for Sku {
    fn default() -> Self {
        Self {
            name: default_sku_name(),
            family: default_sku_family(),
            capacity: default_sku_capacity(),
        }
    }
}

fn default_sku_name() -> String {
    "Basic".to_string()
}

fn default_sku_family() -> String {
    "C".to_string()
}

fn default_sku_capacity() -> u32 {
    1
}

/// Image used when a resource runs as a local container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    #[serde(default = "default_image")]
    pub image: String,

    #[serde(default = "default_tag")]
    pub tag: String,
}

impl Default for ContainerSpec {
    fn default() -> Self {
        Self {
            image: default_image(),
            tag: default_tag(),
        }
    }
}

impl ContainerSpec {
    /// Full image reference (`image:tag`).
    pub fn reference(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

fn default_image() -> String {
    "docker.io/library/redis".to_string()
}

fn default_tag() -> String {
    "7.4".to_string()
}

/// Desired network endpoint of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,

    #[serde(default = "default_scheme")]
    pub scheme: String,

    pub target_port: u16,

    /// Host port; assigned by the orchestrator when absent
    #[serde(default)]
    pub port: Option<u16>,
}

impl Endpoint {
    /// The cache's default `tcp` endpoint on 6379.
    pub fn tcp(target_port: u16) -> Self {
        Self {
            name: "tcp".to_string(),
            scheme: default_scheme(),
            target_port,
            port: None,
        }
    }
}

fn default_scheme() -> String {
    "tcp".to_string()
}
