//! KL-002: Annotation store — typed facts attached to a resource.
//!
//! Insertion order is kept for enumeration. Exclusive tags hold at most one
//! annotation; the caller says whether a second attach replaces or fails.

use super::error::{Error, Result};
use super::graph::ResourceId;
use super::types::{AccessPolicy, Endpoint, Sku};
use std::fmt;

/// Where an access-key connection secret should be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultRef {
    /// A key vault declared in the graph.
    Declared(ResourceId),
    /// `<resource>-kv`, synthesised when not declared.
    Derived,
}

/// A typed fact attached to a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Annotation {
    AccessKeyAuthentication,
    DisableKeyAuthentication,
    KeyVault(VaultRef),
    Sku(Sku),
    Endpoint(Endpoint),
    RoleAssignment(AccessPolicy),
    Tag { key: String, value: String },
}

impl Annotation {
    pub fn tag(&self) -> AnnotationTag {
        match self {
            Self::AccessKeyAuthentication => AnnotationTag::AccessKeyAuthentication,
            Self::DisableKeyAuthentication => AnnotationTag::DisableKeyAuthentication,
            Self::KeyVault(_) => AnnotationTag::KeyVault,
            Self::Sku(_) => AnnotationTag::Sku,
            Self::Endpoint(_) => AnnotationTag::Endpoint,
            Self::RoleAssignment(_) => AnnotationTag::RoleAssignment,
            Self::Tag { .. } => AnnotationTag::Tag,
        }
    }
}

/// Annotation discriminant used for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnnotationTag {
    AccessKeyAuthentication,
    DisableKeyAuthentication,
    KeyVault,
    Sku,
    Endpoint,
    RoleAssignment,
    Tag,
}

impl AnnotationTag {
    /// Exclusive tags allow a single instance per resource.
    pub fn is_exclusive(&self) -> bool {
        matches!(
            self,
            Self::AccessKeyAuthentication | Self::DisableKeyAuthentication | Self::Sku
        )
    }
}

impl fmt::Display for AnnotationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccessKeyAuthentication => write!(f, "access-key-authentication"),
            Self::DisableKeyAuthentication => write!(f, "disable-key-authentication"),
            Self::KeyVault => write!(f, "key-vault"),
            Self::Sku => write!(f, "sku"),
            Self::Endpoint => write!(f, "endpoint"),
            Self::RoleAssignment => write!(f, "role-assignment"),
            Self::Tag => write!(f, "tag"),
        }
    }
}

/// Caller intent when attaching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachMode {
    /// Append; rejected if the tag is exclusive and already present.
    Add,
    /// Drop every prior annotation with the same tag, then append.
    Replace,
}

/// Ordered annotations of one resource record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationSet {
    items: Vec<Annotation>,
}

impl AnnotationSet {
    /// Attach an annotation. `owner` names the resource in errors.
    pub fn attach(&mut self, owner: &str, annotation: Annotation, mode: AttachMode) -> Result<()> {
        let tag = annotation.tag();
        match mode {
            AttachMode::Add => {
                if tag.is_exclusive() && self.has(tag) {
                    return Err(Error::configuration(
                        owner,
                        format!("'{}' is already attached", tag),
                    ));
                }
            }
            AttachMode::Replace => self.items.retain(|a| a.tag() != tag),
        }
        self.items.push(annotation);
        Ok(())
    }

    /// Annotations with `tag`, in attachment order.
    pub fn query(&self, tag: AnnotationTag) -> Vec<&Annotation> {
        self.items.iter().filter(|a| a.tag() == tag).collect()
    }

    pub fn has(&self, tag: AnnotationTag) -> bool {
        self.items.iter().any(|a| a.tag() == tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kl002_add_appends_in_order() {
        let mut set = AnnotationSet::default();
        set.attach(
            "c",
            Annotation::RoleAssignment(AccessPolicy::DataReader),
            AttachMode::Add,
        )
        .unwrap();
        set.attach(
            "c",
            Annotation::RoleAssignment(AccessPolicy::DataOwner),
            AttachMode::Add,
        )
        .unwrap();
        let roles = set.query(AnnotationTag::RoleAssignment);
        assert_eq!(roles.len(), 2);
        assert_eq!(roles[0], &Annotation::RoleAssignment(AccessPolicy::DataReader));
    }

    #[test]
    fn test_kl002_exclusive_add_rejected() {
        let mut set = AnnotationSet::default();
        set.attach("c", Annotation::AccessKeyAuthentication, AttachMode::Add).unwrap();
        let err = set
            .attach("c", Annotation::AccessKeyAuthentication, AttachMode::Add)
            .unwrap_err();
        assert!(err.to_string().contains("already attached"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_kl002_exclusive_replace() {
        let mut set = AnnotationSet::default();
        set.attach("c", Annotation::Sku(Sku::default()), AttachMode::Add).unwrap();
        let premium = Sku {
            name: "Premium".into(),
            family: "P".into(),
            capacity: 3,
        };
        set.attach("c", Annotation::Sku(premium.clone()), AttachMode::Replace).unwrap();
        assert_eq!(set.query(AnnotationTag::Sku), vec![&Annotation::Sku(premium)]);
    }

    #[test]
    fn test_kl002_non_exclusive_duplicates_kept() {
        let mut set = AnnotationSet::default();
        let tag = Annotation::Tag {
            key: "team".into(),
            value: "core".into(),
        };
        set.attach("c", tag.clone(), AttachMode::Add).unwrap();
        set.attach("c", tag, AttachMode::Add).unwrap();
        assert_eq!(set.query(AnnotationTag::Tag).len(), 2);
    }

    #[test]
    fn test_kl002_query_missing_is_empty() {
        let set = AnnotationSet::default();
        assert!(set.query(AnnotationTag::KeyVault).is_empty());
        assert!(set.is_empty());
    }

    #[test]
    fn test_kl002_tag_display() {
        assert_eq!(
            AnnotationTag::DisableKeyAuthentication.to_string(),
            "disable-key-authentication"
        );
        assert!(!AnnotationTag::KeyVault.is_exclusive());
    }
}
