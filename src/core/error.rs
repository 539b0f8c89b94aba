//! KL-000: Error taxonomy for graph construction, resolution and emission.
//!
//! Every failure aborts generation for the whole graph. Nothing here is
//! retryable: identical input yields the identical error.

use std::path::PathBuf;

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building, resolving or emitting a resource graph.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Conflicting or missing annotations, invalid names, bad references.
    #[error("configuration error on '{resource}': {message}")]
    Configuration { resource: String, message: String },

    /// An expression names an output that no resource will produce.
    #[error("unresolved reference {token}: {reason}")]
    UnresolvedReference { token: String, reason: String },

    /// A connection expression transitively references itself.
    #[error("cyclic expression: {}", .cycle.join(" -> "))]
    CyclicExpression { cycle: Vec<String> },

    /// Lookup against a resource that was never declared.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Malformed token text or app model.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn configuration(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Two annotations that cannot coexist on one resource.
    pub fn conflict(resource: impl Into<String>, first: &str, second: &str) -> Self {
        Self::Configuration {
            resource: resource.into(),
            message: format!("'{}' conflicts with '{}'", first, second),
        }
    }

    pub fn unresolved(token: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnresolvedReference {
            token: token.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kl000_conflict_names_both() {
        let e = Error::conflict(
            "cache",
            "disable-key-authentication",
            "access-key-authentication",
        );
        let msg = e.to_string();
        assert!(msg.contains("cache"));
        assert!(msg.contains("disable-key-authentication"));
        assert!(msg.contains("access-key-authentication"));
    }

    #[test]
    fn test_kl000_cycle_display() {
        let e = Error::CyclicExpression {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(e.to_string(), "cyclic expression: a -> b -> a");
    }

    #[test]
    fn test_kl000_not_found_display() {
        assert_eq!(
            Error::NotFound("ghost".into()).to_string(),
            "resource not found: ghost"
        );
    }
}
