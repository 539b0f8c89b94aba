//! KL-004: Deferred value expressions and the `{resource.kind.name}` token grammar.
//!
//! Expressions are trees of literals and references to other resources'
//! future outputs. Evaluation checks every reference against an
//! [`OutputCatalog`] and renders references back as placeholder tokens, so
//! `evaluate(parse(text)) == text` for any resolvable text.
//!
//! Token forms:
//! - `{r.outputs.<name>}` — template output
//! - `{r.secrets.<key>}` — secret stored in vault `r`
//! - `{r.bindings.<endpoint>.<field>}` — container endpoint
//! - `{r.connectionString}` — `r`'s own connection expression

use super::error::{Error, Result};
use indexmap::IndexMap;
use std::fmt;

const BINDING_FIELDS: &[&str] = &["host", "port", "targetPort", "scheme", "url"];

/// A lazily evaluated string value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Literal(String),
    Output { resource: String, name: String },
    Secret { resource: String, key: String },
    Binding { resource: String, endpoint: String, field: String },
    Connection(String),
    Concat(Vec<Expr>),
}

impl Expr {
    pub fn literal(s: impl Into<String>) -> Self {
        Self::Literal(s.into())
    }

    pub fn output(resource: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Output {
            resource: resource.into(),
            name: name.into(),
        }
    }

    pub fn secret(resource: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Secret {
            resource: resource.into(),
            key: key.into(),
        }
    }

    pub fn binding(
        resource: impl Into<String>,
        endpoint: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self::Binding {
            resource: resource.into(),
            endpoint: endpoint.into(),
            field: field.into(),
        }
    }

    pub fn connection(resource: impl Into<String>) -> Self {
        Self::Connection(resource.into())
    }

    pub fn concat(parts: Vec<Expr>) -> Self {
        Self::Concat(parts)
    }

    /// Parse token text into an expression tree.
    pub fn parse(text: &str) -> Result<Self> {
        let mut parts = Vec::new();
        let mut start = 0;

        while let Some(open) = text[start..].find('{') {
            let open = start + open;
            let close = text[open..]
                .find('}')
                .ok_or_else(|| Error::Parse(format!("unclosed token at position {}", open)))?;
            let close = open + close;
            if open > start {
                parts.push(Self::literal(&text[start..open]));
            }
            parts.push(parse_token(&text[open + 1..close])?);
            start = close + 1;
        }
        if start < text.len() {
            parts.push(Self::literal(&text[start..]));
        }

        Ok(match parts.len() {
            0 => Self::literal(""),
            1 => parts.remove(0),
            _ => Self::Concat(parts),
        })
    }

    /// Evaluate with an empty evaluation stack.
    pub fn evaluate(&self, catalog: &OutputCatalog) -> Result<String> {
        self.eval(catalog, &mut Vec::new())
    }

    /// Evaluate as the connection expression of `owner`, so references back
    /// to `owner` are reported as cycles.
    pub fn evaluate_as(&self, owner: &str, catalog: &OutputCatalog) -> Result<String> {
        self.eval(catalog, &mut vec![owner.to_string()])
    }

    fn eval(&self, catalog: &OutputCatalog, stack: &mut Vec<String>) -> Result<String> {
        match self {
            Self::Literal(s) => Ok(s.clone()),
            Self::Output { resource, name } => {
                let provided = catalog.require(resource, self)?;
                if !provided.outputs.iter().any(|o| o == name) {
                    return Err(Error::unresolved(
                        self.to_string(),
                        format!("'{}' declares no output '{}'", resource, name),
                    ));
                }
                Ok(self.to_string())
            }
            Self::Secret { resource, key } => {
                let provided = catalog.require(resource, self)?;
                if !provided.secrets.iter().any(|s| s == key) {
                    return Err(Error::unresolved(
                        self.to_string(),
                        format!("vault '{}' stores no secret '{}'", resource, key),
                    ));
                }
                Ok(self.to_string())
            }
            Self::Binding {
                resource,
                endpoint,
                field,
            } => {
                let provided = catalog.require(resource, self)?;
                if !provided.endpoints.iter().any(|e| e == endpoint) {
                    return Err(Error::unresolved(
                        self.to_string(),
                        format!("'{}' exposes no endpoint '{}'", resource, endpoint),
                    ));
                }
                if !BINDING_FIELDS.contains(&field.as_str()) {
                    return Err(Error::unresolved(
                        self.to_string(),
                        format!("unknown binding field '{}'", field),
                    ));
                }
                Ok(self.to_string())
            }
            Self::Connection(resource) => {
                if let Some(pos) = stack.iter().position(|r| r == resource) {
                    let mut cycle = stack[pos..].to_vec();
                    cycle.push(resource.clone());
                    return Err(Error::CyclicExpression { cycle });
                }
                let provided = catalog.require(resource, self)?;
                let inner = provided.connection.as_ref().ok_or_else(|| {
                    Error::unresolved(
                        self.to_string(),
                        format!("'{}' exposes no connection string", resource),
                    )
                })?;
                stack.push(resource.clone());
                let checked = inner.eval(catalog, stack);
                stack.pop();
                checked?;
                Ok(self.to_string())
            }
            Self::Concat(parts) => {
                let mut out = String::new();
                for part in parts {
                    out.push_str(&part.eval(catalog, stack)?);
                }
                Ok(out)
            }
        }
    }
}

fn parse_token(key: &str) -> Result<Expr> {
    let segments: Vec<&str> = key.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(Error::Parse(format!("malformed token {{{}}}", key)));
    }
    match segments.as_slice() {
        [r, "outputs", name] => Ok(Expr::output(*r, *name)),
        [r, "secrets", k] => Ok(Expr::secret(*r, *k)),
        [r, "bindings", e, f] => Ok(Expr::binding(*r, *e, *f)),
        [r, "connectionString"] => Ok(Expr::connection(*r)),
        _ => Err(Error::Parse(format!("unknown token {{{}}}", key))),
    }
}

/// Unvalidated token text.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => write!(f, "{}", s),
            Self::Output { resource, name } => write!(f, "{{{}.outputs.{}}}", resource, name),
            Self::Secret { resource, key } => write!(f, "{{{}.secrets.{}}}", resource, key),
            Self::Binding {
                resource,
                endpoint,
                field,
            } => write!(f, "{{{}.bindings.{}.{}}}", resource, endpoint, field),
            Self::Connection(resource) => write!(f, "{{{}.connectionString}}", resource),
            Self::Concat(parts) => parts.iter().try_for_each(|p| write!(f, "{}", p)),
        }
    }
}

// ============================================================================
// Evaluation context
// ============================================================================

/// What one resource will expose once deployed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvidedOutputs {
    pub outputs: Vec<String>,
    pub secrets: Vec<String>,
    pub endpoints: Vec<String>,
    pub connection: Option<Expr>,
}

/// Everything expressions may refer to, keyed by resource name.
#[derive(Debug, Clone, Default)]
pub struct OutputCatalog {
    entries: IndexMap<String, ProvidedOutputs>,
}

impl OutputCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, resource: impl Into<String>, provided: ProvidedOutputs) {
        self.entries.insert(resource.into(), provided);
    }

    pub fn get(&self, resource: &str) -> Option<&ProvidedOutputs> {
        self.entries.get(resource)
    }

    /// Mutable entry, created empty on first use.
    pub fn entry(&mut self, resource: &str) -> &mut ProvidedOutputs {
        self.entries.entry(resource.to_string()).or_default()
    }

    fn require(&self, resource: &str, expr: &Expr) -> Result<&ProvidedOutputs> {
        self.entries.get(resource).ok_or_else(|| {
            Error::unresolved(expr.to_string(), format!("'{}' produces no outputs", resource))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> OutputCatalog {
        let mut c = OutputCatalog::new();
        c.insert(
            "cache",
            ProvidedOutputs {
                outputs: vec!["hostName".into(), "name".into()],
                connection: Some(Expr::concat(vec![
                    Expr::output("cache", "hostName"),
                    Expr::literal(",ssl=true"),
                ])),
                ..Default::default()
            },
        );
        c.insert(
            "cache-kv",
            ProvidedOutputs {
                outputs: vec!["name".into(), "vaultUri".into()],
                secrets: vec!["connectionstrings--cache".into()],
                ..Default::default()
            },
        );
        c
    }

    #[test]
    fn test_kl004_concat_renders_tokens() {
        let e = Expr::concat(vec![
            Expr::output("cache", "hostName"),
            Expr::literal(",ssl=true"),
        ]);
        assert_eq!(e.evaluate(&catalog()).unwrap(), "{cache.outputs.hostName},ssl=true");
    }

    #[test]
    fn test_kl004_parse_roundtrip() {
        let text = "{cache-kv.secrets.connectionstrings--cache}";
        let e = Expr::parse(text).unwrap();
        assert_eq!(e, Expr::secret("cache-kv", "connectionstrings--cache"));
        assert_eq!(e.evaluate(&catalog()).unwrap(), text);

        let text = "host={cache.outputs.hostName};conn={cache.connectionString}";
        assert_eq!(Expr::parse(text).unwrap().evaluate(&catalog()).unwrap(), text);
    }

    #[test]
    fn test_kl004_parse_plain_and_empty() {
        assert_eq!(Expr::parse("plain").unwrap(), Expr::literal("plain"));
        assert_eq!(Expr::parse("").unwrap(), Expr::literal(""));
        assert_eq!(
            Expr::parse("{c.bindings.tcp.port}").unwrap(),
            Expr::binding("c", "tcp", "port")
        );
    }

    #[test]
    fn test_kl004_parse_errors() {
        assert!(matches!(Expr::parse("{cache.outputs.x"), Err(Error::Parse(_))));
        assert!(matches!(Expr::parse("{cache.weird.x}"), Err(Error::Parse(_))));
        assert!(matches!(Expr::parse("{cache..x}"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_kl004_unresolved_resource() {
        let err = Expr::output("ghost", "name").evaluate(&catalog()).unwrap_err();
        assert!(matches!(err, Error::UnresolvedReference { .. }));
        assert!(err.to_string().contains("{ghost.outputs.name}"));
    }

    #[test]
    fn test_kl004_unresolved_output_and_secret() {
        assert!(Expr::output("cache", "password").evaluate(&catalog()).is_err());
        assert!(Expr::secret("cache-kv", "other").evaluate(&catalog()).is_err());
        assert!(Expr::connection("cache-kv").evaluate(&catalog()).is_err());
    }

    #[test]
    fn test_kl004_connection_reference() {
        let e = Expr::connection("cache");
        assert_eq!(e.evaluate(&catalog()).unwrap(), "{cache.connectionString}");
    }

    #[test]
    fn test_kl004_reentrant() {
        let c = catalog();
        let e = Expr::parse("{cache.connectionString}!").unwrap();
        assert_eq!(e.evaluate(&c).unwrap(), e.evaluate(&c).unwrap());
    }

    #[test]
    fn test_kl004_cycle_detected() {
        let mut c = OutputCatalog::new();
        c.insert(
            "a",
            ProvidedOutputs {
                connection: Some(Expr::connection("b")),
                ..Default::default()
            },
        );
        c.insert(
            "b",
            ProvidedOutputs {
                connection: Some(Expr::concat(vec![Expr::literal("x"), Expr::connection("a")])),
                ..Default::default()
            },
        );
        let err = Expr::connection("a").evaluate(&c).unwrap_err();
        match err {
            Error::CyclicExpression { cycle } => assert_eq!(cycle, vec!["a", "b", "a"]),
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn test_kl004_self_cycle_as_owner() {
        let mut c = OutputCatalog::new();
        c.insert(
            "a",
            ProvidedOutputs {
                connection: Some(Expr::connection("a")),
                ..Default::default()
            },
        );
        let own = c.get("a").unwrap().connection.clone().unwrap();
        assert!(matches!(
            own.evaluate_as("a", &c),
            Err(Error::CyclicExpression { .. })
        ));
    }

    #[test]
    fn test_kl004_binding_fields() {
        let mut c = OutputCatalog::new();
        c.entry("cache").endpoints.push("tcp".into());
        assert_eq!(
            Expr::binding("cache", "tcp", "host").evaluate(&c).unwrap(),
            "{cache.bindings.tcp.host}"
        );
        assert!(Expr::binding("cache", "tcp", "color").evaluate(&c).is_err());
        assert!(Expr::binding("cache", "http", "host").evaluate(&c).is_err());
    }
}
