//! KL-006: Template emission — dispatch to resource emitters and render Bicep.
//!
//! A [`Template`] is parameters, resource declarations and outputs. Rendering
//! is byte-deterministic: sections appear in declaration order, separated by
//! one blank line, with two-space indentation and single-quoted strings.

use super::expr::Expr;
use super::graph::normalized_name;
use super::resolver::Resolved;
use crate::resources;

/// A Bicep value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Bicep expression emitted verbatim.
    Raw(String),
    /// String literal, quoted on render.
    Str(String),
    Int(i64),
    Bool(bool),
    Object(Vec<(String, Value)>),
}

impl Value {
    pub fn raw(s: impl Into<String>) -> Self {
        Self::Raw(s.into())
    }

    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    pub fn object<K: Into<String>>(fields: Vec<(K, Value)>) -> Self {
        Self::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    fn render(&self, indent: usize, out: &mut String) {
        match self {
            Self::Raw(s) => out.push_str(s),
            Self::Str(s) => out.push_str(&quote(s)),
            Self::Int(n) => out.push_str(&n.to_string()),
            Self::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Self::Object(fields) => {
                out.push_str("{\n");
                for (key, value) in fields {
                    push_indent(out, indent + 1);
                    out.push_str(&object_key(key));
                    out.push_str(": ");
                    value.render(indent + 1, out);
                    out.push('\n');
                }
                push_indent(out, indent);
                out.push('}');
            }
        }
    }
}

fn push_indent(out: &mut String, level: usize) {
    for _ in 0..level {
        out.push_str("  ");
    }
}

/// Single-quoted Bicep string literal.
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn object_key(key: &str) -> String {
    if is_identifier(key) {
        key.to_string()
    } else {
        quote(key)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Bicep symbol for a resource name (`redis-cache` → `redis_cache`).
pub fn bicep_identifier(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Physical-name expression: lowercased alphanumerics plus a unique suffix,
/// truncated to `max_len`.
pub fn unique_name(name: &str, max_len: usize) -> String {
    let prefix = normalized_name(name);
    format!(
        "take('{}-${{uniqueString(resourceGroup().id)}}', {})",
        prefix, max_len
    )
}

/// A template parameter and, when the manifest must supply it, its binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub description: Option<String>,
    pub default: Option<String>,
    pub binding: Option<Expr>,
}

impl Parameter {
    /// The location parameter every template starts with.
    pub fn location() -> Self {
        Self {
            name: "location".to_string(),
            description: Some("The location for the resource(s) to be deployed.".to_string()),
            default: Some("resourceGroup().location".to_string()),
            binding: None,
        }
    }

    pub fn bound(name: impl Into<String>, binding: Expr) -> Self {
        Self {
            name: name.into(),
            description: None,
            default: None,
            binding: Some(binding),
        }
    }
}

/// A resource declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub symbol: String,
    pub type_ref: String,
    pub existing: bool,
    pub body: Value,
}

/// A template output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub name: String,
    pub value: String,
}

/// One emitted template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub resource: String,
    pub parameters: Vec<Parameter>,
    pub declarations: Vec<Declaration>,
    pub outputs: Vec<Output>,
}

impl Template {
    /// An empty template for `resource` with the location parameter declared.
    pub fn new(resource: &str) -> Self {
        Self {
            resource: resource.to_string(),
            parameters: vec![Parameter::location()],
            declarations: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn param(&mut self, parameter: Parameter) -> &mut Self {
        self.parameters.push(parameter);
        self
    }

    pub fn declare(&mut self, symbol: &str, type_ref: &str, body: Value) -> &mut Self {
        self.declarations.push(Declaration {
            symbol: symbol.to_string(),
            type_ref: type_ref.to_string(),
            existing: false,
            body,
        });
        self
    }

    pub fn declare_existing(&mut self, symbol: &str, type_ref: &str, body: Value) -> &mut Self {
        self.declarations.push(Declaration {
            symbol: symbol.to_string(),
            type_ref: type_ref.to_string(),
            existing: true,
            body,
        });
        self
    }

    pub fn output(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.outputs.push(Output {
            name: name.to_string(),
            value: value.into(),
        });
        self
    }

    /// Relative file name referenced from the manifest.
    pub fn path(&self) -> String {
        format!("{}.module.bicep", self.resource)
    }

    pub fn output_names(&self) -> Vec<String> {
        self.outputs.iter().map(|o| o.name.clone()).collect()
    }

    /// Render the Bicep text.
    pub fn render(&self) -> String {
        let mut sections: Vec<String> = Vec::new();

        for p in &self.parameters {
            let mut s = String::new();
            if let Some(ref d) = p.description {
                s.push_str(&format!("@description({})\n", quote(d)));
            }
            s.push_str(&format!("param {} string", p.name));
            if let Some(ref default) = p.default {
                s.push_str(&format!(" = {}", default));
            }
            sections.push(s);
        }

        for d in &self.declarations {
            let mut s = format!("resource {} {}", d.symbol, quote(&d.type_ref));
            if d.existing {
                s.push_str(" existing");
            }
            s.push_str(" = ");
            d.body.render(0, &mut s);
            sections.push(s);
        }

        for o in &self.outputs {
            sections.push(format!("output {} string = {}", o.name, o.value));
        }

        let mut text = sections.join("\n\n");
        text.push('\n');
        text
    }
}

/// Emit the template for a resolved resource. Containers and projects have
/// no template.
pub fn emit(resolved: &Resolved) -> Option<Template> {
    match resolved {
        Resolved::Cache(cache) => Some(resources::cache::template(cache)),
        Resolved::Vault(vault) => Some(resources::vault::template(vault)),
        Resolved::Container(_) | Resolved::Project(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kl006_quote_escapes() {
        assert_eq!(quote("plain"), "'plain'");
        assert_eq!(quote("it's"), "'it\\'s'");
        assert_eq!(quote("a\\b"), "'a\\\\b'");
    }

    #[test]
    fn test_kl006_identifier_helpers() {
        assert_eq!(bicep_identifier("redis-cache"), "redis_cache");
        assert_eq!(
            unique_name("Redis-Cache", 63),
            "take('rediscache-${uniqueString(resourceGroup().id)}', 63)"
        );
    }

    #[test]
    fn test_kl006_value_render_nested() {
        let v = Value::object(vec![
            ("name", Value::str("Basic")),
            ("capacity", Value::Int(1)),
            ("enabled", Value::Bool(false)),
            (
                "config",
                Value::object(vec![("aad-enabled", Value::str("true"))]),
            ),
        ]);
        let mut out = String::new();
        v.render(0, &mut out);
        assert_eq!(
            out,
            "{\n  name: 'Basic'\n  capacity: 1\n  enabled: false\n  config: {\n    'aad-enabled': 'true'\n  }\n}"
        );
    }

    #[test]
    fn test_kl006_template_render_layout() {
        let mut t = Template::new("thing");
        t.param(Parameter::bound("keyVaultName", Expr::literal("")));
        t.declare_existing(
            "kv",
            "Microsoft.KeyVault/vaults@2023-07-01",
            Value::object(vec![("name", Value::raw("keyVaultName"))]),
        );
        t.output("name", "kv.name");
        let expected = "\
@description('The location for the resource(s) to be deployed.')
param location string = resourceGroup().location

param keyVaultName string

resource kv 'Microsoft.KeyVault/vaults@2023-07-01' existing = {
  name: keyVaultName
}

output name string = kv.name
";
        assert_eq!(t.render(), expected);
        assert_eq!(t.path(), "thing.module.bicep");
        assert_eq!(t.output_names(), vec!["name"]);
    }

    #[test]
    fn test_kl006_render_deterministic() {
        let mut t = Template::new("x");
        t.output("name", "x.name");
        assert_eq!(t.render(), t.clone().render());
    }
}
