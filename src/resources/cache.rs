//! KL-007: Managed cache emitter (`Microsoft.Cache/redis`).
//!
//! Shape by auth mode:
//! - identity: keys disabled, AAD enabled, one access-policy assignment per
//!   policy bound to the deploying principal or the shared environment
//! - access key, inline: connection string output with the primary key
//! - access key, vault: connection string written as a secret into the vault

use crate::core::codegen::{bicep_identifier, quote, unique_name, Parameter, Template, Value};
use crate::core::expr::Expr;
use crate::core::resolver::{
    AuthMode, ResolvedCache, RoleScope, SecretPlacement, RESOURCE_NAME_TAG,
};

pub const CACHE_TYPE: &str = "Microsoft.Cache/redis@2024-03-01";
pub const ACCESS_POLICY_TYPE: &str = "Microsoft.Cache/redis/accessPolicyAssignments@2024-03-01";
pub const VAULT_TYPE: &str = "Microsoft.KeyVault/vaults@2023-07-01";
pub const SECRET_TYPE: &str = "Microsoft.KeyVault/vaults/secrets@2023-07-01";

const NAME_MAX_LEN: usize = 63;

/// Vault secret key holding `resource`'s connection string.
pub fn secret_key(resource: &str) -> String {
    format!("connectionstrings--{}", resource.to_ascii_lowercase())
}

/// Manifest parameter names and bindings for the identity receiving access.
fn principal_parameters(scope: &RoleScope) -> [Parameter; 2] {
    match scope {
        RoleScope::PerResource => [
            Parameter::bound("principalId", Expr::literal("")),
            Parameter::bound("principalName", Expr::literal("")),
        ],
        RoleScope::Environment(env) => [
            Parameter::bound("environmentPrincipalId", Expr::output(env, "principalId")),
            Parameter::bound("environmentPrincipalName", Expr::output(env, "principalName")),
        ],
    }
}

fn key_connection_value(symbol: &str) -> String {
    format!(
        "'${{{s}.properties.hostName}},ssl=true,password=${{{s}.listKeys().primaryKey}}'",
        s = symbol
    )
}

/// Build the cache template.
pub fn template(cache: &ResolvedCache) -> Template {
    let symbol = bicep_identifier(&cache.name);
    let identity = matches!(cache.auth, AuthMode::Identity { .. });
    let mut t = Template::new(&cache.name);

    match &cache.auth {
        AuthMode::Identity { scope, .. } => {
            for p in principal_parameters(scope) {
                t.param(p);
            }
        }
        AuthMode::AccessKey(SecretPlacement::Vault(vault)) => {
            t.param(Parameter::bound("keyVaultName", Expr::output(&vault.name, "name")));
        }
        AuthMode::AccessKey(SecretPlacement::Inline) => {}
    }

    let mut properties = vec![
        (
            "sku",
            Value::object(vec![
                ("name", Value::str(&cache.sku.name)),
                ("family", Value::str(&cache.sku.family)),
                ("capacity", Value::Int(i64::from(cache.sku.capacity))),
            ]),
        ),
        ("enableNonSslPort", Value::Bool(false)),
    ];
    if identity {
        properties.push(("disableAccessKeyAuthentication", Value::Bool(true)));
    }
    properties.push(("minimumTlsVersion", Value::str("1.2")));
    if identity {
        properties.push((
            "redisConfiguration",
            Value::object(vec![("aad-enabled", Value::str("true"))]),
        ));
    }

    let mut tags = vec![(RESOURCE_NAME_TAG.to_string(), Value::str(&cache.name))];
    tags.extend(cache.tags.iter().map(|(k, v)| (k.clone(), Value::str(v))));

    t.declare(
        &symbol,
        CACHE_TYPE,
        Value::object(vec![
            ("name", Value::raw(unique_name(&cache.name, NAME_MAX_LEN))),
            ("location", Value::raw("location")),
            ("properties", Value::object(properties)),
            ("tags", Value::object(tags)),
        ]),
    );

    match &cache.auth {
        AuthMode::Identity { scope, policies } => {
            let [principal_id, principal_name] = principal_parameters(scope);
            let infix = match scope {
                RoleScope::PerResource => "",
                RoleScope::Environment(_) => "env_",
            };
            for policy in policies {
                let policy_name = policy.to_string();
                t.declare(
                    &format!("{}_{}{}", symbol, infix, policy.symbol_suffix()),
                    ACCESS_POLICY_TYPE,
                    Value::object(vec![
                        (
                            "name",
                            Value::raw(format!(
                                "guid({}.id, {}, {})",
                                symbol,
                                principal_id.name,
                                quote(&policy_name)
                            )),
                        ),
                        (
                            "properties",
                            Value::object(vec![
                                ("accessPolicyName", Value::str(&policy_name)),
                                ("objectId", Value::raw(&principal_id.name)),
                                ("objectIdAlias", Value::raw(&principal_name.name)),
                            ]),
                        ),
                        ("parent", Value::raw(&symbol)),
                    ]),
                );
            }
            t.output("hostName", format!("{}.properties.hostName", symbol));
        }
        AuthMode::AccessKey(SecretPlacement::Inline) => {
            t.output("connectionString", key_connection_value(&symbol));
        }
        AuthMode::AccessKey(SecretPlacement::Vault(_)) => {
            let vault_symbol = format!("{}_kv", symbol);
            t.declare_existing(
                &vault_symbol,
                VAULT_TYPE,
                Value::object(vec![("name", Value::raw("keyVaultName"))]),
            );
            t.declare(
                &format!("{}_secret", symbol),
                SECRET_TYPE,
                Value::object(vec![
                    ("name", Value::str(secret_key(&cache.name))),
                    (
                        "properties",
                        Value::object(vec![("value", Value::raw(key_connection_value(&symbol)))]),
                    ),
                    ("parent", Value::raw(vault_symbol)),
                ]),
            );
        }
    }

    t.output("name", format!("{}.name", symbol));
    t
}
