//! KL-008: Key vault emitter (`Microsoft.KeyVault/vaults`).

use super::cache::VAULT_TYPE;
use crate::core::codegen::{bicep_identifier, unique_name, Template, Value};
use crate::core::resolver::{ResolvedVault, RESOURCE_NAME_TAG};

const NAME_MAX_LEN: usize = 24;

/// Build the vault template. RBAC authorization is always on; access to
/// secrets is granted by the deployment tooling.
pub fn template(vault: &ResolvedVault) -> Template {
    let symbol = bicep_identifier(&vault.name);
    let mut t = Template::new(&vault.name);

    let mut tags = vec![(RESOURCE_NAME_TAG.to_string(), Value::str(&vault.name))];
    tags.extend(vault.tags.iter().map(|(k, v)| (k.clone(), Value::str(v))));

    t.declare(
        &symbol,
        VAULT_TYPE,
        Value::object(vec![
            ("name", Value::raw(unique_name(&vault.name, NAME_MAX_LEN))),
            ("location", Value::raw("location")),
            (
                "properties",
                Value::object(vec![
                    ("tenantId", Value::raw("tenant().tenantId")),
                    (
                        "sku",
                        Value::object(vec![
                            ("family", Value::str("A")),
                            ("name", Value::str("standard")),
                        ]),
                    ),
                    ("enableRbacAuthorization", Value::Bool(true)),
                ]),
            ),
            ("tags", Value::object(tags)),
        ]),
    );

    t.output("vaultUri", format!("{}.properties.vaultUri", symbol));
    t.output("name", format!("{}.name", symbol));
    t
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn test_kl008_vault_golden() {
        let t = template(&ResolvedVault {
            name: "cache-kv".into(),
            tags: IndexMap::new(),
            derived_for: Some("cache".into()),
        });
        let expected = "\
@description('The location for the resource(s) to be deployed.')
param location string = resourceGroup().location

resource cache_kv 'Microsoft.KeyVault/vaults@2023-07-01' = {
  name: take('cachekv-${uniqueString(resourceGroup().id)}', 24)
  location: location
  properties: {
    tenantId: tenant().tenantId
    sku: {
      family: 'A'
      name: 'standard'
    }
    enableRbacAuthorization: true
  }
  tags: {
    'keel-resource-name': 'cache-kv'
  }
}

output vaultUri string = cache_kv.properties.vaultUri

output name string = cache_kv.name
";
        assert_eq!(t.render(), expected);
        assert_eq!(t.path(), "cache-kv.module.bicep");
    }
}
