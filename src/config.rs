use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use schemars::JsonSchema;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use tracing::warn;

use crate::{
    error::InventoryError,
    options::{
        CacheOptions, ComposeOptions, ConnectionOptions, InventoryOptions, KeyedGroup,
        PluginOptions,
    },
    utils::HostFormat,
};

pub const PLUGIN_NAMES: [&str; 2] = ["kubevirt", "kubevirt.core.kubevirt"];

const KEY_ALIASES: [(&str, &str); 5] = [
    ("interface_name", "network_name"),
    ("cert_file", "client_cert"),
    ("key_file", "client_key"),
    ("ssl_ca_cert", "ca_cert"),
    ("verify_ssl", "validate_certs"),
];

/// The contents of a `*.kubevirt.yml` inventory file.
#[derive(Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(default)]
pub struct InventoryConfig {
    /// Must be `kubevirt` or `kubevirt.core.kubevirt`.
    pub plugin: String,

    /// Name of the root group. Derived from the API server URL when unset.
    pub name: Option<String>,
    /// Host name template with `{name}`, `{namespace}` and `{uid}` placeholders.
    pub host_format: Option<String>,
    /// Namespaces to scan. All accessible namespaces when unset.
    pub namespaces: Option<Vec<String>>,
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    /// Name of the interface whose address is used to connect.
    #[serde(alias = "interface_name")]
    pub network_name: Option<String>,
    /// Connect through names provided by KubeSecondaryDNS.
    pub kube_secondary_dns: Option<bool>,
    /// Connect through LoadBalancer or NodePort services.
    pub use_service: Option<bool>,
    /// Leave `ansible_port` unset instead of null when no port was found.
    pub unset_ansible_port: Option<bool>,
    /// Create a group per label.
    pub create_groups: Option<bool>,
    /// Overrides the base domain looked up from the cluster.
    pub base_domain: Option<String>,
    /// Append the base domain to node names of NodePort services.
    pub append_base_domain: Option<bool>,
    /// KubeVirt API version.
    pub api_version: Option<String>,

    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
    pub host: Option<String>,
    pub api_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(alias = "cert_file")]
    pub client_cert: Option<String>,
    #[serde(alias = "key_file")]
    pub client_key: Option<String>,
    #[serde(alias = "ssl_ca_cert")]
    pub ca_cert: Option<String>,
    #[serde(alias = "verify_ssl")]
    pub validate_certs: Option<bool>,

    /// Variables set from expressions.
    pub compose: BTreeMap<String, String>,
    /// Groups joined when their expression is true.
    pub groups: BTreeMap<String, String>,
    /// Groups named after the result of an expression.
    pub keyed_groups: Vec<KeyedGroup>,
    /// Fail on invalid `groups` and `keyed_groups` expressions.
    pub strict: bool,
    /// Prepend the separator to keyed groups without a prefix.
    pub leading_separator: Option<bool>,

    pub cache: bool,
    /// Seconds a cache entry stays valid. Zero never expires.
    pub cache_timeout: Option<u64>,
    /// Directory the cache is stored in.
    pub cache_connection: Option<PathBuf>,
    pub cache_prefix: Option<String>,

    /// Deprecated. At most one entry whose keys override the top level keys.
    pub connections: Option<Vec<BTreeMap<String, serde_json::Value>>>,
}

/// Rejects files this inventory is not meant to read.
pub fn verify_file(path: &Path) -> Result<(), InventoryError> {
    let name = path.to_string_lossy();

    if name.ends_with("kubevirt.yml") || name.ends_with("kubevirt.yaml") {
        Ok(())
    } else {
        Err(InventoryError::UnsupportedFile {
            path: name.into_owned(),
        })
    }
}

impl InventoryConfig {
    pub fn parse(contents: &str) -> Result<Self, InventoryError> {
        let mut document = match serde_yaml::from_str(contents)? {
            Value::Mapping(mapping) => mapping,
            Value::Null => Mapping::new(),
            _ => {
                return Err(InventoryError::InvalidConfig(
                    "Expecting the inventory file to be a mapping.".into(),
                ));
            }
        };

        let plugin = document.get("plugin").and_then(Value::as_str).unwrap_or_default();
        if !PLUGIN_NAMES.contains(&plugin) {
            return Err(InventoryError::InvalidConfig(format!(
                "Incorrect plugin name in file: {}, expected one of {}",
                if plugin.is_empty() { "none found" } else { plugin },
                PLUGIN_NAMES.join(", ")
            )));
        }

        connections_compatibility(&mut document)?;

        Ok(serde_yaml::from_value(Value::Mapping(document))?)
    }

    /// Resolves defaults, file values and environment fallbacks into the options of one refresh.
    pub fn into_options(
        self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<PluginOptions, InventoryError> {
        let defaults = PluginOptions::default();

        let host_format = match &self.host_format {
            Some(template) => HostFormat::parse(template).map_err(InventoryError::InvalidConfig)?,
            None => defaults.inventory.host_format,
        };

        let inventory = InventoryOptions {
            name: self.name,
            namespaces: self.namespaces.unwrap_or_default(),
            api_version: self.api_version.unwrap_or(defaults.inventory.api_version),
            label_selector: self.label_selector,
            field_selector: self.field_selector,
            network_name: self.network_name.filter(|name| !name.is_empty()),
            kube_secondary_dns: self
                .kube_secondary_dns
                .unwrap_or(defaults.inventory.kube_secondary_dns),
            use_service: self.use_service.unwrap_or(defaults.inventory.use_service),
            unset_ansible_port: self
                .unset_ansible_port
                .unwrap_or(defaults.inventory.unset_ansible_port),
            create_groups: self.create_groups.unwrap_or(defaults.inventory.create_groups),
            base_domain: self.base_domain,
            append_base_domain: self
                .append_base_domain
                .unwrap_or(defaults.inventory.append_base_domain),
            host_format,
        };

        let connection = ConnectionOptions {
            kubeconfig: self.kubeconfig,
            context: self.context,
            host: self.host,
            api_key: self.api_key,
            username: self.username,
            password: self.password,
            client_cert: self.client_cert,
            client_key: self.client_key,
            ca_cert: self.ca_cert,
            validate_certs: self.validate_certs,
        }
        .with_env_fallback(env);

        let compose = ComposeOptions {
            compose: self.compose,
            groups: self.groups,
            keyed_groups: self.keyed_groups,
            strict: self.strict,
            leading_separator: self
                .leading_separator
                .unwrap_or(defaults.compose.leading_separator),
        };

        let cache = CacheOptions {
            enabled: self.cache,
            timeout: self.cache_timeout.unwrap_or(defaults.cache.timeout),
            connection: self.cache_connection.unwrap_or(defaults.cache.connection),
            prefix: self.cache_prefix.unwrap_or(defaults.cache.prefix),
        };

        Ok(PluginOptions {
            inventory,
            connection,
            compose,
            cache,
        })
    }
}

fn canonical_key(key: &Value) -> Value {
    match key.as_str() {
        Some(name) => KEY_ALIASES
            .iter()
            .find(|(alias, _)| *alias == name)
            .map(|(_, canonical)| Value::from(*canonical))
            .unwrap_or_else(|| key.clone()),
        None => key.clone(),
    }
}

/// Folds a single legacy `connections` entry into the top level of the document.
fn connections_compatibility(document: &mut Mapping) -> Result<(), InventoryError> {
    let Some(connections) = document.remove("connections") else {
        return Ok(());
    };

    let connections = match connections {
        Value::Null => return Ok(()),
        Value::Sequence(connections) => connections,
        _ => {
            return Err(InventoryError::InvalidConfig(
                "Expecting connections to be a list.".into(),
            ));
        }
    };

    if connections.iter().any(|connection| !connection.is_mapping()) {
        return Err(InventoryError::InvalidConfig(
            "Expecting connection to be a dictionary.".into(),
        ));
    }

    if connections.len() > 1 {
        return Err(InventoryError::InvalidConfig(
            "Split your connections into multiple configuration files.".into(),
        ));
    }

    let Some(Value::Mapping(connection)) = connections.into_iter().next() else {
        return Ok(());
    };

    warn!("The 'connections' parameter is deprecated, move its settings to the top level");

    for (key, value) in connection {
        let key = canonical_key(&key);
        for (alias, canonical) in KEY_ALIASES {
            if key.as_str() == Some(canonical) {
                document.remove(alias);
            }
        }
        document.insert(key, value);
    }

    Ok(())
}
