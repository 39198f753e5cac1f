use std::{collections::BTreeMap, path::PathBuf};

use directories::BaseDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::utils::HostFormat;

pub const DEFAULT_API_VERSION: &str = "kubevirt.io/v1";
pub const DEFAULT_CACHE_TIMEOUT: u64 = 3600;
pub const DEFAULT_CACHE_PREFIX: &str = "kubevirt_inventory_";
const CACHE_DIR_NAME: &str = "kubevirt-inventory";

/// Everything an inventory refresh needs, resolved once from the configuration file.
#[derive(Clone, Debug, Default)]
pub struct PluginOptions {
    pub inventory: InventoryOptions,
    pub connection: ConnectionOptions,
    pub compose: ComposeOptions,
    pub cache: CacheOptions,
}

/// Controls which objects are fetched and how they are turned into hosts.
#[derive(Clone, Debug, PartialEq)]
pub struct InventoryOptions {
    /// Name of the root group. Derived from the API server URL when unset.
    pub name: Option<String>,
    /// Namespaces to scan. All accessible namespaces when empty.
    pub namespaces: Vec<String>,
    pub api_version: String,
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    pub network_name: Option<String>,
    pub kube_secondary_dns: bool,
    pub use_service: bool,
    pub unset_ansible_port: bool,
    pub create_groups: bool,
    /// Overrides the base domain looked up from the cluster.
    pub base_domain: Option<String>,
    pub append_base_domain: bool,
    pub host_format: HostFormat,
}

impl Default for InventoryOptions {
    fn default() -> Self {
        Self {
            name: None,
            namespaces: Vec::new(),
            api_version: DEFAULT_API_VERSION.into(),
            label_selector: None,
            field_selector: None,
            network_name: None,
            kube_secondary_dns: false,
            use_service: true,
            unset_ansible_port: true,
            create_groups: false,
            base_domain: None,
            append_base_domain: false,
            host_format: HostFormat::default(),
        }
    }
}

impl InventoryOptions {
    pub fn base_domain_or(&self, cluster_domain: Option<&str>) -> Option<String> {
        self.base_domain
            .clone()
            .or_else(|| cluster_domain.map(str::to_owned))
    }
}

/// How to reach the Kubernetes API. Unset values fall back to the `K8S_AUTH_*` environment and
/// finally to the inferred kubeconfig.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionOptions {
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
    pub host: Option<String>,
    pub api_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
    pub ca_cert: Option<String>,
    pub validate_certs: Option<bool>,
}

impl ConnectionOptions {
    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
            || self.username.is_some()
            || self.password.is_some()
            || self.client_cert.is_some()
            || self.client_key.is_some()
    }

    /// Fills unset values from `K8S_AUTH_*` variables provided by `lookup`.
    pub fn with_env_fallback(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |name: &str| lookup(name).filter(|value| !value.is_empty());

        self.kubeconfig = self
            .kubeconfig
            .or_else(|| lookup("K8S_AUTH_KUBECONFIG").map(PathBuf::from));
        self.context = self.context.or_else(|| lookup("K8S_AUTH_CONTEXT"));
        self.host = self.host.or_else(|| lookup("K8S_AUTH_HOST"));
        self.api_key = self.api_key.or_else(|| lookup("K8S_AUTH_API_KEY"));
        self.username = self.username.or_else(|| lookup("K8S_AUTH_USERNAME"));
        self.password = self.password.or_else(|| lookup("K8S_AUTH_PASSWORD"));
        self.client_cert = self.client_cert.or_else(|| lookup("K8S_AUTH_CERT_FILE"));
        self.client_key = self.client_key.or_else(|| lookup("K8S_AUTH_KEY_FILE"));
        self.ca_cert = self.ca_cert.or_else(|| lookup("K8S_AUTH_SSL_CA_CERT"));
        self.validate_certs = self
            .validate_certs
            .or_else(|| lookup("K8S_AUTH_VERIFY_SSL").and_then(|value| parse_bool(&value)));

        self
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "y" => Some(true),
        "0" | "false" | "no" | "off" | "n" => Some(false),
        _ => None,
    }
}

/// A keyed group definition as accepted in the `keyed_groups` list.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct KeyedGroup {
    /// Expression whose result names the group(s).
    pub key: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_group: Option<String>,
    /// Used instead of an empty key result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    /// Whether to keep the separator when a mapping value is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trailing_separator: Option<bool>,
}

fn default_separator() -> String {
    "_".into()
}

impl KeyedGroup {
    pub fn validate(&self) -> Result<(), String> {
        if self.key.trim().is_empty() {
            return Err("Invalid keyed group: key must not be empty".into());
        }

        if self.default_value.is_some() && self.trailing_separator.is_some() {
            return Err(format!(
                "Invalid keyed group {:?}: parameters default_value and trailing_separator are mutually exclusive",
                self.key
            ));
        }

        Ok(())
    }
}

/// User defined variables and groups evaluated per host.
#[derive(Clone, Debug, PartialEq)]
pub struct ComposeOptions {
    pub compose: BTreeMap<String, String>,
    pub groups: BTreeMap<String, String>,
    pub keyed_groups: Vec<KeyedGroup>,
    pub strict: bool,
    pub leading_separator: bool,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            compose: BTreeMap::new(),
            groups: BTreeMap::new(),
            keyed_groups: Vec::new(),
            strict: false,
            leading_separator: true,
        }
    }
}

impl ComposeOptions {
    pub fn is_empty(&self) -> bool {
        self.compose.is_empty() && self.groups.is_empty() && self.keyed_groups.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CacheOptions {
    pub enabled: bool,
    /// Seconds a cache entry stays valid. Zero never expires.
    pub timeout: u64,
    pub connection: PathBuf,
    pub prefix: String,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout: DEFAULT_CACHE_TIMEOUT,
            connection: default_cache_dir(),
            prefix: DEFAULT_CACHE_PREFIX.into(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    BaseDirs::new()
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(std::env::temp_dir)
        .join(CACHE_DIR_NAME)
}
