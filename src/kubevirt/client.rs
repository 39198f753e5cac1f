use std::{cell::RefCell, collections::HashMap};

use kube::{
    Api,
    api::{DynamicObject, ListParams},
    config::{Config, KubeConfigOptions, Kubeconfig},
    core::GroupVersionKind,
    discovery::{ApiCapabilities, ApiResource, Scope, oneshot::pinned_kind},
};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::options::ConnectionOptions;

/// A failed API call, carrying what the API server answered.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ApiFailure {
    pub status: u16,
    pub reason: String,
    pub body: Option<String>,
    pub content_type: Option<String>,
}

impl ApiFailure {
    /// Extracts a human readable message: the `message` field of a JSON body, the raw body, or
    /// the status and reason when there is no body at all.
    pub fn message(&self) -> String {
        let Some(body) = self.body.as_deref().filter(|body| !body.is_empty()) else {
            return format!("{} Reason: {}", self.status, self.reason);
        };

        if self.content_type.as_deref() == Some("application/json") {
            let message = serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|parsed| parsed.get("message")?.as_str().map(str::to_owned))
                .filter(|message| !message.is_empty());

            if let Some(message) = message {
                return message;
            }
        }

        body.to_owned()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("the server could not find the requested resource {kind} in {api_version}")]
    ResourceNotFound { api_version: String, kind: String },

    #[error("{}", .0.message())]
    Api(ApiFailure),

    #[error("{0}")]
    Setup(String),

    #[error(transparent)]
    Kube(kube::Error),

    #[error(transparent)]
    Decode(#[from] serde_json::Error),
}

impl ClientError {
    /// The message used when a listing fails and the whole refresh is aborted.
    pub fn detail(&self) -> String {
        match self {
            ClientError::Api(failure) => failure.message(),
            other => other.to_string(),
        }
    }
}

impl From<kube::Error> for ClientError {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(response) => ClientError::Api(ApiFailure {
                status: response.code,
                reason: response.reason.clone(),
                body: serde_json::to_string(&response).ok(),
                content_type: Some("application/json".into()),
            }),
            other => ClientError::Kube(other),
        }
    }
}

/// Narrows a list call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListQuery {
    pub namespace: Option<String>,
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
}

impl ListQuery {
    pub fn namespaced(namespace: &str) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    pub fn labels(mut self, label_selector: Option<&str>) -> Self {
        self.label_selector = label_selector.map(str::to_owned);
        self
    }

    pub fn fields(mut self, field_selector: Option<&str>) -> Self {
        self.field_selector = field_selector.map(str::to_owned);
        self
    }
}

/// The capability the inventory needs from a Kubernetes compatible API.
pub trait ResourceClient {
    /// The URL of the API server.
    fn host(&self) -> String;

    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        query: &ListQuery,
    ) -> Result<Vec<Value>, ClientError>;

    async fn get(&self, api_version: &str, kind: &str, name: &str) -> Result<Value, ClientError>;
}

/// Creates clients from connection settings. Creating a client must not talk to the API yet.
pub trait ClientFactory {
    type Client: ResourceClient;

    async fn connect(&self, connection: &ConnectionOptions) -> Result<Self::Client, ClientError>;
}

pub struct KubeClientFactory;

impl ClientFactory for KubeClientFactory {
    type Client = KubeResourceClient;

    async fn connect(
        &self,
        connection: &ConnectionOptions,
    ) -> Result<KubeResourceClient, ClientError> {
        let mut config = load_config(connection).await?;

        if let Some(host) = &connection.host {
            config.cluster_url = host
                .parse()
                .map_err(|e| ClientError::Setup(format!("invalid host {host}: {e}")))?;
        }

        if connection.validate_certs == Some(false) {
            config.accept_invalid_certs = true;
        }

        let host = config.cluster_url.to_string();
        let client = kube::Client::try_from(config).map_err(|e| ClientError::Setup(e.to_string()))?;

        debug!("Using Kubernetes API at {host}");

        Ok(KubeResourceClient {
            client,
            host,
            discovered: DiscoveryCache::default(),
        })
    }
}

async fn load_config(connection: &ConnectionOptions) -> Result<Config, ClientError> {
    let options = KubeConfigOptions {
        context: connection.context.clone(),
        ..Default::default()
    };

    let config = match (&connection.kubeconfig, &connection.host) {
        (Some(path), _) => {
            if connection.has_credentials() {
                warn!("Credentials are ignored when a kubeconfig is configured");
            }

            let kubeconfig =
                Kubeconfig::read_from(path).map_err(|e| ClientError::Setup(e.to_string()))?;
            Config::from_custom_kubeconfig(kubeconfig, &options).await
        }
        (None, Some(host)) => {
            let kubeconfig = inline_kubeconfig(connection, host)?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await
        }
        (None, None) if connection.context.is_some() => Config::from_kubeconfig(&options).await,
        (None, None) => {
            if connection.has_credentials() {
                warn!("Credentials are ignored when no host is configured");
            }

            return Config::infer()
                .await
                .map_err(|e| ClientError::Setup(e.to_string()));
        }
    };

    config.map_err(|e| ClientError::Setup(e.to_string()))
}

/// Builds a single-context kubeconfig from the explicitly configured host and credentials.
fn inline_kubeconfig(
    connection: &ConnectionOptions,
    host: &str,
) -> Result<Kubeconfig, ClientError> {
    let mut cluster = json!({ "server": host });
    if let Some(ca_cert) = &connection.ca_cert {
        cluster["certificate-authority"] = json!(ca_cert);
    }
    if connection.validate_certs == Some(false) {
        cluster["insecure-skip-tls-verify"] = json!(true);
    }

    let mut user = serde_json::Map::new();
    let credentials = [
        ("token", &connection.api_key),
        ("username", &connection.username),
        ("password", &connection.password),
        ("client-certificate", &connection.client_cert),
        ("client-key", &connection.client_key),
    ];
    for (key, value) in credentials {
        if let Some(value) = value {
            user.insert(key.into(), json!(value));
        }
    }

    Ok(serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{ "name": "inventory", "cluster": cluster }],
        "users": [{ "name": "inventory", "user": user }],
        "contexts": [{
            "name": "inventory",
            "context": { "cluster": "inventory", "user": "inventory" },
        }],
        "current-context": "inventory",
    }))?)
}

type Discovered = (ApiResource, ApiCapabilities);

/// Discovery results of one client, keyed by api version and kind.
#[derive(Default)]
struct DiscoveryCache {
    entries: RefCell<HashMap<(String, String), Discovered>>,
}

impl DiscoveryCache {
    fn get(&self, api_version: &str, kind: &str) -> Option<Discovered> {
        self.entries
            .borrow()
            .get(&(api_version.to_owned(), kind.to_owned()))
            .cloned()
    }

    fn insert(&self, api_version: &str, kind: &str, discovered: Discovered) {
        self.entries
            .borrow_mut()
            .insert((api_version.to_owned(), kind.to_owned()), discovered);
    }
}

pub struct KubeResourceClient {
    client: kube::Client,
    host: String,
    discovered: DiscoveryCache,
}

impl KubeResourceClient {
    async fn discover(&self, api_version: &str, kind: &str) -> Result<Discovered, ClientError> {
        if let Some(discovered) = self.discovered.get(api_version, kind) {
            return Ok(discovered);
        }

        let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
        let gvk = GroupVersionKind::gvk(group, version, kind);

        let discovered = match pinned_kind(&self.client, &gvk).await {
            Ok(found) => found,
            Err(kube::Error::Discovery(_)) => {
                return Err(ClientError::ResourceNotFound {
                    api_version: api_version.into(),
                    kind: kind.into(),
                });
            }
            Err(kube::Error::Api(response)) if response.code == 404 => {
                return Err(ClientError::ResourceNotFound {
                    api_version: api_version.into(),
                    kind: kind.into(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        self.discovered.insert(api_version, kind, discovered.clone());
        Ok(discovered)
    }
}

impl ResourceClient for KubeResourceClient {
    fn host(&self) -> String {
        self.host.clone()
    }

    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        query: &ListQuery,
    ) -> Result<Vec<Value>, ClientError> {
        let (resource, capabilities) = self.discover(api_version, kind).await?;

        let api: Api<DynamicObject> = match (&query.namespace, capabilities.scope) {
            (Some(namespace), Scope::Namespaced) => {
                Api::namespaced_with(self.client.clone(), namespace, &resource)
            }
            _ => Api::all_with(self.client.clone(), &resource),
        };

        let mut params = ListParams::default();
        if let Some(labels) = &query.label_selector {
            params = params.labels(labels);
        }
        if let Some(fields) = &query.field_selector {
            params = params.fields(fields);
        }

        let list = api.list(&params).await?;
        debug!("Listed {} {kind} object(s)", list.items.len());

        list.items
            .into_iter()
            .map(|item| serde_json::to_value(item).map_err(ClientError::from))
            .collect()
    }

    async fn get(&self, api_version: &str, kind: &str, name: &str) -> Result<Value, ClientError> {
        let (resource, _) = self.discover(api_version, kind).await?;
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);

        Ok(serde_json::to_value(api.get(name).await?)?)
    }
}
