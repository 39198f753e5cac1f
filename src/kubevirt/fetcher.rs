use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    error::InventoryError,
    kubevirt::{
        client::{ClientError, ListQuery, ResourceClient},
        resources::{Service, VirtualMachine, VirtualMachineInstance},
        services::{ServicesByDomain, correlate_services},
    },
    options::InventoryOptions,
    utils::default_host_name,
};

pub const KIND_VIRTUAL_MACHINE: &str = "VirtualMachine";
pub const KIND_VIRTUAL_MACHINE_INSTANCE: &str = "VirtualMachineInstance";

/// Everything fetched during one refresh. This is also what the cache stores.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct FetchedData {
    pub default_hostname: String,
    #[serde(default)]
    pub cluster_domain: Option<String>,
    #[serde(default)]
    pub namespaces: BTreeMap<String, NamespaceData>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct NamespaceData {
    #[serde(default)]
    pub vms: Vec<VirtualMachine>,
    #[serde(default)]
    pub vmis: Vec<VirtualMachineInstance>,
    #[serde(default)]
    pub services: ServicesByDomain,
}

/// Lists objects and decodes them. Objects that do not decode are skipped.
async fn list_objects<T: DeserializeOwned>(
    client: &impl ResourceClient,
    api_version: &str,
    kind: &str,
    query: &ListQuery,
) -> Result<Vec<T>, ClientError> {
    let items = client.list(api_version, kind, query).await?;

    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(object) => Some(object),
            Err(e) => {
                debug!("Skipping malformed {kind}: {e}");
                None
            }
        })
        .collect())
}

/// Like [`list_objects`], but any failure aborts the refresh.
pub async fn get_resources<T: DeserializeOwned>(
    client: &impl ResourceClient,
    api_version: &str,
    kind: &str,
    query: &ListQuery,
) -> Result<Vec<T>, InventoryError> {
    list_objects(client, api_version, kind, query)
        .await
        .map_err(|e| {
            debug!("Listing {kind} failed: {e:?}");
            InventoryError::Fetch {
                kind: kind.into(),
                message: e.detail(),
            }
        })
}

#[derive(Deserialize)]
struct NamedObject {
    #[serde(default)]
    metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta,
}

/// Lists the OpenShift projects the credentials can see, or every namespace on clusters without
/// projects.
pub async fn get_available_namespaces(
    client: &impl ResourceClient,
) -> Result<Vec<String>, InventoryError> {
    let query = ListQuery::default();

    let objects: Vec<NamedObject> =
        match list_objects(client, "project.openshift.io/v1", "Project", &query).await {
            Ok(projects) => projects,
            Err(ClientError::ResourceNotFound { .. }) => {
                get_resources(client, "v1", "Namespace", &query).await?
            }
            Err(e) => {
                return Err(InventoryError::Fetch {
                    kind: "Project".into(),
                    message: e.detail(),
                });
            }
        };

    Ok(objects
        .into_iter()
        .filter_map(|object| object.metadata.name)
        .collect())
}

/// Looks up the base domain of an OpenShift cluster. Unknown on any failure.
pub async fn get_cluster_domain(client: &impl ResourceClient) -> Option<String> {
    match client.get("config.openshift.io/v1", "DNS", "cluster").await {
        Ok(dns) => dns
            .pointer("/spec/baseDomain")
            .and_then(Value::as_str)
            .map(str::to_owned),
        Err(e) => {
            debug!("Failed to fetch cluster DNS config: {}", e.detail());
            None
        }
    }
}

fn selected(namespace: &str, opts: &InventoryOptions) -> ListQuery {
    ListQuery::namespaced(namespace)
        .labels(opts.label_selector.as_deref())
        .fields(opts.field_selector.as_deref())
}

pub async fn get_vms_for_namespace(
    client: &impl ResourceClient,
    namespace: &str,
    opts: &InventoryOptions,
) -> Result<Vec<VirtualMachine>, InventoryError> {
    get_resources(
        client,
        &opts.api_version,
        KIND_VIRTUAL_MACHINE,
        &selected(namespace, opts),
    )
    .await
}

pub async fn get_vmis_for_namespace(
    client: &impl ResourceClient,
    namespace: &str,
    opts: &InventoryOptions,
) -> Result<Vec<VirtualMachineInstance>, InventoryError> {
    get_resources(
        client,
        &opts.api_version,
        KIND_VIRTUAL_MACHINE_INSTANCE,
        &selected(namespace, opts),
    )
    .await
}

/// Lists the services of a namespace that expose remote access to a VMI.
pub async fn get_services_for_namespace(
    client: &impl ResourceClient,
    namespace: &str,
) -> Result<ServicesByDomain, InventoryError> {
    let services: Vec<Service> =
        get_resources(client, "v1", "Service", &ListQuery::namespaced(namespace)).await?;

    Ok(correlate_services(services))
}

/// Fetches everything the inventory is built from. Nothing is returned unless every namespace
/// was fetched.
pub async fn fetch_objects(
    client: &impl ResourceClient,
    opts: &InventoryOptions,
) -> Result<FetchedData, InventoryError> {
    let namespaces = if opts.namespaces.is_empty() {
        get_available_namespaces(client).await?
    } else {
        opts.namespaces.clone()
    };

    let mut data = FetchedData {
        default_hostname: default_host_name(&client.host()),
        cluster_domain: get_cluster_domain(client).await,
        namespaces: BTreeMap::new(),
    };

    for namespace in namespaces {
        let vms = get_vms_for_namespace(client, &namespace, opts).await?;
        let vmis = get_vmis_for_namespace(client, &namespace, opts).await?;

        let services = if vms.is_empty() && vmis.is_empty() {
            ServicesByDomain::new()
        } else {
            get_services_for_namespace(client, &namespace).await?
        };

        debug!(
            "Fetched {} VM(s), {} VMI(s) and {} service domain(s) in namespace {namespace}",
            vms.len(),
            vmis.len(),
            services.len()
        );

        data.namespaces
            .insert(namespace, NamespaceData { vms, vmis, services });
    }

    info!(
        "Fetched {} namespace(s) from {}",
        data.namespaces.len(),
        data.default_hostname
    );

    Ok(data)
}

#[cfg(test)]
pub(crate) mod fake {
    use std::{
        cell::RefCell,
        collections::{BTreeMap, HashMap},
    };

    use serde_json::Value;

    use crate::kubevirt::client::{ApiFailure, ClientError, ListQuery, ResourceClient};

    /// An in-memory API server.
    #[derive(Default)]
    pub struct FakeClient {
        pub host: String,
        pub objects: BTreeMap<(String, String), Vec<Value>>,
        pub failures: HashMap<(String, String), ApiFailure>,
        pub calls: RefCell<Vec<(String, Option<String>)>>,
    }

    impl FakeClient {
        pub fn new(host: &str) -> Self {
            Self {
                host: host.into(),
                ..Default::default()
            }
        }

        pub fn with(mut self, api_version: &str, kind: &str, objects: Vec<Value>) -> Self {
            self.objects
                .entry((api_version.into(), kind.into()))
                .or_default()
                .extend(objects);
            self
        }

        pub fn failing(mut self, api_version: &str, kind: &str, failure: ApiFailure) -> Self {
            self.failures
                .insert((api_version.into(), kind.into()), failure);
            self
        }

        pub fn listed(&self, kind: &str) -> Vec<Option<String>> {
            self.calls
                .borrow()
                .iter()
                .filter(|(called, _)| called == kind)
                .map(|(_, namespace)| namespace.clone())
                .collect()
        }

        fn lookup(&self, api_version: &str, kind: &str) -> Result<&Vec<Value>, ClientError> {
            let key = (api_version.to_string(), kind.to_string());

            if let Some(failure) = self.failures.get(&key) {
                return Err(ClientError::Api(failure.clone()));
            }

            self.objects
                .get(&key)
                .ok_or_else(|| ClientError::ResourceNotFound {
                    api_version: api_version.into(),
                    kind: kind.into(),
                })
        }
    }

    fn matches_labels(object: &Value, selector: Option<&str>) -> bool {
        let Some(selector) = selector else {
            return true;
        };

        selector
            .split(',')
            .filter_map(|requirement| requirement.split_once('='))
            .all(|(key, value)| {
                object
                    .pointer("/metadata/labels")
                    .and_then(|labels| labels.get(key))
                    .and_then(Value::as_str)
                    == Some(value)
            })
    }

    impl ResourceClient for FakeClient {
        fn host(&self) -> String {
            self.host.clone()
        }

        async fn list(
            &self,
            api_version: &str,
            kind: &str,
            query: &ListQuery,
        ) -> Result<Vec<Value>, ClientError> {
            self.calls
                .borrow_mut()
                .push((kind.into(), query.namespace.clone()));

            Ok(self
                .lookup(api_version, kind)?
                .iter()
                .filter(|object| match &query.namespace {
                    Some(namespace) => {
                        object.pointer("/metadata/namespace").and_then(Value::as_str)
                            == Some(namespace.as_str())
                    }
                    None => true,
                })
                .filter(|object| matches_labels(object, query.label_selector.as_deref()))
                .cloned()
                .collect())
        }

        async fn get(&self, api_version: &str, kind: &str, name: &str) -> Result<Value, ClientError> {
            self.lookup(api_version, kind)?
                .iter()
                .find(|object| {
                    object.pointer("/metadata/name").and_then(Value::as_str) == Some(name)
                })
                .cloned()
                .ok_or_else(|| {
                    ClientError::Api(ApiFailure {
                        status: 404,
                        reason: "Not Found".into(),
                        body: None,
                        content_type: None,
                    })
                })
        }
    }
}
