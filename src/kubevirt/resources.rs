use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::{ServiceSpec, ServiceStatus},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const LABEL_KUBEVIRT_IO_DOMAIN: &str = "kubevirt.io/domain";

pub type StatusMap = serde_json::Map<String, Value>;

/// The fields of a VirtualMachine or VirtualMachineInstance that end up in the inventory.
pub trait KubeVirtObject {
    fn metadata(&self) -> &ObjectMeta;
    fn status(&self) -> Option<&StatusMap>;

    fn identity(&self) -> Option<ObjectIdentity> {
        ObjectIdentity::from_metadata(self.metadata())
    }
}

/// The metadata every inventory host is named after.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectIdentity {
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

impl ObjectIdentity {
    pub fn from_metadata(metadata: &ObjectMeta) -> Option<Self> {
        Some(Self {
            name: metadata.name.clone()?,
            namespace: metadata.namespace.clone()?,
            uid: metadata.uid.clone()?,
        })
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct VirtualMachine {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<VirtualMachineSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusMap>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_strategy: Option<String>,
}

impl VirtualMachine {
    /// A VM is stopped when it is explicitly not running or its run strategy halts it.
    pub fn is_stopped(&self) -> bool {
        self.spec.as_ref().is_some_and(|spec| {
            spec.running == Some(false) || spec.run_strategy.as_deref() == Some("Halted")
        })
    }
}

impl KubeVirtObject for VirtualMachine {
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn status(&self) -> Option<&StatusMap> {
        self.status.as_ref()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct VirtualMachineInstance {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusMap>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VmiInterface {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
}

impl VirtualMachineInstance {
    /// The network interfaces reported in the status. Malformed entries are ignored.
    pub fn interfaces(&self) -> Vec<VmiInterface> {
        self.status_field("interfaces")
            .and_then(|interfaces| interfaces.as_array())
            .map(|interfaces| {
                interfaces
                    .iter()
                    .filter_map(|interface| serde_json::from_value(interface.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn node_name(&self) -> Option<&str> {
        self.status_field("nodeName")?.as_str()
    }

    pub fn guest_os_id(&self) -> Option<&str> {
        self.status_field("guestOSInfo")?.get("id")?.as_str()
    }

    pub fn annotations(&self) -> Option<&BTreeMap<String, String>> {
        self.metadata.annotations.as_ref()
    }

    pub fn domain(&self) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()?
            .get(LABEL_KUBEVIRT_IO_DOMAIN)
            .map(String::as_str)
    }

    fn status_field(&self, key: &str) -> Option<&Value> {
        self.status.as_ref()?.get(key)
    }
}

impl KubeVirtObject for VirtualMachineInstance {
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn status(&self) -> Option<&StatusMap> {
        self.status.as_ref()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Service {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<ServiceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ServiceStatus>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_vmi_status_accessors() {
        // Given
        let vmi: VirtualMachineInstance = serde_json::from_value(json!({
            "metadata": {
                "name": "testvmi",
                "namespace": "default",
                "uid": "f8abae7c-d792-4b9b-af95-62d322ae5bc1",
                "labels": {"kubevirt.io/domain": "test-domain"},
            },
            "status": {
                "interfaces": [
                    {"name": "default", "ipAddress": "10.10.10.10"},
                    {"name": "bridge", "ipAddress": null},
                ],
                "nodeName": "node01",
                "guestOSInfo": {"id": "fedora", "versionId": "40"},
            },
        }))
        .unwrap();

        // When / Then
        assert_eq!(
            vmi.interfaces(),
            vec![
                VmiInterface {
                    name: Some("default".into()),
                    ip_address: Some("10.10.10.10".into()),
                },
                VmiInterface {
                    name: Some("bridge".into()),
                    ip_address: None,
                },
            ]
        );
        assert_eq!(vmi.node_name(), Some("node01"));
        assert_eq!(vmi.guest_os_id(), Some("fedora"));
        assert_eq!(vmi.domain(), Some("test-domain"));
    }

    #[test]
    fn test_vmi_without_status() {
        let vmi: VirtualMachineInstance =
            serde_json::from_value(json!({"metadata": {"name": "testvmi"}, "status": null}))
                .unwrap();

        assert!(vmi.interfaces().is_empty());
        assert_eq!(vmi.node_name(), None);
        assert_eq!(vmi.guest_os_id(), None);
    }

    #[test]
    fn test_identity_requires_name_namespace_and_uid() {
        let complete: VirtualMachine = serde_json::from_value(json!({
            "metadata": {"name": "testvm", "namespace": "default", "uid": "1234"},
        }))
        .unwrap();
        let without_uid: VirtualMachine = serde_json::from_value(json!({
            "metadata": {"name": "testvm", "namespace": "default"},
        }))
        .unwrap();

        assert_eq!(
            complete.identity(),
            Some(ObjectIdentity {
                name: "testvm".into(),
                namespace: "default".into(),
                uid: "1234".into(),
            })
        );
        assert_eq!(without_uid.identity(), None);
    }

    #[test]
    fn test_vm_is_stopped() {
        let stopped: VirtualMachine =
            serde_json::from_value(json!({"spec": {"running": false}})).unwrap();
        let halted: VirtualMachine =
            serde_json::from_value(json!({"spec": {"runStrategy": "Halted"}})).unwrap();
        let running: VirtualMachine =
            serde_json::from_value(json!({"spec": {"running": true}})).unwrap();

        assert!(stopped.is_stopped());
        assert!(halted.is_stopped());
        assert!(!running.is_stopped());
    }
}
