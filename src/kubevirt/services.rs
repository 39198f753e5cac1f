use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::kubevirt::resources::{LABEL_KUBEVIRT_IO_DOMAIN, Service};

pub const TYPE_LOADBALANCER: &str = "LoadBalancer";
pub const TYPE_NODEPORT: &str = "NodePort";

/// Protocols an inventory host can be reached with through a Service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteAccess {
    Ssh,
    WinRmHttp,
    WinRmHttps,
}

impl RemoteAccess {
    pub fn port(self) -> i32 {
        match self {
            RemoteAccess::Ssh => 22,
            RemoteAccess::WinRmHttp => 5985,
            RemoteAccess::WinRmHttps => 5986,
        }
    }

    pub fn from_port(port: i32) -> Option<Self> {
        [
            RemoteAccess::Ssh,
            RemoteAccess::WinRmHttp,
            RemoteAccess::WinRmHttps,
        ]
        .into_iter()
        .find(|access| access.port() == port)
    }
}

pub type ServicesByDomain = BTreeMap<String, Vec<Service>>;

/// Keeps the LoadBalancer and NodePort services that expose exactly one remote access port and
/// select a KubeVirt domain, keyed by that domain.
pub fn correlate_services(services: impl IntoIterator<Item = Service>) -> ServicesByDomain {
    let mut by_domain = ServicesByDomain::new();

    for service in services {
        if service.remote_access().is_none() {
            continue;
        }

        let Some(domain) = service.domain().map(str::to_owned) else {
            continue;
        };

        by_domain.entry(domain).or_default().push(service);
    }

    by_domain
}

impl Service {
    pub fn service_type(&self) -> Option<&str> {
        self.spec.as_ref()?.type_.as_deref()
    }

    /// The domain selected by this service.
    pub fn domain(&self) -> Option<&str> {
        self.spec
            .as_ref()?
            .selector
            .as_ref()?
            .get(LABEL_KUBEVIRT_IO_DOMAIN)
            .map(String::as_str)
    }

    /// The remote access protocol this service exposes. Services with more than one port are
    /// ambiguous and never expose one.
    pub fn remote_access(&self) -> Option<RemoteAccess> {
        if !matches!(self.service_type(), Some(TYPE_LOADBALANCER | TYPE_NODEPORT)) {
            return None;
        }

        match self.target_port()? {
            IntOrString::Int(port) => RemoteAccess::from_port(*port),
            IntOrString::String(_) => None,
        }
    }

    fn target_port(&self) -> Option<&IntOrString> {
        let ports = self.spec.as_ref()?.ports.as_ref()?;
        match ports.as_slice() {
            [port] => port.target_port.as_ref(),
            _ => None,
        }
    }

    /// The host to connect to. NodePort services are reached through the node the VMI runs on.
    pub fn host(&self, node_name: Option<&str>) -> Option<String> {
        match self.service_type()? {
            TYPE_LOADBALANCER => {
                let ingress = self
                    .status
                    .as_ref()?
                    .load_balancer
                    .as_ref()?
                    .ingress
                    .as_ref()?
                    .first()?;

                ingress.hostname.clone().or_else(|| ingress.ip.clone())
            }
            TYPE_NODEPORT => node_name.map(str::to_owned),
            _ => None,
        }
    }

    pub fn port(&self) -> Option<i32> {
        let port = self.spec.as_ref()?.ports.as_ref()?.first()?;

        match self.service_type()? {
            TYPE_LOADBALANCER => Some(port.port),
            TYPE_NODEPORT => port.node_port,
            _ => None,
        }
    }
}
