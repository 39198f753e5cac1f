use std::collections::BTreeMap;

use crate::{
    kubevirt::{
        resources::{Service, VirtualMachineInstance},
        services::RemoteAccess,
    },
    options::InventoryOptions,
};

pub const ID_MSWINDOWS: &str = "mswindows";
pub const ANNOTATION_KUBEVIRT_IO_CLUSTER_PREFERENCE_NAME: &str =
    "kubevirt.io/cluster-preference-name";
pub const ANNOTATION_KUBEVIRT_IO_PREFERENCE_NAME: &str = "kubevirt.io/preference-name";
pub const ANNOTATION_VM_KUBEVIRT_IO_OS: &str = "vm.kubevirt.io/os";

/// Decides whether a guest runs Windows. A reported guest OS id wins over annotations, which are
/// consulted from the most to the least specific.
pub fn is_windows(
    guest_os_id: Option<&str>,
    annotations: Option<&BTreeMap<String, String>>,
) -> bool {
    if let Some(id) = guest_os_id.filter(|id| !id.is_empty()) {
        return id == ID_MSWINDOWS;
    }

    let Some(annotations) = annotations else {
        return false;
    };

    [
        ANNOTATION_KUBEVIRT_IO_CLUSTER_PREFERENCE_NAME,
        ANNOTATION_KUBEVIRT_IO_PREFERENCE_NAME,
        ANNOTATION_VM_KUBEVIRT_IO_OS,
    ]
    .into_iter()
    .find_map(|annotation| annotations.get(annotation))
    .is_some_and(|value| value.starts_with("windows"))
}

/// Picks the service to connect through. Windows guests prefer WinRM over HTTPS.
pub fn select_service(services: &[Service], windows: bool) -> Option<&Service> {
    let wanted: &[RemoteAccess] = if windows {
        &[RemoteAccess::WinRmHttps, RemoteAccess::WinRmHttp]
    } else {
        &[RemoteAccess::Ssh]
    };

    wanted.iter().find_map(|access| {
        services
            .iter()
            .find(|service| service.remote_access() == Some(*access))
    })
}

/// The connection variables derived for a host.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionVars {
    pub ansible_host: String,
    pub ansible_port: Option<i32>,
    pub ansible_connection: Option<&'static str>,
}

/// Derives how Ansible reaches a VMI whose selected interface has `ip_address`. Secondary DNS
/// names take precedence over services, which take precedence over the raw address.
pub fn derive_connection(
    vmi: &VirtualMachineInstance,
    ip_address: &str,
    services: &[Service],
    opts: &InventoryOptions,
    base_domain: Option<&str>,
) -> ConnectionVars {
    let windows = is_windows(vmi.guest_os_id(), vmi.annotations());
    let service = select_service(services, windows);

    let mut vars = ConnectionVars {
        ansible_host: ip_address.into(),
        ansible_port: None,
        ansible_connection: windows.then_some("winrm"),
    };

    match (&opts.network_name, service) {
        (Some(network_name), _) if opts.kube_secondary_dns => {
            let name = vmi.metadata.name.as_deref().unwrap_or_default();
            let namespace = vmi.metadata.namespace.as_deref().unwrap_or_default();

            // https://github.com/kubevirt/kubesecondarydns#parameters
            vars.ansible_host = format!("{network_name}.{name}.{namespace}.vm");
            if let Some(base_domain) = base_domain {
                vars.ansible_host = format!("{}.{base_domain}", vars.ansible_host);
            }
        }
        (None, Some(service)) if opts.use_service => {
            let node_name = vmi.node_name().map(|node_name| match base_domain {
                Some(base_domain) if opts.append_base_domain => {
                    format!("{node_name}.{base_domain}")
                }
                _ => node_name.to_owned(),
            });

            if let (Some(host), Some(port)) = (service.host(node_name.as_deref()), service.port()) {
                vars.ansible_host = host;
                vars.ansible_port = Some(port);
            }
        }
        _ => {}
    }

    vars
}
