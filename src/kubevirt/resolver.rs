use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::debug;

use crate::{
    ansible::{Composer, InventoryBuilder, sanitize_group_name},
    error::InventoryError,
    kubevirt::{
        connectivity::{ConnectionVars, derive_connection},
        fetcher::{FetchedData, NamespaceData},
        resources::{KubeVirtObject, ObjectIdentity, VirtualMachine, VirtualMachineInstance},
        services::ServicesByDomain,
    },
    options::InventoryOptions,
    utils::format_var_name,
};

/// Builds hosts, groups and variables from fetched objects.
pub struct Resolver<'a> {
    pub opts: &'a InventoryOptions,
    pub composer: &'a Composer,
    /// Base domain used for secondary DNS names and NodePort hosts.
    pub base_domain: Option<String>,
}

/// Populates `inventory` from everything fetched in one refresh.
pub fn populate_inventory(
    inventory: &mut InventoryBuilder,
    data: &FetchedData,
    opts: &InventoryOptions,
    composer: &Composer,
) -> Result<(), InventoryError> {
    let name = opts
        .name
        .clone()
        .unwrap_or_else(|| data.default_hostname.clone());

    let resolver = Resolver {
        opts,
        composer,
        base_domain: opts.base_domain_or(data.cluster_domain.as_deref()),
    };

    for (namespace, namespace_data) in &data.namespaces {
        resolver.populate_inventory_from_namespace(inventory, &name, namespace, namespace_data)?;
    }

    Ok(())
}

/// Indexes objects by name, dropping those without a name, namespace or uid.
fn valid_by_name<T: KubeVirtObject>(objects: &[T]) -> BTreeMap<String, (ObjectIdentity, &T)> {
    objects
        .iter()
        .filter_map(|object| match object.identity() {
            Some(identity) => Some((identity.name.clone(), (identity, object))),
            None => {
                debug!("Skipping object without name, namespace or uid");
                None
            }
        })
        .collect()
}

impl Resolver<'_> {
    pub fn populate_inventory_from_namespace(
        &self,
        inventory: &mut InventoryBuilder,
        name: &str,
        namespace: &str,
        data: &NamespaceData,
    ) -> Result<(), InventoryError> {
        let vms = valid_by_name(&data.vms);
        let vmis = valid_by_name(&data.vmis);

        if vms.is_empty() && vmis.is_empty() {
            return Ok(());
        }

        let root_group = inventory.add_group(&sanitize_group_name(name));
        let namespace_group =
            inventory.add_group(&sanitize_group_name(&format!("namespace_{namespace}")));
        inventory.add_child(&root_group, &namespace_group)?;

        for (vm_name, (identity, vm)) in &vms {
            let hostname = self.add_host(inventory, identity, &namespace_group)?;
            self.set_vars_from_vm(inventory, &hostname, vm)?;
            if let Some((_, vmi)) = vmis.get(vm_name) {
                self.set_vars_from_vmi(inventory, &hostname, vmi, &data.services)?;
            } else if vm.is_stopped() {
                debug!("VM {vm_name} in namespace {namespace} is stopped");
            }
            self.composer.apply(inventory, &hostname)?;
        }

        for (vmi_name, (identity, vmi)) in &vmis {
            if vms.contains_key(vmi_name) {
                continue;
            }

            let hostname = self.add_host(inventory, identity, &namespace_group)?;
            self.set_vars_from_vmi(inventory, &hostname, vmi, &data.services)?;
            self.composer.apply(inventory, &hostname)?;
        }

        Ok(())
    }

    fn add_host(
        &self,
        inventory: &mut InventoryBuilder,
        identity: &ObjectIdentity,
        namespace_group: &str,
    ) -> Result<String, InventoryError> {
        let hostname = inventory.add_host(&self.opts.host_format.render(identity));
        inventory.add_child(namespace_group, &hostname)?;

        Ok(hostname)
    }

    fn set_vars_from_vm(
        &self,
        inventory: &mut InventoryBuilder,
        hostname: &str,
        vm: &VirtualMachine,
    ) -> Result<(), InventoryError> {
        self.set_common_vars(inventory, hostname, "vm", vm)
    }

    fn set_vars_from_vmi(
        &self,
        inventory: &mut InventoryBuilder,
        hostname: &str,
        vmi: &VirtualMachineInstance,
        services: &ServicesByDomain,
    ) -> Result<(), InventoryError> {
        self.set_common_vars(inventory, hostname, "vmi", vmi)?;

        let interfaces = vmi.interfaces();
        let interface = match &self.opts.network_name {
            None => interfaces.first(),
            Some(network_name) => interfaces
                .iter()
                .find(|interface| interface.name.as_ref() == Some(network_name)),
        };

        let Some(ip_address) = interface.and_then(|interface| interface.ip_address.as_deref())
        else {
            debug!("No usable interface found for host {hostname}");
            return Ok(());
        };

        let services = vmi
            .domain()
            .and_then(|domain| services.get(domain))
            .map(Vec::as_slice)
            .unwrap_or_default();

        let vars = derive_connection(
            vmi,
            ip_address,
            services,
            self.opts,
            self.base_domain.as_deref(),
        );
        self.set_connection_vars(inventory, hostname, vars)
    }

    fn set_connection_vars(
        &self,
        inventory: &mut InventoryBuilder,
        hostname: &str,
        vars: ConnectionVars,
    ) -> Result<(), InventoryError> {
        if let Some(connection) = vars.ansible_connection {
            inventory.set_variable(hostname, "ansible_connection", connection)?;
        }

        inventory.set_variable(hostname, "ansible_host", vars.ansible_host)?;

        match vars.ansible_port {
            Some(port) => inventory.set_variable(hostname, "ansible_port", port),
            None if !self.opts.unset_ansible_port => {
                inventory.set_variable(hostname, "ansible_port", Value::Null)
            }
            None => Ok(()),
        }
    }

    fn set_common_vars(
        &self,
        inventory: &mut InventoryBuilder,
        hostname: &str,
        prefix: &str,
        object: &impl KubeVirtObject,
    ) -> Result<(), InventoryError> {
        let metadata = object.metadata();

        if let Some(annotations) = metadata.annotations.as_ref().filter(|a| !a.is_empty()) {
            inventory.set_variable(
                hostname,
                &format!("{prefix}_annotations"),
                serde_json::to_value(annotations)?,
            )?;
        }

        if let Some(labels) = metadata.labels.as_ref().filter(|l| !l.is_empty()) {
            inventory.set_variable(
                hostname,
                &format!("{prefix}_labels"),
                serde_json::to_value(labels)?,
            )?;

            if self.opts.create_groups {
                self.set_groups_from_labels(inventory, hostname, labels)?;
            }
        }

        if let Some(version) = metadata.resource_version.as_deref().filter(|v| !v.is_empty()) {
            inventory.set_variable(hostname, &format!("{prefix}_resource_version"), version)?;
        }

        if let Some(uid) = metadata.uid.as_deref().filter(|u| !u.is_empty()) {
            inventory.set_variable(hostname, &format!("{prefix}_uid"), uid)?;
        }

        for (key, value) in object.status().into_iter().flatten() {
            inventory.set_variable(
                hostname,
                &format!("{prefix}_{}", format_var_name(key)),
                value.clone(),
            )?;
        }

        Ok(())
    }

    fn set_groups_from_labels(
        &self,
        inventory: &mut InventoryBuilder,
        hostname: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), InventoryError> {
        let groups: BTreeSet<String> = labels
            .iter()
            .map(|(key, value)| sanitize_group_name(&format!("label_{key}_{value}")))
            .collect();

        for group in groups {
            inventory.add_group(&group);
            inventory.add_child(&group, hostname)?;
        }

        Ok(())
    }
}
