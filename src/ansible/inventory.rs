use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::error::InventoryError;

pub const GROUP_ALL: &str = "all";
pub const GROUP_UNGROUPED: &str = "ungrouped";

pub type Vars = Map<String, Value>;

/// Replaces every character that is not valid in an Ansible group name with `_`.
pub fn sanitize_group_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Group {
    pub hosts: BTreeSet<String>,
    pub children: BTreeSet<String>,
    pub vars: Vars,
}

/// Accumulates the hosts, groups and variables of one inventory refresh. Every entry is unique
/// and every link points at a known entry.
#[derive(Clone, Debug, Default)]
pub struct InventoryBuilder {
    groups: BTreeMap<String, Group>,
    hosts: BTreeMap<String, Vars>,
}

impl InventoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_group(&mut self, name: &str) -> String {
        self.groups.entry(name.into()).or_default();
        name.into()
    }

    pub fn add_host(&mut self, name: &str) -> String {
        self.hosts.entry(name.into()).or_default();
        name.into()
    }

    /// Links a host or group below `group`. Groups win when a name is both.
    pub fn add_child(&mut self, group: &str, child: &str) -> Result<(), InventoryError> {
        if !self.groups.contains_key(group) {
            return Err(InventoryError::UnknownGroup(group.into()));
        }

        if self.groups.contains_key(child) {
            if child == group || self.descendants(child).contains(group) {
                return Err(InventoryError::GroupCycle {
                    group: group.into(),
                    child: child.into(),
                });
            }

            if let Some(parent) = self.groups.get_mut(group) {
                parent.children.insert(child.into());
            }
        } else if self.hosts.contains_key(child) {
            if let Some(parent) = self.groups.get_mut(group) {
                parent.hosts.insert(child.into());
            }
        } else {
            return Err(InventoryError::UnknownEntity(child.into()));
        }

        Ok(())
    }

    pub fn set_variable(
        &mut self,
        entity: &str,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<(), InventoryError> {
        let vars = if let Some(group) = self.groups.get_mut(entity) {
            &mut group.vars
        } else if let Some(vars) = self.hosts.get_mut(entity) {
            vars
        } else {
            return Err(InventoryError::UnknownEntity(entity.into()));
        };

        vars.insert(key.into(), value.into());
        Ok(())
    }

    /// The variables of a host as seen by templates, including `inventory_hostname`,
    /// `inventory_hostname_short` and `group_names`.
    pub fn get_vars(&self, host: &str) -> Result<Vars, InventoryError> {
        let mut vars = self
            .hosts
            .get(host)
            .cloned()
            .ok_or_else(|| InventoryError::UnknownEntity(host.into()))?;

        let short = host.split('.').next().unwrap_or(host);
        vars.insert("inventory_hostname".into(), host.into());
        vars.insert("inventory_hostname_short".into(), short.into());
        vars.insert(
            "group_names".into(),
            self.group_names(host).into_iter().collect::<Vec<_>>().into(),
        );

        Ok(vars)
    }

    pub fn host_vars(&self, host: &str) -> Option<&Vars> {
        self.hosts.get(host)
    }

    pub fn hosts(&self) -> &BTreeMap<String, Vars> {
        &self.hosts
    }

    pub fn groups(&self) -> &BTreeMap<String, Group> {
        &self.groups
    }

    #[cfg(test)]
    pub fn has_group(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    /// Groups that are nobody's child.
    pub fn top_level_groups(&self) -> Vec<&str> {
        let nested: BTreeSet<&str> = self
            .groups
            .values()
            .flat_map(|group| group.children.iter().map(String::as_str))
            .collect();

        self.groups
            .keys()
            .map(String::as_str)
            .filter(|name| !nested.contains(name))
            .collect()
    }

    /// Hosts that are not a member of any group.
    pub fn ungrouped_hosts(&self) -> Vec<&str> {
        self.hosts
            .keys()
            .map(String::as_str)
            .filter(|host| !self.groups.values().any(|group| group.hosts.contains(*host)))
            .collect()
    }

    /// The groups a host belongs to directly or through a child group.
    fn group_names(&self, host: &str) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self
            .groups
            .iter()
            .filter(|(_, group)| group.hosts.contains(host))
            .map(|(name, _)| name.clone())
            .collect();

        let mut pending: Vec<String> = names.iter().cloned().collect();
        while let Some(child) = pending.pop() {
            for (name, group) in &self.groups {
                if group.children.contains(&child) && names.insert(name.clone()) {
                    pending.push(name.clone());
                }
            }
        }

        names
    }

    fn descendants(&self, group: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut pending = vec![group.to_owned()];

        while let Some(name) = pending.pop() {
            if let Some(entry) = self.groups.get(&name) {
                for child in &entry.children {
                    if found.insert(child.clone()) {
                        pending.push(child.clone());
                    }
                }
            }
        }

        found
    }
}
