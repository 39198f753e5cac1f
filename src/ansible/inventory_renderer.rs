use serde_json::{Map, Value, json};
use tracing::warn;

use crate::ansible::inventory::{GROUP_ALL, GROUP_UNGROUPED, Group, InventoryBuilder};

const META: &str = "_meta";

/// Renders the whole inventory in the format Ansible expects from `--list`. Groups named `all` or
/// `ungrouped` are merged into the implicit groups of the same name and a group named `_meta` is
/// dropped.
pub fn render_inventory(inventory: &InventoryBuilder) -> Result<String, super::RenderError> {
    let mut output = Map::new();

    let hostvars: Map<String, Value> = inventory
        .hosts()
        .iter()
        .map(|(host, vars)| (host.clone(), Value::Object(vars.clone())))
        .collect();
    output.insert(META.into(), json!({ "hostvars": hostvars }));

    let mut ungrouped = inventory
        .groups()
        .get(GROUP_UNGROUPED)
        .cloned()
        .unwrap_or_default();
    ungrouped
        .hosts
        .extend(inventory.ungrouped_hosts().into_iter().map(str::to_owned));
    ungrouped.children.retain(|child| !is_reserved(child));

    let mut all = inventory.groups().get(GROUP_ALL).cloned().unwrap_or_default();
    all.children
        .extend(inventory.top_level_groups().into_iter().map(str::to_owned));
    all.children.retain(|child| !is_reserved(child));

    let mut all_children: Vec<&str> = all.children.iter().map(String::as_str).collect();
    if ungrouped != Group::default() {
        all_children.push(GROUP_UNGROUPED);
        output.insert(GROUP_UNGROUPED.into(), render_group(&ungrouped));
    }

    let mut rendered_all = render_group(&Group {
        children: Default::default(),
        ..all.clone()
    });
    rendered_all["children"] = json!(all_children);
    output.insert(GROUP_ALL.into(), rendered_all);

    for (name, group) in inventory.groups() {
        if name == META {
            warn!("Dropping group {META}, the name is reserved");
            continue;
        }
        if is_reserved(name) {
            continue;
        }

        output.insert(name.clone(), render_group(group));
    }

    Ok(serde_json::to_string_pretty(&Value::Object(output))?)
}

fn is_reserved(name: &str) -> bool {
    [GROUP_ALL, GROUP_UNGROUPED, META].contains(&name)
}

fn render_group(group: &Group) -> Value {
    let mut rendered = Map::new();

    if !group.hosts.is_empty() {
        rendered.insert("hosts".into(), json!(group.hosts));
    }
    if !group.children.is_empty() {
        rendered.insert("children".into(), json!(group.children));
    }
    if !group.vars.is_empty() {
        rendered.insert("vars".into(), Value::Object(group.vars.clone()));
    }

    Value::Object(rendered)
}

/// Renders the variables of a single host for `--host`. Unknown hosts have no variables.
pub fn render_host(inventory: &InventoryBuilder, host: &str) -> Result<String, super::RenderError> {
    let vars = inventory.host_vars(host).cloned().unwrap_or_default();

    Ok(serde_json::to_string_pretty(&Value::Object(vars))?)
}
