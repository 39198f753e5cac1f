use minijinja::{Environment, UndefinedBehavior, Value, value::ValueKind};
use tracing::debug;

use crate::{
    ansible::inventory::{InventoryBuilder, sanitize_group_name},
    error::InventoryError,
    options::{ComposeOptions, KeyedGroup},
};

/// Evaluates the user defined `compose`, `groups` and `keyed_groups` expressions against the
/// variables of a host.
pub struct Composer {
    env: Environment<'static>,
    options: ComposeOptions,
}

impl Composer {
    /// Checks every expression up front so mistakes surface before the cluster is contacted.
    pub fn new(options: ComposeOptions) -> Result<Self, InventoryError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);

        let expressions = options
            .compose
            .values()
            .chain(options.groups.values())
            .chain(options.keyed_groups.iter().map(|keyed| &keyed.key));
        for expression in expressions {
            env.compile_expression(expression).map_err(|e| {
                InventoryError::InvalidConfig(format!("Invalid expression {expression:?}: {e}"))
            })?;
        }

        for keyed in &options.keyed_groups {
            keyed.validate().map_err(InventoryError::InvalidConfig)?;
        }

        Ok(Self { env, options })
    }

    /// Applies composed variables, groups and keyed groups to `host`. All three see the variables
    /// the host had before this call.
    pub fn apply(
        &self,
        inventory: &mut InventoryBuilder,
        host: &str,
    ) -> Result<(), InventoryError> {
        if self.options.is_empty() {
            return Ok(());
        }

        let context = Value::from_serialize(inventory.get_vars(host)?);

        self.set_composite_vars(inventory, host, &context)?;
        self.add_host_to_composed_groups(inventory, host, &context)?;
        self.add_host_to_keyed_groups(inventory, host, &context)
    }

    fn eval(&self, expression: &str, context: &Value) -> Result<Value, minijinja::Error> {
        let value = self.env.compile_expression(expression)?.eval(context)?;

        if value.is_undefined() {
            return Err(minijinja::Error::new(
                minijinja::ErrorKind::UndefinedError,
                format!("{expression} is undefined"),
            ));
        }

        Ok(value)
    }

    fn set_composite_vars(
        &self,
        inventory: &mut InventoryBuilder,
        host: &str,
        context: &Value,
    ) -> Result<(), InventoryError> {
        for (name, expression) in &self.options.compose {
            let value = self
                .eval(expression, context)
                .map_err(|e| {
                    InventoryError::Compose(format!("Could not set {name} for host {host}: {e}"))
                })
                .and_then(|value| Ok(serde_json::to_value(&value)?))?;

            inventory.set_variable(host, name, value)?;
        }

        Ok(())
    }

    fn add_host_to_composed_groups(
        &self,
        inventory: &mut InventoryBuilder,
        host: &str,
        context: &Value,
    ) -> Result<(), InventoryError> {
        for (group, expression) in &self.options.groups {
            let matches = match self.eval(expression, context) {
                Ok(value) => value.is_true(),
                Err(e) if self.options.strict => {
                    return Err(InventoryError::Compose(format!(
                        "Could not add host {host} to group {group}: {e}"
                    )));
                }
                Err(e) => {
                    debug!("Skipping group {group} for host {host}: {e}");
                    continue;
                }
            };

            if matches {
                let group = inventory.add_group(&sanitize_group_name(group));
                inventory.add_child(&group, host)?;
            }
        }

        Ok(())
    }

    fn add_host_to_keyed_groups(
        &self,
        inventory: &mut InventoryBuilder,
        host: &str,
        context: &Value,
    ) -> Result<(), InventoryError> {
        for keyed in &self.options.keyed_groups {
            let key = match self.eval(&keyed.key, context) {
                Ok(key) => key,
                Err(e) if self.options.strict => {
                    return Err(InventoryError::Compose(format!(
                        "Could not generate group for host {host} from {} entry: {e}",
                        keyed.key
                    )));
                }
                Err(e) => {
                    debug!("Skipping keyed group {} for host {host}: {e}", keyed.key);
                    continue;
                }
            };

            let Some(names) = group_names_from_key(keyed, &key)? else {
                if self.options.strict {
                    return Err(InventoryError::Compose(format!(
                        "No key or key resulted empty for {} in host {host}, invalid entry",
                        keyed.key
                    )));
                }
                continue;
            };

            let parent = match &keyed.parent_group {
                Some(parent) => match self.env.render_str(parent, context) {
                    Ok(parent) => Some(sanitize_group_name(&parent)),
                    Err(e) if self.options.strict => {
                        return Err(InventoryError::Compose(format!(
                            "Could not generate parent group {parent} for group {}: {e}",
                            keyed.key
                        )));
                    }
                    Err(_) => continue,
                },
                None => None,
            };

            let separator = if keyed.prefix.is_empty() && !self.options.leading_separator {
                ""
            } else {
                keyed.separator.as_str()
            };

            for name in names {
                let group = inventory.add_group(&sanitize_group_name(&format!(
                    "{}{separator}{name}",
                    keyed.prefix
                )));
                inventory.add_child(&group, host)?;

                if let Some(parent) = parent.as_deref().filter(|parent| !parent.is_empty()) {
                    inventory.add_group(parent);
                    inventory.add_child(parent, &group)?;
                }
            }
        }

        Ok(())
    }
}

/// Turns the result of a keyed group expression into bare group names. `None` means the key
/// resulted empty: a falsy value, unless it is an empty string with a default value.
fn group_names_from_key(
    keyed: &KeyedGroup,
    key: &Value,
) -> Result<Option<Vec<String>>, InventoryError> {
    let or_default = |name: String| match (&keyed.default_value, name.is_empty()) {
        (Some(default_value), true) => default_value.clone(),
        _ => name,
    };

    let empty_with_default = key.as_str() == Some("") && keyed.default_value.is_some();
    if !key.is_true() && !empty_with_default {
        return Ok(None);
    }

    let names = match key.kind() {
        ValueKind::String => vec![or_default(key.as_str().unwrap_or_default().to_owned())],
        ValueKind::Seq | ValueKind::Iterable => key
            .try_iter()
            .map_err(|e| InventoryError::Compose(e.to_string()))?
            .map(|item| or_default(item.to_string()))
            .collect(),
        ValueKind::Map => {
            let mut names = Vec::new();
            for name in key
                .try_iter()
                .map_err(|e| InventoryError::Compose(e.to_string()))?
            {
                let value = key
                    .get_item(&name)
                    .map_err(|e| InventoryError::Compose(e.to_string()))?;
                let value = value.to_string();

                names.push(match (&keyed.default_value, keyed.trailing_separator) {
                    (Some(default_value), _) if value.is_empty() => {
                        format!("{name}{}{default_value}", keyed.separator)
                    }
                    (None, Some(false)) if value.is_empty() => name.to_string(),
                    _ => format!("{name}{}{value}", keyed.separator),
                });
            }
            names
        }
        other => {
            return Err(InventoryError::Compose(format!(
                "Invalid group name format, expected a string or a list of them or dictionary, got: {other:?}"
            )));
        }
    };

    Ok(Some(names))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;

    const HOST: &str = "default-testvmi";

    fn inventory() -> InventoryBuilder {
        let mut inventory = InventoryBuilder::new();
        inventory.add_host(HOST);
        inventory
            .set_variable(HOST, "vmi_node_name", "test-node")
            .unwrap();
        inventory
            .set_variable(HOST, "vmi_migration_method", "BlockMigration")
            .unwrap();
        inventory
            .set_variable(HOST, "vmi_guest_os_info", json!({"id": "fedora", "versionId": "40"}))
            .unwrap();
        inventory
            .set_variable(HOST, "vmi_labels", json!({"app": "web", "tier": ""}))
            .unwrap();
        inventory
    }

    fn keyed(key: &str) -> KeyedGroup {
        KeyedGroup {
            key: key.into(),
            prefix: String::new(),
            separator: "_".into(),
            parent_group: None,
            default_value: None,
            trailing_separator: None,
        }
    }

    fn groups_of(inventory: &InventoryBuilder) -> Vec<&str> {
        inventory
            .groups()
            .iter()
            .filter(|(_, group)| group.hosts.contains(HOST))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    #[test]
    fn test_set_composable_vars() {
        // Given
        let composer = Composer::new(ComposeOptions {
            compose: BTreeMap::from([("set_from_another_var".into(), "vmi_node_name".into())]),
            groups: BTreeMap::from([(
                "block_migratable_vmis".into(),
                "vmi_migration_method == 'BlockMigration'".into(),
            )]),
            keyed_groups: vec![KeyedGroup {
                prefix: "fedora".into(),
                ..keyed("vmi_guest_os_info.versionId")
            }],
            strict: true,
            ..Default::default()
        })
        .unwrap();
        let mut inventory = inventory();

        // When
        composer.apply(&mut inventory, HOST).unwrap();

        // Then
        assert_eq!(
            inventory.host_vars(HOST).unwrap()["set_from_another_var"],
            json!("test-node")
        );
        assert_eq!(groups_of(&inventory), vec!["block_migratable_vmis", "fedora_40"]);
    }

    #[test]
    fn test_compose_is_always_strict() {
        let composer = Composer::new(ComposeOptions {
            compose: BTreeMap::from([("broken".into(), "does_not_exist".into())]),
            ..Default::default()
        })
        .unwrap();

        let result = composer.apply(&mut inventory(), HOST);

        assert!(matches!(result, Err(InventoryError::Compose(_))));
    }

    #[test]
    fn test_group_errors_only_fail_when_strict() {
        let options = ComposeOptions {
            groups: BTreeMap::from([("broken".into(), "does_not_exist.attribute == 'x'".into())]),
            ..Default::default()
        };
        let lenient = Composer::new(options.clone()).unwrap();
        let strict = Composer::new(ComposeOptions {
            strict: true,
            ..options
        })
        .unwrap();

        let mut inventory = inventory();
        assert!(lenient.apply(&mut inventory, HOST).is_ok());
        assert!(groups_of(&inventory).is_empty());
        assert!(strict.apply(&mut inventory, HOST).is_err());
    }

    #[test]
    fn test_composed_vars_are_not_visible_to_groups() {
        let composer = Composer::new(ComposeOptions {
            compose: BTreeMap::from([("new_var".into(), "'value'".into())]),
            groups: BTreeMap::from([("with_new_var".into(), "new_var is defined".into())]),
            ..Default::default()
        })
        .unwrap();
        let mut inventory = inventory();

        composer.apply(&mut inventory, HOST).unwrap();

        assert!(groups_of(&inventory).is_empty());
    }

    #[test]
    fn test_keyed_group_from_mapping() {
        // Given
        let composer = Composer::new(ComposeOptions {
            keyed_groups: vec![
                KeyedGroup {
                    prefix: "label".into(),
                    parent_group: Some("labels".into()),
                    ..keyed("vmi_labels")
                },
                KeyedGroup {
                    prefix: "trimmed".into(),
                    trailing_separator: Some(false),
                    ..keyed("vmi_labels")
                },
                KeyedGroup {
                    prefix: "defaulted".into(),
                    default_value: Some("none".into()),
                    ..keyed("vmi_labels")
                },
            ],
            ..Default::default()
        })
        .unwrap();
        let mut inventory = inventory();

        // When
        composer.apply(&mut inventory, HOST).unwrap();

        // Then
        assert_eq!(
            groups_of(&inventory),
            vec![
                "defaulted_app_web",
                "defaulted_tier_none",
                "label_app_web",
                "label_tier_",
                "trimmed_app_web",
                "trimmed_tier",
            ]
        );
        let parent = &inventory.groups()["labels"];
        assert!(parent.children.contains("label_app_web"));
        assert!(parent.children.contains("label_tier_"));
    }

    #[test]
    fn test_keyed_group_from_list_and_leading_separator() {
        let composer = Composer::new(ComposeOptions {
            keyed_groups: vec![keyed("['a', 'b']"), keyed("vmi_node_name")],
            leading_separator: false,
            ..Default::default()
        })
        .unwrap();
        let mut inventory = inventory();

        composer.apply(&mut inventory, HOST).unwrap();

        assert_eq!(groups_of(&inventory), vec!["a", "b", "test_node"]);
    }

    #[test]
    fn test_keyed_group_with_leading_separator() {
        let composer = Composer::new(ComposeOptions {
            keyed_groups: vec![keyed("vmi_node_name")],
            ..Default::default()
        })
        .unwrap();
        let mut inventory = inventory();

        composer.apply(&mut inventory, HOST).unwrap();

        assert_eq!(groups_of(&inventory), vec!["_test_node"]);
    }

    #[test]
    fn test_empty_key() {
        let options = ComposeOptions {
            keyed_groups: vec![keyed("vmi_labels.tier")],
            ..Default::default()
        };

        let mut inventory = inventory();
        Composer::new(options.clone())
            .unwrap()
            .apply(&mut inventory, HOST)
            .unwrap();
        assert!(groups_of(&inventory).is_empty());

        let strict = Composer::new(ComposeOptions {
            strict: true,
            ..options.clone()
        })
        .unwrap();
        assert!(strict.apply(&mut inventory, HOST).is_err());

        let defaulted = Composer::new(ComposeOptions {
            keyed_groups: vec![KeyedGroup {
                prefix: "tier".into(),
                default_value: Some("unknown".into()),
                ..keyed("vmi_labels.tier")
            }],
            strict: true,
            ..options
        })
        .unwrap();
        defaulted.apply(&mut inventory, HOST).unwrap();
        assert_eq!(groups_of(&inventory), vec!["tier_unknown"]);
    }

    #[test]
    fn test_falsy_keys_are_empty() {
        for key in ["[]", "{}", "0", "false", "none"] {
            // Given
            let options = ComposeOptions {
                keyed_groups: vec![keyed(key)],
                ..Default::default()
            };
            let mut inventory = inventory();

            // When
            let lenient = Composer::new(options.clone()).unwrap().apply(&mut inventory, HOST);
            let strict = Composer::new(ComposeOptions {
                strict: true,
                ..options
            })
            .unwrap()
            .apply(&mut inventory, HOST);

            // Then
            assert!(lenient.is_ok(), "lenient {key}");
            assert!(groups_of(&inventory).is_empty(), "groups from {key}");
            match strict {
                Err(InventoryError::Compose(message)) => {
                    assert!(message.starts_with("No key or key resulted empty"), "{message}")
                }
                other => panic!("unexpected result for {key}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_scalar_keys_are_invalid_group_names() {
        for key in ["42", "true"] {
            let mut inventory = inventory();
            let composer = Composer::new(ComposeOptions {
                keyed_groups: vec![keyed(key)],
                ..Default::default()
            })
            .unwrap();

            match composer.apply(&mut inventory, HOST) {
                Err(InventoryError::Compose(message)) => {
                    assert!(message.starts_with("Invalid group name format"), "{message}")
                }
                other => panic!("unexpected result for {key}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_invalid_definitions_are_rejected() {
        let syntax_error = Composer::new(ComposeOptions {
            compose: BTreeMap::from([("broken".into(), "vmi_node_name ==".into())]),
            ..Default::default()
        });
        let exclusive = Composer::new(ComposeOptions {
            keyed_groups: vec![KeyedGroup {
                default_value: Some("x".into()),
                trailing_separator: Some(true),
                ..keyed("vmi_labels")
            }],
            ..Default::default()
        });

        assert!(matches!(syntax_error, Err(InventoryError::InvalidConfig(_))));
        assert!(matches!(exclusive, Err(InventoryError::InvalidConfig(_))));
    }
}
