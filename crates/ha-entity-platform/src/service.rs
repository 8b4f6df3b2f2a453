//! Resolving service-call targets to entity ids

use std::collections::HashSet;

use ha_core::attrs::ATTR_ENTITY_ID;
use ha_core::{split_entity_id, GROUP_DOMAIN};
use ha_state_store::StateStore;

/// Expand `group.*` ids into their members, recursively
///
/// Group ids themselves are dropped, duplicates are kept once in first-seen
/// order, and a group that (indirectly) contains itself is expanded once.
pub fn expand_entity_ids<I, S>(states: &StateStore, entity_ids: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut found = Vec::new();
    let mut visited_groups = HashSet::new();
    for entity_id in entity_ids {
        expand_into(states, &entity_id.as_ref().to_lowercase(), &mut found, &mut visited_groups);
    }
    found
}

fn expand_into(
    states: &StateStore,
    entity_id: &str,
    found: &mut Vec<String>,
    visited_groups: &mut HashSet<String>,
) {
    let Some((domain, _)) = split_entity_id(entity_id) else {
        return;
    };

    if domain != GROUP_DOMAIN {
        if !found.iter().any(|f| f == entity_id) {
            found.push(entity_id.to_string());
        }
        return;
    }

    if !visited_groups.insert(entity_id.to_string()) {
        return;
    }
    for member in group_members(states, entity_id) {
        expand_into(states, &member, found, visited_groups);
    }
}

/// Member ids listed in a group's `entity_id` attribute
pub fn group_members(states: &StateStore, group_id: &str) -> Vec<String> {
    states
        .get(group_id)
        .and_then(|state| state.attribute::<Vec<String>>(ATTR_ENTITY_ID))
        .unwrap_or_default()
        .into_iter()
        .map(|id| id.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_core::{Context, EntityId};
    use ha_event_bus::EventBus;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn store() -> StateStore {
        StateStore::new(Arc::new(EventBus::new()))
    }

    fn set_group(states: &StateStore, id: &str, members: serde_json::Value) {
        let entity_id: EntityId = id.parse().unwrap();
        states.set(
            entity_id,
            "on",
            HashMap::from([(ATTR_ENTITY_ID.to_string(), members)]),
            Context::new(),
        );
    }

    #[test]
    fn test_plain_ids_pass_through() {
        let states = store();
        assert_eq!(
            expand_entity_ids(&states, ["switch.a", "Switch.B", "switch.a"]),
            vec!["switch.a", "switch.b"]
        );
    }

    #[test]
    fn test_nested_groups_expand() {
        let states = store();
        set_group(&states, "group.downstairs", json!(["light.hall", "group.kitchen"]));
        set_group(&states, "group.kitchen", json!(["light.counter", "light.hall"]));

        assert_eq!(
            expand_entity_ids(&states, ["group.downstairs", "light.porch"]),
            vec!["light.hall", "light.counter", "light.porch"]
        );
    }

    #[test]
    fn test_self_referencing_groups_terminate() {
        let states = store();
        set_group(&states, "group.a", json!(["group.b", "light.one"]));
        set_group(&states, "group.b", json!(["group.a", "light.two"]));

        assert_eq!(
            expand_entity_ids(&states, ["group.a"]),
            vec!["light.two", "light.one"]
        );
    }

    #[test]
    fn test_unknown_group_and_invalid_ids() {
        let states = store();
        assert!(expand_entity_ids(&states, ["group.missing", "not-an-id"]).is_empty());
    }
}
