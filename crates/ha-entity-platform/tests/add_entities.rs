//! Adding entities: id assignment, registry interaction, duplicates

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use ha_config_entries::ConfigEntry;
use ha_entity_platform::{EntityPlatform, EntityPlatformError, HomeAssistant, PlatformOptions};
use ha_registries::{DisabledBy, EntryOptions};
use serde_json::json;

fn platform_with(hass: &HomeAssistant, options: PlatformOptions) -> Arc<EntityPlatform> {
    EntityPlatform::new(
        hass.clone(),
        DOMAIN,
        "mod1",
        Arc::new(MockPlatform::new()),
        options,
    )
}

fn platform(hass: &HomeAssistant) -> Arc<EntityPlatform> {
    platform_with(hass, PlatformOptions::default())
}

#[tokio::test]
async fn test_ids_generated_from_names() {
    let (_dir, hass) = test_hass();
    let platform = platform(&hass);

    platform
        .add_entities(
            vec![
                MockEntity::new().with_name("Lamp").boxed(),
                MockEntity::new().with_name("Lamp").boxed(),
                MockEntity::new().with_name("Lamp").boxed(),
                MockEntity::new().boxed(),
            ],
            false,
        )
        .await
        .unwrap();

    assert_eq!(
        platform.entity_ids(),
        vec![
            "test_domain.lamp",
            "test_domain.lamp_2",
            "test_domain.lamp_3",
            "test_domain.unnamed_device",
        ]
    );
    let lamp = hass.states.get("test_domain.lamp_2").unwrap();
    assert_eq!(lamp.state, "unknown");
    assert_eq!(lamp.attributes["friendly_name"], "Lamp");
}

#[tokio::test]
async fn test_generated_ids_avoid_foreign_states() {
    let (_dir, hass) = test_hass();
    hass.states.set(
        "test_domain.lamp".parse().unwrap(),
        "on",
        Default::default(),
        Default::default(),
    );
    let platform = platform(&hass);

    platform
        .add_entities(vec![MockEntity::new().with_name("Lamp").boxed()], false)
        .await
        .unwrap();

    assert_eq!(platform.entity_ids(), vec!["test_domain.lamp_2"]);
}

#[tokio::test]
async fn test_namespace_prefixes_generated_ids() {
    let (_dir, hass) = test_hass();
    let platform = platform_with(
        &hass,
        PlatformOptions {
            entity_namespace: Some("garage".into()),
            ..Default::default()
        },
    );

    platform
        .add_entities(
            vec![
                MockEntity::new().with_name("Door").boxed(),
                MockEntity::new().with_name("Door").with_unique_id("door-2").boxed(),
            ],
            false,
        )
        .await
        .unwrap();

    assert_eq!(
        platform.entity_ids(),
        vec!["test_domain.garage_door", "test_domain.garage_door_2"]
    );
}

#[tokio::test]
async fn test_requested_entity_id_used() {
    let (_dir, hass) = test_hass();
    let platform = platform(&hass);

    platform
        .add_entities(
            vec![MockEntity::new()
                .with_name("Whatever")
                .with_entity_id("test_domain.chosen")
                .with_state("17")
                .boxed()],
            false,
        )
        .await
        .unwrap();

    assert_eq!(state_of(&hass, "test_domain.chosen").as_deref(), Some("17"));
}

#[tokio::test]
async fn test_invalid_requested_id_rejected() {
    let (_dir, hass) = test_hass();
    let platform = platform(&hass);

    let err = platform
        .add_entities(
            vec![
                MockEntity::new().with_entity_id("not an id").boxed(),
                MockEntity::new().with_name("Fine").boxed(),
            ],
            false,
        )
        .await
        .unwrap_err();

    assert_eq!(err, EntityPlatformError::InvalidEntityId("not an id".into()));
    // The rest of the batch is still added
    assert_eq!(platform.entity_ids(), vec!["test_domain.fine"]);
}

#[tokio::test]
async fn test_duplicate_ids_in_one_batch() {
    let (_dir, hass) = test_hass();
    let probe = Probe::default();
    let platform = platform(&hass);

    let err = platform
        .add_entities(
            vec![
                MockEntity::new()
                    .with_entity_id("test_domain.same")
                    .with_state("first")
                    .with_probe(&probe)
                    .boxed(),
                MockEntity::new()
                    .with_entity_id("test_domain.same")
                    .with_state("second")
                    .with_probe(&probe)
                    .boxed(),
            ],
            false,
        )
        .await
        .unwrap_err();

    assert_eq!(err, EntityPlatformError::DuplicateEntityId("test_domain.same".into()));
    assert_eq!(platform.len(), 1);
    assert_eq!(probe.added(), 1);
    assert_eq!(state_of(&hass, "test_domain.same").as_deref(), Some("first"));
}

#[tokio::test]
async fn test_duplicate_across_platforms() {
    let (_dir, hass) = test_hass();
    let first = platform(&hass);
    let second = EntityPlatform::new(
        hass.clone(),
        DOMAIN,
        "mod2",
        Arc::new(MockPlatform::new()),
        PlatformOptions::default(),
    );

    first
        .add_entities(vec![MockEntity::new().with_entity_id("test_domain.shared").boxed()], false)
        .await
        .unwrap();
    let err = second
        .add_entities(vec![MockEntity::new().with_entity_id("test_domain.shared").boxed()], false)
        .await
        .unwrap_err();

    assert!(matches!(err, EntityPlatformError::DuplicateEntityId(_)));
    assert!(second.is_empty());

    // Once the first platform lets go, the id is free again
    first.remove_entity("test_domain.shared").await;
    second
        .add_entities(vec![MockEntity::new().with_entity_id("test_domain.shared").boxed()], false)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_disabled_registry_entry_not_added() {
    let (_dir, hass) = test_hass();
    let probe = Probe::default();
    hass.entity_registry.get_or_create(
        DOMAIN,
        "mod1",
        "uid-1",
        EntryOptions {
            suggested_object_id: Some("hidden".into()),
            disabled_by: Some(DisabledBy::User),
            ..Default::default()
        },
    );
    let platform = platform(&hass);

    platform
        .add_entities(
            vec![MockEntity::new()
                .with_name("Hidden")
                .with_unique_id("uid-1")
                .with_probe(&probe)
                .boxed()],
            false,
        )
        .await
        .unwrap();

    assert!(platform.is_empty());
    assert_eq!(probe.added(), 0);
    assert!(!hass.states.contains("test_domain.hidden"));
}

#[tokio::test]
async fn test_disabled_by_default_registers_disabled() {
    let (_dir, hass) = test_hass();
    let platform = platform(&hass);

    platform
        .add_entities(
            vec![MockEntity::new()
                .with_name("Diagnostics")
                .with_unique_id("diag")
                .disabled_by_default()
                .boxed()],
            false,
        )
        .await
        .unwrap();

    assert!(platform.is_empty());
    let entry = hass.entity_registry.get("test_domain.diagnostics").unwrap();
    assert_eq!(entry.disabled_by, Some(DisabledBy::Integration));
}

#[tokio::test]
async fn test_entry_preference_disables_new_entities() {
    let (_dir, hass) = test_hass();
    let mut entry = ConfigEntry::new("mod1", "Bridge");
    entry.pref_disable_new_entities = true;
    let platform = platform_with(
        &hass,
        PlatformOptions {
            config_entry: Some(entry.clone()),
            ..Default::default()
        },
    );

    platform
        .add_entities(
            vec![
                MockEntity::new().with_name("New").with_unique_id("new").boxed(),
                MockEntity::new().with_name("No registry").boxed(),
            ],
            false,
        )
        .await
        .unwrap();

    assert_eq!(platform.entity_ids(), vec!["test_domain.no_registry"]);
    let registered = hass.entity_registry.get("test_domain.new").unwrap();
    assert!(registered.is_disabled());
    assert_eq!(registered.config_entry_id.as_deref(), Some(entry.entry_id.as_str()));
}

#[tokio::test]
async fn test_registry_keeps_id_and_name_override() {
    let (_dir, hass) = test_hass();
    let first = platform(&hass);
    first
        .add_entities(
            vec![MockEntity::new().with_name("Kitchen").with_unique_id("k-1").boxed()],
            false,
        )
        .await
        .unwrap();
    assert_eq!(first.entity_ids(), vec!["test_domain.kitchen"]);
    first.reset().await;

    hass.entity_registry
        .update("test_domain.kitchen", |entry| entry.name = Some("Cooking".into()))
        .unwrap();

    // A renamed device keeps its registered id and the user's name
    let second = platform(&hass);
    second
        .add_entities(
            vec![MockEntity::new().with_name("Renamed").with_unique_id("k-1").boxed()],
            false,
        )
        .await
        .unwrap();

    assert_eq!(second.entity_ids(), vec!["test_domain.kitchen"]);
    let state = hass.states.get("test_domain.kitchen").unwrap();
    assert_eq!(state.attributes["friendly_name"], "Cooking");
}

#[tokio::test(start_paused = true)]
async fn test_update_before_add() {
    let (_dir, hass) = test_hass();
    let platform = platform(&hass);

    platform
        .add_entities(
            vec![
                MockEntity::new()
                    .with_name("Fresh")
                    .with_state("stale")
                    .with_async_update(Duration::from_secs(1), "fresh")
                    .boxed(),
                MockEntity::new()
                    .with_name("Broken")
                    .with_async_update(Duration::ZERO, "never")
                    .failing_updates()
                    .boxed(),
            ],
            true,
        )
        .await
        .unwrap();

    assert_eq!(state_of(&hass, "test_domain.fresh").as_deref(), Some("fresh"));
    // An entity whose first update fails is not added
    assert_eq!(platform.entity_ids(), vec!["test_domain.fresh"]);
}

#[tokio::test]
async fn test_unavailable_entity_state() {
    let (_dir, hass) = test_hass();
    let platform = platform(&hass);

    platform
        .add_entities(
            vec![MockEntity::new()
                .with_name("Gone")
                .with_state("on")
                .with_attribute("battery", json!(12))
                .with_available(false)
                .boxed()],
            false,
        )
        .await
        .unwrap();

    let state = hass.states.get("test_domain.gone").unwrap();
    assert_eq!(state.state, "unavailable");
    assert!(!state.attributes.contains_key("battery"));
}

#[tokio::test]
async fn test_state_writer_until_removed() {
    let (_dir, hass) = test_hass();
    let probe = Probe::default();
    let platform = platform(&hass);
    platform
        .add_entities(
            vec![MockEntity::new().with_name("Door").with_state("closed").with_probe(&probe).boxed()],
            false,
        )
        .await
        .unwrap();

    let handle = platform.get_entity("test_domain.door").unwrap();
    handle
        .lock()
        .await
        .handle_service("set_state", &json!({"state": "open"}))
        .await
        .unwrap();

    let writer = probe.writer(0);
    assert_eq!(writer.entity_id().to_string(), "test_domain.door");
    assert_eq!(writer.write().await.map(|s| s.state).as_deref(), Some("open"));
    assert_eq!(state_of(&hass, "test_domain.door").as_deref(), Some("open"));

    assert!(platform.remove_entity("test_domain.door").await);
    assert!(writer.is_removed());
    assert!(writer.write().await.is_none());
    assert!(!hass.states.contains("test_domain.door"));
}

#[tokio::test]
async fn test_add_after_reset_fails() {
    let (_dir, hass) = test_hass();
    let platform = platform(&hass);
    platform.reset().await;

    let err = platform
        .add_entities(vec![MockEntity::new().with_name("Late").boxed()], false)
        .await
        .unwrap_err();

    assert_eq!(err, EntityPlatformError::PlatformReset);
    assert!(!hass.states.contains("test_domain.late"));
    assert!(!hass.is_entity_owned("test_domain.late"));
}
