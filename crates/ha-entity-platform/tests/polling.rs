//! Polling and update concurrency

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use futures::future::join_all;
use ha_config_entries::ConfigEntry;
use ha_entity_platform::{EntityPlatform, HomeAssistant, PlatformOptions};

fn platform(hass: &HomeAssistant, adapter: MockPlatform) -> Arc<EntityPlatform> {
    EntityPlatform::new(
        hass.clone(),
        DOMAIN,
        "mod1",
        Arc::new(adapter),
        PlatformOptions::default(),
    )
}

fn polled(probe: &Probe, delay: Duration) -> MockEntity {
    MockEntity::new()
        .polling()
        .with_state("initial")
        .with_async_update(delay, "polled")
        .with_probe(probe)
}

async fn refresh_all(platform: &EntityPlatform) -> Vec<bool> {
    let ids = platform.entity_ids();
    join_all(ids.iter().map(|id| platform.refresh_entity(id))).await
}

#[tokio::test(start_paused = true)]
async fn test_polls_on_scan_interval() {
    let (_dir, hass) = test_hass();
    let probe = Probe::default();
    let platform = platform(&hass, MockPlatform::new().with_scan_interval(Duration::from_secs(10)));

    platform
        .add_entities(vec![polled(&probe, Duration::ZERO).with_name("Meter").boxed()], false)
        .await
        .unwrap();
    assert!(platform.is_polling());
    assert_eq!(state_of(&hass, "test_domain.meter").as_deref(), Some("initial"));

    tokio::time::sleep(Duration::from_secs(35)).await;

    assert_eq!(probe.started(), 3);
    assert_eq!(state_of(&hass, "test_domain.meter").as_deref(), Some("polled"));
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_poll_is_skipped() {
    let (_dir, hass) = test_hass();
    let probe = Probe::default();
    let platform = platform(&hass, MockPlatform::new().with_scan_interval(Duration::from_secs(10)));

    platform
        .add_entities(vec![polled(&probe, Duration::from_secs(25)).with_name("Slow").boxed()], false)
        .await
        .unwrap();

    // Cycle at 10s runs until 35s; the ticks at 20s and 30s are skipped
    tokio::time::sleep(Duration::from_secs(45)).await;

    assert_eq!(probe.started(), 2);
    assert_eq!(probe.max_in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_non_polling_entities_not_polled() {
    let (_dir, hass) = test_hass();
    let probe = Probe::default();
    let platform = platform(&hass, MockPlatform::new().with_scan_interval(Duration::from_secs(10)));

    platform
        .add_entities(
            vec![MockEntity::new()
                .with_name("Pushed")
                .with_async_update(Duration::ZERO, "polled")
                .with_probe(&probe)
                .boxed()],
            false,
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(!platform.is_polling());
    assert_eq!(probe.started(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_entry_can_disable_polling() {
    let (_dir, hass) = test_hass();
    let probe = Probe::default();
    let entry = ConfigEntry::new("mod1", "Bridge").with_polling_disabled();
    let platform = EntityPlatform::new(
        hass.clone(),
        DOMAIN,
        "mod1",
        Arc::new(MockPlatform::new().with_scan_interval(Duration::from_secs(10))),
        PlatformOptions {
            config_entry: Some(entry),
            ..Default::default()
        },
    );

    platform
        .add_entities(vec![polled(&probe, Duration::ZERO).with_name("Meter").boxed()], false)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(!platform.is_polling());
    assert_eq!(probe.started(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_update_keeps_last_state() {
    let (_dir, hass) = test_hass();
    let probe = Probe::default();
    let platform = platform(&hass, MockPlatform::new().with_scan_interval(Duration::from_secs(10)));

    platform
        .add_entities(
            vec![polled(&probe, Duration::ZERO).with_name("Flaky").failing_updates().boxed()],
            false,
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(25)).await;

    assert_eq!(probe.started(), 2);
    assert_eq!(state_of(&hass, "test_domain.flaky").as_deref(), Some("initial"));
    assert!(!platform.refresh_entity("test_domain.flaky").await);
    assert!(!platform.refresh_entity("test_domain.unknown").await);
}

#[tokio::test(start_paused = true)]
async fn test_polling_stops_with_last_polling_entity() {
    let (_dir, hass) = test_hass();
    let probe = Probe::default();
    let platform = platform(&hass, MockPlatform::new().with_scan_interval(Duration::from_secs(10)));

    platform
        .add_entities(
            vec![
                polled(&probe, Duration::ZERO).with_name("Meter").boxed(),
                MockEntity::new().with_name("Pushed").boxed(),
            ],
            false,
        )
        .await
        .unwrap();
    assert!(platform.is_polling());

    assert!(platform.remove_entity("test_domain.meter").await);
    assert!(!platform.is_polling());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(probe.started(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reset_stops_polling() {
    let (_dir, hass) = test_hass();
    let probe = Probe::default();
    let platform = platform(&hass, MockPlatform::new().with_scan_interval(Duration::from_secs(10)));

    platform
        .add_entities(vec![polled(&probe, Duration::ZERO).with_name("Meter").boxed()], false)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(probe.started(), 1);

    platform.reset().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(probe.started(), 1);
    assert!(!platform.is_polling());
}

#[tokio::test(start_paused = true)]
async fn test_async_updates_unbounded_by_default() {
    let (_dir, hass) = test_hass();
    let probe = Probe::default();
    let platform = platform(&hass, MockPlatform::new());

    let entities = (0..4)
        .map(|i| polled(&probe, Duration::from_secs(5)).with_name(format!("Meter {}", i)).boxed())
        .collect();
    platform.add_entities(entities, false).await.unwrap();

    assert_eq!(refresh_all(&platform).await, vec![true; 4]);
    assert_eq!(probe.max_in_flight(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_updates_limit() {
    let (_dir, hass) = test_hass();
    let probe = Probe::default();
    let platform = platform(&hass, MockPlatform::new().with_parallel_updates(2));

    let entities = (0..4)
        .map(|i| polled(&probe, Duration::from_secs(5)).with_name(format!("Meter {}", i)).boxed())
        .collect();
    platform.add_entities(entities, false).await.unwrap();

    refresh_all(&platform).await;
    assert_eq!(probe.started(), 4);
    assert_eq!(probe.max_in_flight(), 2);
}

fn blocking(probe: &Probe, i: usize) -> MockEntity {
    MockEntity::new()
        .polling()
        .with_name(format!("Legacy {}", i))
        .with_blocking_update(Duration::from_millis(200), "polled")
        .with_probe(probe)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_updates_serialized_by_default() {
    let (_dir, hass) = test_hass();
    let probe = Probe::default();
    let platform = platform(&hass, MockPlatform::new());

    let entities = (0..3).map(|i| blocking(&probe, i).boxed()).collect();
    platform.add_entities(entities, false).await.unwrap();

    assert_eq!(refresh_all(&platform).await, vec![true; 3]);
    assert_eq!(probe.started(), 3);
    assert_eq!(probe.max_in_flight(), 1);
    assert_eq!(state_of(&hass, "test_domain.legacy_2").as_deref(), Some("polled"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_updates_unbounded_when_zero() {
    let (_dir, hass) = test_hass();
    let probe = Probe::default();
    let platform = platform(&hass, MockPlatform::new().with_parallel_updates(0));

    let entities = (0..3).map(|i| blocking(&probe, i).boxed()).collect();
    platform.add_entities(entities, false).await.unwrap();

    refresh_all(&platform).await;
    assert_eq!(probe.started(), 3);
    assert!(probe.max_in_flight() > 1);
}
