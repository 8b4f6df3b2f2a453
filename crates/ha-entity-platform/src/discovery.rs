//! Loading platforms announced after startup
//!
//! An integration that finds a device fires `platform_discovered` with
//! service `load_platform.{component}`; the component listening for that
//! service sets up the named platform with the discovery payload.

use std::future::Future;

use ha_core::events::{load_platform_service, PlatformDiscoveredData};
use ha_core::Context;
use ha_event_bus::EventBus;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Ask `component` to load `platform` with the given discovery payload
pub fn load_platform(
    bus: &EventBus,
    component: &str,
    platform: impl Into<String>,
    discovered: Value,
) {
    let platform = platform.into();
    debug!(component = %component, platform = %platform, "Firing platform discovery");
    bus.fire_typed(
        PlatformDiscoveredData {
            service: load_platform_service(component),
            platform,
            discovered,
        },
        Context::new(),
    );
}

/// Run `on_discovered(platform, payload)` for every load request aimed at
/// `component`
///
/// The subscription is taken before this returns, so requests fired right
/// after are not missed.
pub fn listen_platform<F, Fut>(bus: &EventBus, component: &str, on_discovered: F) -> JoinHandle<()>
where
    F: Fn(String, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut rx = bus.subscribe_typed::<PlatformDiscoveredData>();
    let service = load_platform_service(component);

    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            if event.data.service != service {
                trace!(service = %event.data.service, "Ignoring discovery for another component");
                continue;
            }
            let load = on_discovered(event.data.platform, event.data.discovered);
            load.await;
        }
    })
}
