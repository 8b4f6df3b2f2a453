//! Startup and shutdown of a Home Assistant instance

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use ha_components::{register_demo_platforms, DEMO_DOMAIN, SWITCH_SERVICES};
use ha_config::{configured_domains, CoreConfig};
use ha_entity_platform::{ComponentOptions, EntityComponent, EntryForwarder, HomeAssistant};
use tracing::{debug, info, warn};

/// A running instance and the components it set up
pub struct Instance {
    pub hass: HomeAssistant,
    pub components: Vec<EntityComponent>,
}

/// Load configuration from `config_dir` and set up every configured component
pub async fn start(config_dir: &Path) -> Result<Instance> {
    let config = ha_config::load_yaml(config_dir, "configuration.yaml")
        .with_context(|| format!("loading {}/configuration.yaml", config_dir.display()))?;
    let core = CoreConfig::from_yaml(&config).context("invalid homeassistant section")?;
    info!(name = %core.name, "Loaded configuration");

    let hass = HomeAssistant::new(config_dir, core.platform_setup);
    hass.entity_registry
        .load()
        .await
        .context("loading entity registry")?;
    hass.config_entries
        .load()
        .await
        .context("loading config entries")?;

    register_demo_platforms(&hass.platforms);

    let sensor = EntityComponent::new(hass.clone(), "sensor");
    let switch = EntityComponent::with_options(
        hass.clone(),
        "switch",
        ComponentOptions {
            group_name: Some("all switches".into()),
            ..Default::default()
        },
    );
    for service in SWITCH_SERVICES {
        switch.register_entity_service(service);
    }
    let components = vec![sensor, switch];

    hass.config_entries.register_handler(
        DEMO_DOMAIN,
        Arc::new(EntryForwarder::new(components.clone())),
    );

    let configured = configured_domains(&config);
    join_all(
        components
            .iter()
            .filter(|component| configured.iter().any(|d| d == component.domain()))
            .map(|component| component.setup(&config)),
    )
    .await;

    for domain in hass.config_entries.domains() {
        for (entry_id, result) in hass.config_entries.setup_domain(&domain).await {
            match result {
                Ok(()) => debug!(entry_id = %entry_id, "Config entry set up"),
                Err(err) => warn!(entry_id = %entry_id, "Config entry not set up: {}", err),
            }
        }
    }

    info!(
        "Home Assistant is running with {} platforms: {}",
        hass.components.len(),
        hass.components.names().join(", ")
    );
    Ok(Instance { hass, components })
}

impl Instance {
    /// Tear every component down and persist the registries
    pub async fn stop(self) -> Result<()> {
        join_all(self.components.iter().map(|component| component.reset())).await;

        self.hass
            .entity_registry
            .save()
            .await
            .context("saving entity registry")?;
        self.hass
            .config_entries
            .save()
            .await
            .context("saving config entries")?;
        info!("Home Assistant stopped");
        Ok(())
    }
}
