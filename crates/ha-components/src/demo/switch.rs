//! Demo switches
//!
//! Switches have no device to poll; they publish their own state through
//! the [`StateWriter`] whenever a service changes them.

use std::collections::HashMap;

use async_trait::async_trait;
use ha_config::PlatformConfig;
use ha_config_entries::ConfigEntry;
use ha_core::{STATE_OFF, STATE_ON};
use ha_entity_platform::{
    Entity, EntityError, PlatformAdapter, PlatformContext, PlatformResult,
    StateWriter,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::parse_items;

/// Services every switch handles
pub const SWITCH_SERVICES: [&str; 3] = ["turn_on", "turn_off", "toggle"];

#[derive(Debug, Clone, Deserialize)]
pub struct SwitchConfig {
    pub name: String,
    #[serde(default)]
    pub unique_id: Option<String>,
    #[serde(default)]
    pub initial: bool,
    #[serde(default)]
    pub icon: Option<String>,
    /// State is optimistic rather than read back from the device
    #[serde(default)]
    pub assumed_state: bool,
    /// Power draw while on, in watts
    #[serde(default)]
    pub power_w: Option<f64>,
}

fn default_switches() -> Vec<SwitchConfig> {
    vec![
        SwitchConfig {
            name: "Decorative Lights".into(),
            unique_id: Some("switch1".into()),
            initial: true,
            icon: None,
            assumed_state: true,
            power_w: Some(100.0),
        },
        SwitchConfig {
            name: "AC".into(),
            unique_id: Some("switch2".into()),
            initial: false,
            icon: Some("mdi:air-conditioner".into()),
            assumed_state: false,
            power_w: None,
        },
    ]
}

#[derive(Debug)]
pub struct DemoSwitch {
    config: SwitchConfig,
    is_on: bool,
    writer: Option<StateWriter>,
}

impl DemoSwitch {
    pub fn new(config: SwitchConfig) -> Self {
        Self {
            is_on: config.initial,
            config,
            writer: None,
        }
    }

    pub fn is_on(&self) -> bool {
        self.is_on
    }

    fn set(&mut self, on: bool) {
        self.is_on = on;
        if let Some(writer) = &self.writer {
            writer.write_from(&*self);
        }
    }
}

#[async_trait]
impl Entity for DemoSwitch {
    fn name(&self) -> Option<String> {
        Some(self.config.name.clone())
    }

    fn unique_id(&self) -> Option<String> {
        self.config.unique_id.clone()
    }

    fn should_poll(&self) -> bool {
        false
    }

    fn state(&self) -> Option<String> {
        Some(if self.is_on { STATE_ON } else { STATE_OFF }.to_string())
    }

    fn attributes(&self) -> HashMap<String, Value> {
        match self.config.power_w {
            Some(power) => {
                let current = if self.is_on { power } else { 0.0 };
                HashMap::from([("current_power_w".to_string(), json!(current))])
            }
            None => HashMap::new(),
        }
    }

    fn icon(&self) -> Option<String> {
        self.config.icon.clone()
    }

    fn assumed_state(&self) -> bool {
        self.config.assumed_state
    }

    async fn added_to_hass(&mut self, writer: StateWriter) {
        self.writer = Some(writer);
    }

    async fn will_remove_from_hass(&mut self) {
        self.writer = None;
    }

    async fn handle_service(&mut self, service: &str, _data: &Value) -> Result<(), EntityError> {
        match service {
            "turn_on" => self.set(true),
            "turn_off" => self.set(false),
            "toggle" => self.set(!self.is_on),
            other => return Err(EntityError::NotSupported(other.to_string())),
        }
        Ok(())
    }
}

/// `switch.demo`
pub struct DemoSwitchPlatform;

impl DemoSwitchPlatform {
    async fn add(ctx: &PlatformContext, switches: Vec<SwitchConfig>) -> PlatformResult<()> {
        debug!(count = switches.len(), "Adding demo switches");
        let entities: Vec<Box<dyn Entity>> = switches
            .into_iter()
            .map(|config| Box::new(DemoSwitch::new(config)) as Box<dyn Entity>)
            .collect();
        ctx.add_entities.add(entities, false).await?;
        Ok(())
    }
}

#[async_trait]
impl PlatformAdapter for DemoSwitchPlatform {
    async fn setup_platform(
        &self,
        ctx: PlatformContext,
        config: PlatformConfig,
        _discovery_info: Option<Value>,
    ) -> PlatformResult<()> {
        let switches = parse_items(&config.config, "switches", default_switches)?;
        Self::add(&ctx, switches).await
    }

    async fn setup_entry(&self, ctx: PlatformContext, _entry: ConfigEntry) -> PlatformResult<()> {
        Self::add(&ctx, default_switches()).await
    }
}
