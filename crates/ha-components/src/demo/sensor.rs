//! Demo sensors

use std::collections::HashMap;

use async_trait::async_trait;
use ha_config::PlatformConfig;
use ha_config_entries::ConfigEntry;
use ha_entity_platform::{
    Entity, EntityError, PlatformAdapter, PlatformContext, PlatformResult,
    UpdateKind,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{format_number, parse_items};

/// One sensor from the platform block
#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    pub name: String,
    #[serde(default)]
    pub unique_id: Option<String>,
    pub value: f64,
    #[serde(default)]
    pub unit_of_measurement: Option<String>,
    #[serde(default)]
    pub device_class: Option<String>,
    /// Battery level attribute, in percent
    #[serde(default)]
    pub battery: Option<u8>,
    /// Added to the value on every poll; a sensor without drift is not polled
    #[serde(default)]
    pub drift: Option<f64>,
}

fn default_sensors() -> Vec<SensorConfig> {
    vec![
        SensorConfig {
            name: "Outside Temperature".into(),
            unique_id: Some("sensor_1".into()),
            value: 15.6,
            unit_of_measurement: Some("°C".into()),
            device_class: Some("temperature".into()),
            battery: Some(12),
            drift: None,
        },
        SensorConfig {
            name: "Outside Humidity".into(),
            unique_id: Some("sensor_2".into()),
            value: 54.0,
            unit_of_measurement: Some("%".into()),
            device_class: Some("humidity".into()),
            battery: None,
            drift: None,
        },
    ]
}

#[derive(Debug, Clone)]
pub struct DemoSensor {
    config: SensorConfig,
    value: f64,
}

impl DemoSensor {
    pub fn new(config: SensorConfig) -> Self {
        Self {
            value: config.value,
            config,
        }
    }
}

#[async_trait]
impl Entity for DemoSensor {
    fn name(&self) -> Option<String> {
        Some(self.config.name.clone())
    }

    fn unique_id(&self) -> Option<String> {
        self.config.unique_id.clone()
    }

    fn should_poll(&self) -> bool {
        self.config.drift.is_some()
    }

    fn state(&self) -> Option<String> {
        Some(format_number(self.value))
    }

    fn attributes(&self) -> HashMap<String, Value> {
        self.config
            .battery
            .map(|level| HashMap::from([("battery_level".to_string(), json!(level))]))
            .unwrap_or_default()
    }

    fn unit_of_measurement(&self) -> Option<String> {
        self.config.unit_of_measurement.clone()
    }

    fn device_class(&self) -> Option<String> {
        self.config.device_class.clone()
    }

    fn update_kind(&self) -> UpdateKind {
        if self.config.drift.is_some() {
            UpdateKind::Async
        } else {
            UpdateKind::None
        }
    }

    async fn update(&mut self) -> Result<(), EntityError> {
        if let Some(drift) = self.config.drift {
            self.value += drift;
        }
        Ok(())
    }
}

/// `sensor.demo`
pub struct DemoSensorPlatform;

impl DemoSensorPlatform {
    async fn add(ctx: &PlatformContext, sensors: Vec<SensorConfig>) -> PlatformResult<()> {
        debug!(count = sensors.len(), "Adding demo sensors");
        let entities: Vec<Box<dyn Entity>> = sensors
            .into_iter()
            .map(|config| Box::new(DemoSensor::new(config)) as Box<dyn Entity>)
            .collect();
        ctx.add_entities.add(entities, false).await?;
        Ok(())
    }
}

#[async_trait]
impl PlatformAdapter for DemoSensorPlatform {
    async fn setup_platform(
        &self,
        ctx: PlatformContext,
        config: PlatformConfig,
        _discovery_info: Option<Value>,
    ) -> PlatformResult<()> {
        let sensors = parse_items(&config.config, "sensors", default_sensors)?;
        Self::add(&ctx, sensors).await
    }

    async fn setup_entry(&self, ctx: PlatformContext, _entry: ConfigEntry) -> PlatformResult<()> {
        Self::add(&ctx, default_sensors()).await
    }
}
