//! Built-in components
//!
//! Only the `demo` integration lives here: simulated sensors and switches
//! that exercise the entity platform machinery without any hardware.

pub mod demo;

pub use demo::{
    register_demo_platforms, DemoSensorPlatform, DemoSwitchPlatform, DEMO_DOMAIN, SWITCH_SERVICES,
};
