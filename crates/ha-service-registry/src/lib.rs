//! Service registry with async handlers for Home Assistant
//!
//! Services are addressed as `domain.service`. Entity components register
//! their entity services here; a call is routed to the handler and, when the
//! registry is attached to an event bus, announced as a CALL_SERVICE event.

use dashmap::DashMap;
use ha_core::events::CallServiceData;
use ha_core::{Context, ServiceCall};
use ha_event_bus::EventBus;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Result type for service calls
pub type ServiceResult = Result<(), ServiceError>;

/// Future type for async service handlers
pub type ServiceFuture = Pin<Box<dyn Future<Output = ServiceResult> + Send>>;

/// Service handler function type
pub type ServiceHandler = Arc<dyn Fn(ServiceCall) -> ServiceFuture + Send + Sync>;

#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("service not found: {domain}.{service}")]
    NotFound { domain: String, service: String },

    #[error("service call failed: {0}")]
    CallFailed(String),
}

fn service_key(domain: &str, service: &str) -> String {
    format!("{}.{}", domain, service).to_lowercase()
}

/// The service registry manages all registered services
pub struct ServiceRegistry {
    /// Handlers indexed by lowercased "domain.service"
    services: DashMap<String, ServiceHandler>,
    bus: Option<Arc<EventBus>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
            bus: None,
        }
    }

    /// Create a registry that announces every call on the event bus
    pub fn with_event_bus(bus: Arc<EventBus>) -> Self {
        Self {
            services: DashMap::new(),
            bus: Some(bus),
        }
    }

    /// Register a service
    ///
    /// Registering an existing `domain.service` replaces its handler.
    #[instrument(skip_all)]
    pub fn register<F, Fut>(&self, domain: impl Into<String>, service: impl Into<String>, handler: F)
    where
        F: Fn(ServiceCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult> + Send + 'static,
    {
        let (domain, service) = (domain.into(), service.into());
        let handler: ServiceHandler =
            Arc::new(move |call| Box::pin(handler(call)) as ServiceFuture);

        if self
            .services
            .insert(service_key(&domain, &service), handler)
            .is_some()
        {
            debug!(domain = %domain, service = %service, "Replaced existing service handler");
        } else {
            debug!(domain = %domain, service = %service, "Registered service");
        }
    }

    /// Call a service
    #[instrument(skip(self, service_data, context))]
    pub async fn call(
        &self,
        domain: &str,
        service: &str,
        service_data: serde_json::Value,
        context: Context,
    ) -> ServiceResult {
        self.call_service(ServiceCall::new(domain, service, service_data, context))
            .await
    }

    /// Route a prepared ServiceCall to its handler
    pub async fn call_service(&self, call: ServiceCall) -> ServiceResult {
        let handler = self
            .services
            .get(&service_key(&call.domain, &call.service))
            .map(|handler| Arc::clone(handler.value()))
            .ok_or_else(|| {
                warn!(domain = %call.domain, service = %call.service, "Service not found");
                ServiceError::NotFound {
                    domain: call.domain.clone(),
                    service: call.service.clone(),
                }
            })?;

        if let Some(bus) = &self.bus {
            bus.fire_typed(
                CallServiceData {
                    domain: call.domain.clone(),
                    service: call.service.clone(),
                    service_data: call.service_data.clone(),
                },
                call.context.clone(),
            );
        }

        debug!(service = %call.service_id(), "Calling service");
        handler(call).await
    }

    pub fn has_service(&self, domain: &str, service: &str) -> bool {
        self.services.contains_key(&service_key(domain, service))
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_register_and_call() {
        let registry = ServiceRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        registry.register("test", "record", move |call: ServiceCall| {
            recorder.lock().unwrap().push(call.service_data);
            async { Ok(()) }
        });

        registry
            .call("test", "record", json!({"msg": "hello"}), Context::new())
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![json!({"msg": "hello"})]);
    }

    #[tokio::test]
    async fn test_service_not_found() {
        let registry = ServiceRegistry::new();
        let result = registry
            .call("nonexistent", "service", json!({}), Context::new())
            .await;
        assert!(matches!(result, Err(ServiceError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_call_is_announced_on_bus() {
        let bus = Arc::new(EventBus::new());
        let registry = ServiceRegistry::with_event_bus(bus.clone());
        let mut rx = bus.subscribe_typed::<CallServiceData>();
        registry.register("switch", "toggle", |_call: ServiceCall| async move { Ok(()) });

        registry
            .call("switch", "toggle", json!({"entity_id": "switch.a"}), Context::new())
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.data.service, "toggle");
        assert_eq!(event.data.service_data["entity_id"], "switch.a");
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = ServiceRegistry::new();
        registry.register("light", "turn_on", |_: ServiceCall| async { Ok(()) });

        assert!(registry.has_service("Light", "TURN_ON"));
        assert!(!registry.has_service("light", "turn_off"));
    }

    #[tokio::test]
    async fn test_reregister_replaces_handler() {
        let registry = ServiceRegistry::new();
        registry.register("test", "flaky", |_: ServiceCall| async {
            Err(ServiceError::CallFailed("old handler".to_string()))
        });
        registry.register("test", "flaky", |_: ServiceCall| async { Ok(()) });

        assert!(registry
            .call("test", "flaky", json!({}), Context::new())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let registry = ServiceRegistry::new();
        registry.register("test", "fail", |_: ServiceCall| async move {
            Err(ServiceError::CallFailed("intentional failure".to_string()))
        });

        let result = registry
            .call("test", "fail", json!({}), Context::new())
            .await;
        assert!(matches!(result, Err(ServiceError::CallFailed(_))));
    }
}
