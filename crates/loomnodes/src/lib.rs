//! Standard node library
//!
//! Built-in trigger and action executors

mod http;
mod manual_trigger;

pub use http::{
    HttpMethod, HttpRequest, HttpRequestConfig, HttpRequestNode, HttpResponse, HttpTransport, ReqwestTransport,
};
pub use manual_trigger::ManualTriggerNode;
use loomcore::NodeError;
use loomruntime::{HttpSettings, NodeRegistry};

use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) -> Result<(), NodeError> {
    register_all_with(registry, &HttpSettings::default())
}

/// Register all standard nodes, configuring outbound HTTP from `settings`.
/// Fails if the HTTP client cannot be built with those settings.
pub fn register_all_with(registry: &mut NodeRegistry, settings: &HttpSettings) -> Result<(), NodeError> {
    registry.register(Arc::new(ManualTriggerNode));
    registry.register(Arc::new(HttpRequestNode::with_settings(settings)?));
    Ok(())
}
