//! Process-wide state: the shared model gateway

use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::config::AssistantConfig;
use crate::llm_engine::{GatewayCell, ModelError, ModelGateway};

/// Built on first use, never torn down
pub static SHARED_GATEWAY: Lazy<GatewayCell> = Lazy::new(GatewayCell::new);

/// Get the shared gateway, loading the model from `config` the first time.
///
/// Later calls ignore `config` and return the gateway already built.
pub async fn shared_gateway(config: &AssistantConfig) -> Result<Arc<ModelGateway>, ModelError> {
    SHARED_GATEWAY
        .get_or_init(|| ModelGateway::connect(config))
        .await
}

/// Shut the shared engine down if it was ever started
pub async fn shutdown_shared_gateway() {
    if let Some(gateway) = SHARED_GATEWAY.get() {
        if let Err(e) = gateway.shutdown().await {
            log::warn!("Failed to shut down model gateway: {}", e);
        }
    }
}
