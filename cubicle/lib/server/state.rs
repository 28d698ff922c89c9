//! Shared state of the HTTP server.

use std::sync::Arc;

use crate::service::ProvisioningService;

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// State shared by every request handler.
#[derive(Clone)]
pub struct ServerState {
    service: Arc<ProvisioningService>,
}

//-------------------------------------------------------------------------------------------------
// Methods
//-------------------------------------------------------------------------------------------------

impl ServerState {
    /// Wraps the provisioning service.
    pub fn new(service: ProvisioningService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }

    /// Gets the provisioning service.
    pub fn service(&self) -> &ProvisioningService {
        &self.service
    }
}
