//! Application state shared across handlers.

use std::sync::Arc;

use crate::hub::Hub;
use crate::router::MessageRouter;

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub router: Arc<dyn MessageRouter>,
    /// Browser origins allowed by the CORS layer.
    pub cors_origins: Vec<String>,
}

impl AppState {
    pub fn new(hub: Hub, router: Arc<dyn MessageRouter>) -> Self {
        Self {
            hub,
            router,
            cors_origins: Vec::new(),
        }
    }

    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }
}
