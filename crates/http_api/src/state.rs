use std::sync::Arc;

use copilot_app::{AppConfig, AppServices};

#[derive(Clone)]
pub struct HttpState {
    pub config: Arc<AppConfig>,
    pub services: AppServices,
}

impl HttpState {
    pub fn new(config: Arc<AppConfig>, services: AppServices) -> Self {
        Self { config, services }
    }
}
