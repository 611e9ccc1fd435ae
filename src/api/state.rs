use std::sync::Arc;

use crate::config::Config;
use crate::lifecycle::Lifecycle;
use crate::observability::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub lifecycle: Lifecycle,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(config: Config, lifecycle: Lifecycle, metrics: Arc<Metrics>) -> Self {
        Self {
            config: Arc::new(config),
            lifecycle,
            metrics,
        }
    }
}
