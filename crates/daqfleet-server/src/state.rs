use daqfleet_core::Driver;
use std::sync::Arc;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub driver: Arc<Driver>,
}

impl AppState {
    pub fn new(driver: Arc<Driver>) -> Self {
        Self { driver }
    }
}
