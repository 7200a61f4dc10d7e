//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use kairon_action::ActionExecutor;

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<ActionExecutor>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
    pub version: &'static str,
}

impl AppState {
    pub fn new(executor: Arc<ActionExecutor>) -> Self {
        Self {
            executor,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}
