//! Application state shared across request handlers.

use std::sync::Arc;

use crate::config::ConfigHandle;
use crate::coordinator::Coordinator;
use crate::placement::PlacementSelector;
use crate::registry::NodeRegistry;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Coordinator>,
}

impl AppState {
    pub fn new(coordinator: Coordinator) -> Self {
        Self {
            inner: Arc::new(coordinator),
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.inner
    }

    pub fn config(&self) -> &ConfigHandle {
        self.inner.config()
    }

    pub fn registry(&self) -> &NodeRegistry {
        self.inner.registry()
    }

    pub fn placement(&self) -> &PlacementSelector {
        self.inner.placement()
    }
}
