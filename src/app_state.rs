//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::config::SessionConfig;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Settings handed to every new client session.
    pub session_config: Arc<SessionConfig>,
}

impl AppState {
    /// Creates state that builds sessions from `session_config`.
    #[must_use]
    pub fn new(session_config: SessionConfig) -> Self {
        Self {
            session_config: Arc::new(session_config),
        }
    }
}
