//! Application state shared across handlers.

use std::sync::Arc;

use crate::sandbox::{Pool, Runtime};
use crate::session::SessionManager;

/// Everything the handlers need: the pool, the session manager, and the
/// runtime for data-plane calls (exec, file I/O).
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<Pool>,
    pub sessions: Arc<SessionManager>,
    pub runtime: Arc<dyn Runtime>,
}

impl AppState {
    pub fn new(pool: Arc<Pool>, sessions: Arc<SessionManager>, runtime: Arc<dyn Runtime>) -> Self {
        Self {
            pool,
            sessions,
            runtime,
        }
    }
}
