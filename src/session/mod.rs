//! Session lifecycle: models, persistence, caching, and the manager that
//! drives the pause/persist/resume path.

mod cache;
mod manager;
mod models;
mod store;

pub use cache::{MemoryCache, SessionCache};
pub use manager::{ManagerConfig, SessionManager};
pub use models::{CreateSessionRequest, Session, SessionStatus};
pub use store::{MemoryStore, SessionStore, SqliteStore};
