//! Caller identity carried through async call chains.
//!
//! Handlers above the core bind an [`Identity`] around the request future;
//! core code may read it for log attribution. Never part of persisted state.

use std::future::Future;

use serde::{Deserialize, Serialize};

/// The identity of the caller on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// User id the operation is attributed to.
    pub user_id: String,
    /// Optional role (e.g. "admin").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Identity {
    /// Create an identity for a plain user.
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: None,
        }
    }

    /// Create an identity with a role.
    pub fn with_role(user_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Some(role.into()),
        }
    }
}

tokio::task_local! {
    static CURRENT_IDENTITY: Identity;
}

/// Run `fut` with `identity` bound for its whole call chain.
pub async fn scope<F: Future>(identity: Identity, fut: F) -> F::Output {
    CURRENT_IDENTITY.scope(identity, fut).await
}

/// The identity bound to the current task, if any.
pub fn current() -> Option<Identity> {
    CURRENT_IDENTITY.try_with(|identity| identity.clone()).ok()
}

/// The user id bound to the current task, or an empty string.
pub fn current_user_id() -> String {
    current().map(|identity| identity.user_id).unwrap_or_default()
}
