//! Session data models.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Usable; may or may not have a sandbox bound.
    Active,
    /// Workspace archived, no sandbox bound.
    Paused,
    /// Past `expires_at`. Terminal and observed-only.
    Expired,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Paused => write!(f, "paused"),
            SessionStatus::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(SessionStatus::Active),
            "paused" => Ok(SessionStatus::Paused),
            "expired" => Ok(SessionStatus::Expired),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

impl TryFrom<String> for SessionStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A named, user-owned workspace context that outlives any single sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// UUID of the session.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Sandbox currently bound, when active and bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,
    /// Lifecycle state.
    pub status: SessionStatus,
    /// Archive key; non-empty after the first pause.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_url: Option<String>,
    /// Requested image.
    pub image: String,
    /// Requested CPU cores.
    pub cpu_count: u32,
    /// Requested memory in megabytes.
    pub memory_mb: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    /// Instant after which reads return `Expired` and the sweep deletes.
    pub expires_at: DateTime<Utc>,
    /// Set iff the session is paused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,
    /// Free-form caller metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl Session {
    /// Whether `now` is past the expiry instant.
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Active and not past expiry.
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active && !self.is_expired()
    }
}

/// Request to create a new session.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSessionRequest {
    /// Owning user; required.
    pub user_id: String,
    /// Image; empty means the configured default.
    #[serde(default)]
    pub image: String,
    /// CPU cores; zero means the configured default.
    #[serde(default)]
    pub cpu_count: u32,
    /// Memory in megabytes; zero means the configured default.
    #[serde(default)]
    pub memory_mb: u64,
    /// Requested TTL in seconds; zero means the configured default. Capped
    /// by the configured maximum either way.
    #[serde(default, rename = "ttl")]
    pub ttl_secs: u64,
    /// Free-form metadata carried on the session record.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CreateSessionRequest {
    /// Requested TTL as a duration, if any.
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }
}
