//! Durable session persistence.
//!
//! [`SqliteStore`] is the production baseline (auto-migrated on open);
//! [`MemoryStore`] backs development and tests through the same trait.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tokio::sync::RwLock;

use crate::error::{Error, Result};

use super::models::{Session, SessionStatus};

/// Persistence contract the manager depends on.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new session record.
    async fn create(&self, session: &Session) -> Result<()>;

    /// Fetch a session by id.
    async fn get(&self, id: &str) -> Result<Session>;

    /// All sessions owned by a user, newest first.
    async fn get_by_user(&self, user_id: &str) -> Result<Vec<Session>>;

    /// Replace a session record. Last writer wins on the full row.
    async fn update(&self, session: &Session) -> Result<()>;

    /// Delete a session record.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Sessions whose `expires_at` is in the past.
    async fn list_expired(&self) -> Result<Vec<Session>>;

    /// Delete all expired sessions; returns how many rows went away.
    async fn delete_expired(&self) -> Result<u64>;
}

/// In-memory store for development and tests.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create(&self, session: &Session) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Session> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("session {id}")))
    }

    async fn get_by_user(&self, user_id: &str) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn update(&self, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(&session.id) {
            return Err(Error::NotFound(format!("session {}", session.id)));
        }
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions.write().await.remove(id);
        Ok(())
    }

    async fn list_expired(&self) -> Result<Vec<Session>> {
        let now = Utc::now();
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.expires_at < now)
            .cloned()
            .collect())
    }

    async fn delete_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at >= now);
        Ok((before - sessions.len()) as u64)
    }
}

/// SQLite-backed store (WAL mode, auto-migrated on open).
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) a database file and run migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!(
            "sqlite://{}?mode=rwc",
            path.display()
        ))
        .map_err(|e| Error::Io(e.to_string()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Open an in-memory database, mainly for tests.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::Io(e.to_string()))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Io(e.to_string()))?;
        Ok(())
    }
}

/// Flat row shape; metadata rides as a JSON text column.
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    user_id: String,
    sandbox_id: Option<String>,
    status: String,
    workspace_url: Option<String>,
    image: String,
    cpu_count: i64,
    memory_mb: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    paused_at: Option<DateTime<Utc>>,
    metadata: Option<String>,
}

impl TryFrom<SessionRow> for Session {
    type Error = Error;

    fn try_from(row: SessionRow) -> Result<Session> {
        let status: SessionStatus = row
            .status
            .parse()
            .map_err(|e: String| Error::Io(format!("session {}: {e}", row.id)))?;
        let metadata = match row.metadata.as_deref() {
            Some(raw) if !raw.is_empty() => serde_json::from_str(raw)?,
            _ => HashMap::new(),
        };
        Ok(Session {
            id: row.id,
            user_id: row.user_id,
            sandbox_id: row.sandbox_id,
            status,
            workspace_url: row.workspace_url,
            image: row.image,
            cpu_count: row.cpu_count as u32,
            memory_mb: row.memory_mb as u64,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_active_at: row.last_active_at,
            expires_at: row.expires_at,
            paused_at: row.paused_at,
            metadata,
        })
    }
}

const SESSION_COLUMNS: &str = "id, user_id, sandbox_id, status, workspace_url, image, \
     cpu_count, memory_mb, created_at, updated_at, last_active_at, expires_at, \
     paused_at, metadata";

#[async_trait]
impl SessionStore for SqliteStore {
    async fn create(&self, session: &Session) -> Result<()> {
        let metadata = metadata_column(session)?;
        sqlx::query(
            "INSERT INTO sessions (id, user_id, sandbox_id, status, workspace_url, image, \
             cpu_count, memory_mb, created_at, updated_at, last_active_at, expires_at, \
             paused_at, metadata) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.sandbox_id)
        .bind(session.status.to_string())
        .bind(&session.workspace_url)
        .bind(&session.image)
        .bind(session.cpu_count as i64)
        .bind(session.memory_mb as i64)
        .bind(session.created_at)
        .bind(session.updated_at)
        .bind(session.last_active_at)
        .bind(session.expires_at)
        .bind(session.paused_at)
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Session> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("session {id}")))?;
        row.try_into()
    }

    async fn get_by_user(&self, user_id: &str) -> Result<Vec<Session>> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE user_id = ? \
             ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Session::try_from).collect()
    }

    async fn update(&self, session: &Session) -> Result<()> {
        let metadata = metadata_column(session)?;
        let result = sqlx::query(
            "UPDATE sessions SET user_id = ?, sandbox_id = ?, status = ?, \
             workspace_url = ?, image = ?, cpu_count = ?, memory_mb = ?, \
             updated_at = ?, last_active_at = ?, expires_at = ?, paused_at = ?, \
             metadata = ? WHERE id = ?",
        )
        .bind(&session.user_id)
        .bind(&session.sandbox_id)
        .bind(session.status.to_string())
        .bind(&session.workspace_url)
        .bind(&session.image)
        .bind(session.cpu_count as i64)
        .bind(session.memory_mb as i64)
        .bind(session.updated_at)
        .bind(session.last_active_at)
        .bind(session.expires_at)
        .bind(session.paused_at)
        .bind(metadata)
        .bind(&session.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("session {}", session.id)));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_expired(&self) -> Result<Vec<Session>> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE expires_at < ?"
        ))
        .bind(Utc::now())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Session::try_from).collect()
    }

    async fn delete_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn metadata_column(session: &Session) -> Result<Option<String>> {
    if session.metadata.is_empty() {
        Ok(None)
    } else {
        Ok(Some(serde_json::to_string(&session.metadata)?))
    }
}
