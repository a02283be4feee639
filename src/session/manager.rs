//! Session lifecycle state machine.
//!
//! The manager owns session policy only: it never touches the pool.
//! Acquiring and releasing sandboxes is the enclosing service's job, glued
//! to the manager through `bind_sandbox`/`unbind_sandbox`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::identity;
use crate::workspace::WorkspaceArchive;

use super::cache::SessionCache;
use super::models::{CreateSessionRequest, Session, SessionStatus};
use super::store::SessionStore;

/// Manager timing configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// TTL applied when a request does not ask for one.
    pub default_ttl: Duration,
    /// Hard cap on any requested TTL.
    pub max_ttl: Duration,
    /// Expiry sweep cadence.
    pub cleanup_interval: Duration,
    /// Resource defaults applied to create requests.
    pub default_image: String,
    pub default_cpu_count: u32,
    pub default_memory_mb: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(24 * 60 * 60),
            max_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
            default_image: "python:3.11-slim".to_string(),
            default_cpu_count: 2,
            default_memory_mb: 2048,
        }
    }
}

/// Binds sessions to sandboxes and drives pause/persist/resume/expire.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    cache: Option<Arc<dyn SessionCache>>,
    archive: Option<Arc<WorkspaceArchive>>,
    config: ManagerConfig,
    shutdown: watch::Sender<bool>,
    sweep: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Create a manager and start its expiry sweep.
    pub fn new(
        store: Arc<dyn SessionStore>,
        cache: Option<Arc<dyn SessionCache>>,
        archive: Option<Arc<WorkspaceArchive>>,
        config: ManagerConfig,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        let manager = Arc::new(Self {
            store,
            cache,
            archive,
            config,
            shutdown,
            sweep: std::sync::Mutex::new(None),
        });

        let handle = tokio::spawn(Self::sweep_loop(Arc::clone(&manager)));
        if let Ok(mut slot) = manager.sweep.lock() {
            *slot = Some(handle);
        }

        manager
    }

    /// Create a session: normalize the request, persist, cache.
    pub async fn create(&self, req: CreateSessionRequest) -> Result<Session> {
        if req.user_id.is_empty() {
            return Err(Error::PreconditionFailed("user_id is required".to_string()));
        }

        let ttl = req
            .ttl()
            .unwrap_or(self.config.default_ttl)
            .min(self.config.max_ttl);
        let ttl_delta = chrono::TimeDelta::from_std(ttl)
            .map_err(|e| Error::PreconditionFailed(format!("ttl out of range: {e}")))?;

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: req.user_id,
            sandbox_id: None,
            status: SessionStatus::Active,
            workspace_url: None,
            image: if req.image.is_empty() {
                self.config.default_image.clone()
            } else {
                req.image
            },
            cpu_count: if req.cpu_count == 0 {
                self.config.default_cpu_count
            } else {
                req.cpu_count
            },
            memory_mb: if req.memory_mb == 0 {
                self.config.default_memory_mb
            } else {
                req.memory_mb
            },
            created_at: now,
            updated_at: now,
            last_active_at: now,
            expires_at: now + ttl_delta,
            paused_at: None,
            metadata: req.metadata,
        };

        self.store.create(&session).await?;
        self.cache_put(&session).await;

        info!(
            "created session {} for user {} (caller {})",
            session.id,
            session.user_id,
            identity::current_user_id()
        );
        Ok(session)
    }

    /// Fetch a session, cache-first. Expired sessions read as `Expired`
    /// even while the row is still awaiting the sweep.
    pub async fn get(&self, id: &str) -> Result<Session> {
        if let Some(cache) = &self.cache {
            match cache.get(id).await {
                Ok(Some(session)) => {
                    if session.is_expired() {
                        return Err(Error::Expired(id.to_string()));
                    }
                    return Ok(session);
                }
                Ok(None) => {}
                Err(err) => warn!("cache read for session {id} failed: {err}"),
            }
        }

        let session = self.store.get(id).await?;
        if session.is_expired() {
            return Err(Error::Expired(id.to_string()));
        }
        self.cache_put(&session).await;
        Ok(session)
    }

    /// All non-expired sessions owned by a user.
    pub async fn get_by_user(&self, user_id: &str) -> Result<Vec<Session>> {
        let sessions = self.store.get_by_user(user_id).await?;
        Ok(sessions.into_iter().filter(|s| !s.is_expired()).collect())
    }

    /// Persist a full session snapshot. Last writer wins.
    pub async fn update(&self, mut session: Session) -> Result<Session> {
        session.updated_at = Utc::now();
        self.store.update(&session).await?;
        self.cache_put(&session).await;
        Ok(session)
    }

    /// Delete a session, its cache entry, and its workspace archive.
    /// Archive deletion is best-effort; store deletion is not.
    pub async fn delete(&self, id: &str) -> Result<()> {
        if let Some(archive) = &self.archive {
            match archive.exists(id).await {
                Ok(true) => {
                    if let Err(err) = archive.delete(id).await {
                        warn!("failed to delete workspace for session {id}: {err}");
                    }
                }
                Ok(false) => {}
                Err(err) => warn!("failed to check workspace for session {id}: {err}"),
            }
        }

        if let Some(cache) = &self.cache {
            if let Err(err) = cache.delete(id).await {
                warn!("failed to evict session {id} from cache: {err}");
            }
        }

        self.store.delete(id).await?;
        info!("deleted session {id}");
        Ok(())
    }

    /// Archive the bound sandbox's workspace and move to `paused`.
    ///
    /// The precondition (active and bound) is checked against a fresh
    /// store read inside this call; a save failure leaves the session
    /// unchanged.
    pub async fn pause(&self, id: &str) -> Result<Session> {
        let mut session = self.fresh(id).await?;

        if session.status != SessionStatus::Active {
            return Err(Error::InvalidState(format!(
                "cannot pause session in state {}",
                session.status
            )));
        }
        let Some(sandbox_id) = session.sandbox_id.clone() else {
            return Err(Error::InvalidState(
                "session has no sandbox bound".to_string(),
            ));
        };

        if let Some(archive) = &self.archive {
            let workspace_url = archive.save(id, &sandbox_id).await?;
            session.workspace_url = Some(workspace_url);
        }

        session.status = SessionStatus::Paused;
        session.paused_at = Some(Utc::now());
        session.sandbox_id = None;

        let session = self.update(session).await?;
        info!("paused session {id}");
        Ok(session)
    }

    /// Move a paused session back to `active` and extend its expiry.
    /// Sandbox binding and workspace restore follow as separate calls.
    pub async fn resume(&self, id: &str) -> Result<Session> {
        let mut session = self.fresh(id).await?;

        if session.status != SessionStatus::Paused {
            return Err(Error::InvalidState(format!(
                "cannot resume session in state {}",
                session.status
            )));
        }

        let now = Utc::now();
        session.status = SessionStatus::Active;
        session.paused_at = None;
        session.last_active_at = now;
        session.expires_at = now
            + chrono::TimeDelta::from_std(self.config.default_ttl)
                .unwrap_or(chrono::TimeDelta::MAX);

        let session = self.update(session).await?;
        info!("resumed session {id}");
        Ok(session)
    }

    /// Restore the archived workspace onto a freshly bound sandbox. A
    /// session that was never paused (no archive) resumes empty.
    pub async fn restore_workspace(&self, session_id: &str, sandbox_id: &str) -> Result<()> {
        let Some(archive) = &self.archive else {
            return Ok(());
        };

        if !archive.exists(session_id).await? {
            info!("no workspace to restore for session {session_id}");
            return Ok(());
        }

        archive.restore(session_id, sandbox_id).await?;
        info!("restored workspace for session {session_id} onto sandbox {sandbox_id}");
        Ok(())
    }

    /// Associate a sandbox with a session. No state transition.
    pub async fn bind_sandbox(&self, session_id: &str, sandbox_id: &str) -> Result<Session> {
        let mut session = self.get(session_id).await?;
        session.sandbox_id = Some(sandbox_id.to_string());
        session.last_active_at = Utc::now();
        let session = self.update(session).await?;
        info!("bound sandbox {sandbox_id} to session {session_id}");
        Ok(session)
    }

    /// Clear the sandbox binding. No state transition.
    pub async fn unbind_sandbox(&self, session_id: &str) -> Result<Session> {
        let mut session = self.get(session_id).await?;
        session.sandbox_id = None;
        let session = self.update(session).await?;
        info!("unbound sandbox from session {session_id}");
        Ok(session)
    }

    /// Refresh `last_active_at` and the cache TTL. Data-plane calls use
    /// this to push out reaping.
    pub async fn touch(&self, id: &str) -> Result<()> {
        let mut session = self.get(id).await?;
        session.last_active_at = Utc::now();
        self.store.update(&session).await?;
        // Write the refreshed record through so cached reads stay current.
        self.cache_put(&session).await;
        Ok(())
    }

    /// Delete expired sessions and their archives. Per-row failures are
    /// logged and skipped; returns how many rows the store removed.
    pub async fn cleanup(&self) -> Result<u64> {
        let expired = self.store.list_expired().await?;

        if let Some(archive) = &self.archive {
            for session in &expired {
                match archive.exists(&session.id).await {
                    Ok(true) => {
                        if let Err(err) = archive.delete(&session.id).await {
                            warn!(
                                "failed to delete workspace for expired session {}: {err}",
                                session.id
                            );
                        }
                    }
                    Ok(false) => {}
                    Err(err) => warn!(
                        "failed to check workspace for expired session {}: {err}",
                        session.id
                    ),
                }
            }
        }

        if let Some(cache) = &self.cache {
            for session in &expired {
                let _ = cache.delete(&session.id).await;
            }
        }

        let count = self.store.delete_expired().await?;
        if count > 0 {
            info!("cleaned up {count} expired sessions");
        }
        Ok(count)
    }

    /// Stop the background sweep.
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.sweep.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Read the session straight from the store, bypassing the cache, so
    /// state-transition preconditions see the latest write.
    async fn fresh(&self, id: &str) -> Result<Session> {
        let session = self.store.get(id).await?;
        if session.is_expired() {
            return Err(Error::Expired(id.to_string()));
        }
        Ok(session)
    }

    async fn cache_put(&self, session: &Session) {
        let Some(cache) = &self.cache else { return };
        match remaining_ttl(session) {
            Some(ttl) => {
                if let Err(err) = cache.set(session, ttl).await {
                    warn!("failed to cache session {}: {err}", session.id);
                }
            }
            // Already past expiry: make sure no stale copy lingers.
            None => {
                let _ = cache.delete(&session.id).await;
            }
        }
    }

    async fn sweep_loop(manager: Arc<Self>) {
        let mut shutdown = manager.shutdown.subscribe();
        let mut ticker = tokio::time::interval(manager.config.cleanup_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = manager.cleanup().await {
                        warn!("session cleanup failed: {err}");
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    }
}

/// Time left until the session expires, if any.
fn remaining_ttl(session: &Session) -> Option<Duration> {
    (session.expires_at - Utc::now()).to_std().ok()
}
