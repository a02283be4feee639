//! Bounded pool of sandboxes with background warmup and idle reaping.
//!
//! All access to pool state goes through one mutex held only across
//! bookkeeping; backend I/O (create/destroy) always happens off-lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

use super::types::{Runtime, Sandbox, SandboxConfig, SandboxStatus};

const WARMUP_TICK: Duration = Duration::from_secs(10);
const WARMUP_CREATE_DEADLINE: Duration = Duration::from_secs(2 * 60);

/// Pool sizing and reaping configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Idle sandboxes the reaper never goes below.
    pub min_size: usize,
    /// Hard cap on `idle + active + creating`.
    pub max_size: usize,
    /// Idle count the warmup loop works toward.
    pub warmup_size: usize,
    /// Idle age after which a sandbox is reaped.
    pub idle_timeout: Duration,
    /// Reaper cadence.
    pub cleanup_interval: Duration,
    /// Defaults for sandboxes the pool creates.
    pub sandbox: SandboxConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 2,
            max_size: 50,
            warmup_size: 5,
            idle_timeout: Duration::from_secs(30 * 60),
            cleanup_interval: Duration::from_secs(5 * 60),
            sandbox: SandboxConfig::default(),
        }
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolStats {
    pub idle: usize,
    pub active: usize,
    pub creating: usize,
    pub max: usize,
}

#[derive(Default)]
struct PoolState {
    /// LIFO stack: the most recently released sandbox is served first.
    idle: Vec<Sandbox>,
    active: HashMap<String, Sandbox>,
    creating: usize,
    closed: bool,
}

/// A bounded, concurrently accessed population of sandboxes.
pub struct Pool {
    config: PoolConfig,
    runtime: Arc<dyn Runtime>,
    state: Mutex<PoolState>,
    shutdown: watch::Sender<bool>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl Pool {
    /// Create a pool and start its warmup and cleanup loops.
    pub fn new(config: PoolConfig, runtime: Arc<dyn Runtime>) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        let pool = Arc::new(Self {
            config,
            runtime,
            state: Mutex::new(PoolState::default()),
            shutdown,
            loops: Mutex::new(Vec::new()),
        });

        let warmup = tokio::spawn(Self::warmup_loop(Arc::clone(&pool)));
        let cleanup = tokio::spawn(Self::cleanup_loop(Arc::clone(&pool)));
        pool.loops_lock().extend([warmup, cleanup]);

        pool
    }

    fn state_lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn loops_lock(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.loops.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adopt sandboxes the runtime already knows about into the idle
    /// stack. Called once at startup, after the runtime has rebuilt its
    /// registry from backend labels, so containers from a previous
    /// process generation are pooled again instead of leaking. Sandboxes
    /// that are not idle, or that exceed capacity, are destroyed.
    /// Returns how many were adopted.
    pub async fn recover(&self) -> Result<usize> {
        let sandboxes = self.runtime.list().await?;

        let mut adopted = 0;
        let mut doomed = Vec::new();
        {
            let mut state = self.state_lock();
            if state.closed {
                return Ok(0);
            }
            for mut sandbox in sandboxes {
                let known = state.active.contains_key(&sandbox.id)
                    || state.idle.iter().any(|s| s.id == sandbox.id);
                if known {
                    continue;
                }

                let total = state.idle.len() + state.active.len() + state.creating;
                if sandbox.status != SandboxStatus::Idle || total >= self.config.max_size {
                    doomed.push(sandbox);
                    continue;
                }

                sandbox.last_active_at = Utc::now();
                debug!("recovered sandbox {} into idle pool", sandbox.id);
                state.idle.push(sandbox);
                adopted += 1;
            }
        }

        for sandbox in doomed {
            if let Err(err) = self.runtime.destroy(&sandbox.id).await {
                error!(
                    "failed to destroy unrecoverable sandbox {}: {err}",
                    sandbox.id
                );
            }
        }

        if adopted > 0 {
            info!("recovered {adopted} sandboxes from the runtime");
        }
        Ok(adopted)
    }

    /// Check out a sandbox: the warmest idle one, or a freshly created one
    /// when there is capacity. Never queues; a full pool fails immediately
    /// with [`Error::PoolExhausted`].
    pub async fn acquire(&self) -> Result<Sandbox> {
        {
            let mut state = self.state_lock();
            if state.closed {
                return Err(Error::PoolClosed);
            }

            if let Some(mut sandbox) = state.idle.pop() {
                sandbox.status = SandboxStatus::Active;
                sandbox.last_active_at = Utc::now();
                state.active.insert(sandbox.id.clone(), sandbox.clone());
                debug!("acquired sandbox {} from idle pool", sandbox.id);
                return Ok(sandbox);
            }

            let total = state.idle.len() + state.active.len() + state.creating;
            if total >= self.config.max_size {
                return Err(Error::PoolExhausted);
            }
            state.creating += 1;
        }

        // Create off-lock; restore the creating slot on failure.
        let created = self.runtime.create(&self.config.sandbox).await;
        let mut state = self.state_lock();
        state.creating -= 1;

        let mut sandbox = created.inspect_err(|err| {
            warn!("sandbox create failed during acquire: {err}");
        })?;
        if state.closed {
            drop(state);
            if let Err(err) = self.runtime.destroy(&sandbox.id).await {
                error!("failed to destroy sandbox {} after close: {err}", sandbox.id);
            }
            return Err(Error::PoolClosed);
        }
        sandbox.status = SandboxStatus::Active;
        sandbox.last_active_at = Utc::now();
        state.active.insert(sandbox.id.clone(), sandbox.clone());
        drop(state);

        debug!("created sandbox {} for acquire", sandbox.id);
        Ok(sandbox)
    }

    /// Return a sandbox. It rejoins the idle stack unless the pool is
    /// closed or full, in which case it is destroyed on a detached task so
    /// release never blocks on backend I/O.
    pub async fn release(&self, id: &str) -> Result<()> {
        let overflow = {
            let mut state = self.state_lock();
            let Some(mut sandbox) = state.active.remove(id) else {
                return Err(Error::NotFound(format!("sandbox {id} not active")));
            };

            if !state.closed && state.idle.len() < self.config.max_size {
                sandbox.status = SandboxStatus::Idle;
                sandbox.last_active_at = Utc::now();
                debug!("released sandbox {} to idle pool", sandbox.id);
                state.idle.push(sandbox);
                None
            } else {
                Some(sandbox)
            }
        };

        if let Some(sandbox) = overflow {
            let runtime = Arc::clone(&self.runtime);
            tokio::spawn(async move {
                if let Err(err) = runtime.destroy(&sandbox.id).await {
                    error!("failed to destroy overflow sandbox {}: {err}", sandbox.id);
                } else {
                    debug!("destroyed overflow sandbox {}", sandbox.id);
                }
            });
        }

        Ok(())
    }

    /// Remove a sandbox from whichever collection holds it and destroy it
    /// synchronously. Unknown ids are an error.
    pub async fn destroy(&self, id: &str) -> Result<()> {
        let found = {
            let mut state = self.state_lock();
            if state.active.remove(id).is_some() {
                true
            } else if let Some(pos) = state.idle.iter().position(|s| s.id == id) {
                state.idle.remove(pos);
                true
            } else {
                false
            }
        };

        if !found {
            return Err(Error::NotFound(format!("sandbox {id}")));
        }
        self.runtime.destroy(id).await
    }

    /// Look up an active sandbox. Idle sandboxes are not observable here.
    pub fn get(&self, id: &str) -> Result<Sandbox> {
        self.state_lock()
            .active
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("sandbox {id} not active")))
    }

    /// Refresh an active sandbox's `last_active_at` so the stuck-sandbox
    /// reaper leaves it alone. Used by data-plane calls.
    pub fn touch(&self, id: &str) {
        if let Some(sandbox) = self.state_lock().active.get_mut(id) {
            sandbox.last_active_at = Utc::now();
        }
    }

    /// Current counters.
    pub fn stats(&self) -> PoolStats {
        let state = self.state_lock();
        PoolStats {
            idle: state.idle.len(),
            active: state.active.len(),
            creating: state.creating,
            max: self.config.max_size,
        }
    }

    /// Stop the background loops and destroy every pooled sandbox.
    /// Idempotent; acquire fails with [`Error::PoolClosed`] afterwards.
    pub async fn close(&self) {
        let drained = {
            let mut state = self.state_lock();
            if state.closed {
                return;
            }
            state.closed = true;

            let mut drained: Vec<Sandbox> = state.idle.drain(..).collect();
            drained.extend(state.active.drain().map(|(_, sandbox)| sandbox));
            drained
        };

        let _ = self.shutdown.send(true);
        let handles: Vec<JoinHandle<()>> = self.loops_lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        let count = drained.len();
        for sandbox in drained {
            if let Err(err) = self.runtime.destroy(&sandbox.id).await {
                error!("failed to destroy sandbox {} on close: {err}", sandbox.id);
            }
        }
        info!("closed pool, destroyed {count} sandboxes");
    }

    async fn warmup_loop(pool: Arc<Self>) {
        let mut shutdown = pool.shutdown.subscribe();
        let mut ticker = tokio::time::interval(WARMUP_TICK);

        loop {
            tokio::select! {
                _ = ticker.tick() => pool.warmup().await,
                _ = shutdown.changed() => return,
            }
        }
    }

    async fn warmup(&self) {
        let needed = {
            let state = self.state_lock();
            if state.closed {
                return;
            }
            self.config
                .warmup_size
                .saturating_sub(state.idle.len() + state.creating)
        };
        if needed == 0 {
            return;
        }

        debug!("warming up {needed} sandboxes");
        let creates = (0..needed).map(|_| self.warm_one());
        join_all(creates).await;
    }

    async fn warm_one(&self) {
        {
            let mut state = self.state_lock();
            let total = state.idle.len() + state.active.len() + state.creating;
            if state.closed || total >= self.config.max_size {
                return;
            }
            state.creating += 1;
        }

        let created = tokio::time::timeout(
            WARMUP_CREATE_DEADLINE,
            self.runtime.create(&self.config.sandbox),
        )
        .await;

        let mut state = self.state_lock();
        state.creating -= 1;

        match created {
            Ok(Ok(sandbox)) => {
                if state.closed {
                    drop(state);
                    let runtime = Arc::clone(&self.runtime);
                    let id = sandbox.id;
                    tokio::spawn(async move {
                        let _ = runtime.destroy(&id).await;
                    });
                    return;
                }
                debug!("warmed up sandbox {}", sandbox.id);
                state.idle.push(sandbox);
            }
            Ok(Err(err)) => warn!("failed to warm up sandbox: {err}"),
            Err(_) => warn!("sandbox warmup timed out"),
        }
    }

    async fn cleanup_loop(pool: Arc<Self>) {
        let mut shutdown = pool.shutdown.subscribe();
        let mut ticker = tokio::time::interval(pool.config.cleanup_interval);
        // The first tick of a tokio interval fires immediately; skip it so
        // a freshly started pool is not swept at once.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => pool.cleanup().await,
                _ = shutdown.changed() => return,
            }
        }
    }

    async fn cleanup(&self) {
        let idle_cutoff = chrono::TimeDelta::from_std(self.config.idle_timeout)
            .unwrap_or(chrono::TimeDelta::MAX);
        let stuck_cutoff = chrono::TimeDelta::from_std(self.config.idle_timeout * 2)
            .unwrap_or(chrono::TimeDelta::MAX);
        let now = Utc::now();

        let doomed = {
            let mut state = self.state_lock();
            let mut doomed = Vec::new();

            // Oldest idle entries sit at the bottom of the stack.
            let mut index = 0;
            while index < state.idle.len() {
                if state.idle.len() <= self.config.min_size {
                    break;
                }
                if now - state.idle[index].last_active_at > idle_cutoff {
                    doomed.push(state.idle.remove(index));
                } else {
                    index += 1;
                }
            }

            let stuck: Vec<String> = state
                .active
                .iter()
                .filter(|(_, sandbox)| now - sandbox.last_active_at > stuck_cutoff)
                .map(|(id, _)| id.clone())
                .collect();
            for id in stuck {
                if let Some(sandbox) = state.active.remove(&id) {
                    warn!("detaching stuck active sandbox {id}");
                    doomed.push(sandbox);
                }
            }

            doomed
        };

        for sandbox in doomed {
            if let Err(err) = self.runtime.destroy(&sandbox.id).await {
                error!("failed to clean up sandbox {}: {err}", sandbox.id);
            } else {
                debug!("cleaned up sandbox {}", sandbox.id);
            }
        }
    }
}

