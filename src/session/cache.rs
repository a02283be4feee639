//! Fast lookup-by-id session cache.
//!
//! Write-through lookaside in front of the store. Misses are never errors;
//! entries expire alongside their session because callers set the TTL to
//! `expires_at - now` on every write.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;

use super::models::Session;

/// Cache contract. A networked implementation (e.g. Redis) slots in
/// behind the same trait.
#[async_trait]
pub trait SessionCache: Send + Sync {
    /// Fetch a cached session. `Ok(None)` is a miss.
    async fn get(&self, id: &str) -> Result<Option<Session>>;

    /// Store a session with a TTL.
    async fn set(&self, session: &Session, ttl: Duration) -> Result<()>;

    /// Drop a cached session.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Refresh the TTL of a cached session without rewriting it.
    async fn touch(&self, id: &str, ttl: Duration) -> Result<()>;
}

/// In-process TTL cache.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
}

struct CacheEntry {
    session: Session,
    deadline: Instant,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live entry count (expired entries linger until touched).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SessionCache for MemoryCache {
    async fn get(&self, id: &str) -> Result<Option<Session>> {
        let expired = match self.entries.get(id) {
            Some(entry) if Instant::now() < entry.deadline => {
                return Ok(Some(entry.session.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(id);
        }
        Ok(None)
    }

    async fn set(&self, session: &Session, ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            return Ok(());
        }
        self.entries.insert(
            session.id.clone(),
            CacheEntry {
                session: session.clone(),
                deadline: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.entries.remove(id);
        Ok(())
    }

    async fn touch(&self, id: &str, ttl: Duration) -> Result<()> {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.deadline = Instant::now() + ttl;
        }
        Ok(())
    }
}
