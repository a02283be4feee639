//! Workspace archival: snapshot a sandbox's workspace to the object store
//! and restore it onto another sandbox later.
//!
//! The payload is a gzip-compressed tar produced by the runtime's
//! workspace export; after a successful save, restoring onto any sandbox
//! reproduces the file tree exactly (bytes, paths, dirs, exec bits).

use std::io::{Read, Write};
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{info, warn};

use crate::error::{Error, Result};
use crate::sandbox::Runtime;

use super::object_store::ObjectStore;

/// Archive configuration.
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Key prefix inside the bucket.
    pub key_prefix: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            key_prefix: "workspaces".to_string(),
        }
    }
}

/// Snapshots sandbox workspaces into an object store, keyed by session.
pub struct WorkspaceArchive {
    runtime: Arc<dyn Runtime>,
    store: Arc<dyn ObjectStore>,
    config: ArchiveConfig,
}

impl WorkspaceArchive {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        store: Arc<dyn ObjectStore>,
        config: ArchiveConfig,
    ) -> Self {
        Self {
            runtime,
            store,
            config,
        }
    }

    /// The object key a session's workspace lives at.
    pub fn key_for(&self, session_id: &str) -> String {
        format!("{}/{session_id}/workspace.tar.gz", self.config.key_prefix)
    }

    /// Snapshot the sandbox's workspace and upload it. Overwrites any
    /// previous archive for the session; returns the object key.
    pub async fn save(&self, session_id: &str, sandbox_id: &str) -> Result<String> {
        let tar = self.runtime.export_workspace(sandbox_id).await?;
        let compressed = gzip(&tar)?;

        let key = self.key_for(session_id);
        self.store.put(&key, &compressed).await?;

        info!(
            "saved workspace for session {session_id} ({} bytes compressed)",
            compressed.len()
        );
        Ok(key)
    }

    /// Download and unpack the archived workspace into the target sandbox.
    /// A missing archive is a no-op: the session resumes empty.
    pub async fn restore(&self, session_id: &str, sandbox_id: &str) -> Result<()> {
        let key = self.key_for(session_id);
        let compressed = match self.store.get(&key).await {
            Ok(data) => data,
            Err(Error::NotFound(_)) => {
                warn!("no archived workspace for session {session_id}, restoring nothing");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let tar = gunzip(&compressed)?;
        self.runtime.import_workspace(sandbox_id, &tar).await?;

        info!("restored workspace for session {session_id} onto sandbox {sandbox_id}");
        Ok(())
    }

    /// Remove the session's archive. Missing objects are fine.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        self.store.delete(&self.key_for(session_id)).await
    }

    /// Whether an archive exists for the session.
    pub async fn exists(&self, session_id: &str) -> Result<bool> {
        self.store.exists(&self.key_for(session_id)).await
    }
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
