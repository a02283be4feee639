//! Sandbox types and the runtime contract.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Current state of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    /// Being provisioned by the backend.
    Creating,
    /// Provisioned and waiting in the pool.
    Idle,
    /// Checked out by a caller.
    Active,
    /// Suspended by the backend.
    Paused,
    /// Terminal. A stopped sandbox never comes back.
    Stopped,
    /// The backend reported a fault.
    Error,
}

impl std::fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxStatus::Creating => write!(f, "creating"),
            SandboxStatus::Idle => write!(f, "idle"),
            SandboxStatus::Active => write!(f, "active"),
            SandboxStatus::Paused => write!(f, "paused"),
            SandboxStatus::Stopped => write!(f, "stopped"),
            SandboxStatus::Error => write!(f, "error"),
        }
    }
}

/// A handle to one isolated execution environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sandbox {
    /// Short opaque id, unique within this process.
    pub id: String,
    /// Lifecycle state.
    pub status: SandboxStatus,
    /// Backend-specific handle (e.g. container id).
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub container_id: String,
    /// Image the sandbox was created from.
    pub image: String,
    /// IP assigned by the backend, if networked.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub ip: String,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Last instant the sandbox did work. Monotonically non-decreasing
    /// while the sandbox is live.
    pub last_active_at: DateTime<Utc>,
    /// Ownership labels attached at creation.
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub labels: HashMap<String, String>,
}

/// Resource and behavior settings for new sandboxes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Container image to use.
    pub image: String,
    /// CPU cores granted to the sandbox.
    pub cpu_count: u32,
    /// Memory cap in megabytes.
    pub memory_mb: u64,
    /// Size of the tmpfs-backed workspace in megabytes.
    pub disk_size_mb: u64,
    /// Hard cap on a single execution, unless the request narrows it.
    pub max_execution_time: Duration,
    /// Per-stream cap on captured exec output, in bytes.
    pub max_output_bytes: usize,
    /// Whether the sandbox gets outbound network access.
    pub network_enabled: bool,
    /// Working directory inside the sandbox.
    pub work_dir: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "python:3.11-slim".to_string(),
            cpu_count: 2,
            memory_mb: 2048,
            disk_size_mb: 10240,
            max_execution_time: Duration::from_secs(5 * 60),
            max_output_bytes: 10 * 1024 * 1024,
            network_enabled: true,
            work_dir: "/workspace".to_string(),
        }
    }
}

/// A request to run code or a command inside a sandbox.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecRequest {
    /// Code snippet to execute; mapped to an invocation via `language`.
    #[serde(default)]
    pub code: String,
    /// Language tag (python, node, shell, ...). Unknown tags run as shell.
    #[serde(default)]
    pub language: String,
    /// Explicit argv; takes precedence over `code`.
    #[serde(default)]
    pub command: Vec<String>,
    /// Working directory; defaults to the sandbox workspace.
    #[serde(default)]
    pub work_dir: String,
    /// Extra environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Per-call deadline; defaults to the configured max execution time.
    #[serde(default)]
    pub timeout: Option<Duration>,
    /// Bytes fed to the child's stdin.
    #[serde(skip)]
    pub stdin: Option<Vec<u8>>,
}

/// Outcome of one execution. Non-zero exit is a successful result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    /// Exit code of the process; -1 when it was killed by the deadline.
    pub exit_code: i32,
    /// Captured stdout, truncated at the configured cap.
    pub stdout: String,
    /// Captured stderr, truncated at the configured cap.
    pub stderr: String,
    /// Wall-clock execution time.
    #[serde(rename = "duration_ms", with = "duration_millis")]
    pub duration: Duration,
    /// True iff the deadline fired before the child exited. Output
    /// captured up to that point is still returned.
    pub timed_out: bool,
}

/// Serialize a [`Duration`] as integer milliseconds.
mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Metadata for one entry in a sandbox directory listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// Base name.
    pub name: String,
    /// Full path inside the sandbox.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// Last modification time.
    pub mod_time: DateTime<Utc>,
}

/// The capability the pool consumes: create, destroy, and operate on
/// isolated environments. Implementations must be safe to invoke
/// concurrently for different sandbox ids.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Provision a new sandbox. Returns with status [`SandboxStatus::Idle`].
    async fn create(&self, config: &SandboxConfig) -> Result<Sandbox>;

    /// Start a stopped sandbox.
    async fn start(&self, id: &str) -> Result<()>;

    /// Stop a running sandbox.
    async fn stop(&self, id: &str) -> Result<()>;

    /// Destroy a sandbox and reclaim all its resources. Idempotent.
    async fn destroy(&self, id: &str) -> Result<()>;

    /// Look up a sandbox by id.
    async fn get(&self, id: &str) -> Result<Sandbox>;

    /// All sandboxes this runtime knows about.
    async fn list(&self) -> Result<Vec<Sandbox>>;

    /// Run a command or code snippet. Never fails on non-zero exit.
    async fn exec(&self, id: &str, req: ExecRequest) -> Result<ExecResult>;

    /// Write a file, creating parent directories as needed.
    async fn write_file(&self, id: &str, path: &str, content: &[u8]) -> Result<()>;

    /// Read a file. Fails with `NotFound` when the path is absent.
    async fn read_file(&self, id: &str, path: &str) -> Result<Vec<u8>>;

    /// List a directory.
    async fn list_files(&self, id: &str, path: &str) -> Result<Vec<FileEntry>>;

    /// Delete a file or directory tree.
    async fn delete_file(&self, id: &str, path: &str) -> Result<()>;

    /// The sandbox workspace directory as an uncompressed tar stream.
    async fn export_workspace(&self, id: &str) -> Result<Vec<u8>>;

    /// Unpack a tar stream at the sandbox filesystem root, restoring the
    /// workspace path to the state captured by [`Runtime::export_workspace`].
    async fn import_workspace(&self, id: &str, tar: &[u8]) -> Result<()>;

    /// Rebuild the in-process registry from backend state (ownership
    /// labels). Used once at startup to recover from restarts.
    async fn reconcile(&self) -> Result<()>;
}
