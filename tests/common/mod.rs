//! Shared test harness: an in-memory runtime plus wiring helpers.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::Router;
use chrono::Utc;
use dashmap::DashMap;
use tempfile::TempDir;

use sandcastle::api::{create_router, AppState};
use sandcastle::error::{Error, ProvisionReason, Result};
use sandcastle::sandbox::{
    ExecRequest, ExecResult, FileEntry, Pool, PoolConfig, Runtime, Sandbox, SandboxConfig,
    SandboxStatus,
};
use sandcastle::session::{ManagerConfig, MemoryCache, MemoryStore, SessionManager};
use sandcastle::workspace::{ArchiveConfig, LocalObjectStore, WorkspaceArchive};

const WORK_DIR: &str = "/workspace";

/// In-memory [`Runtime`]: sandboxes are maps of path to bytes, exec
/// understands the handful of commands the suites use.
#[derive(Default)]
pub struct MockRuntime {
    sandboxes: DashMap<String, MockSandbox>,
    /// Containers that "exist on the backend"; `reconcile` adopts them.
    backend: Mutex<Vec<Sandbox>>,
    counter: AtomicUsize,
    fail_creates: AtomicBool,
    destroyed: Mutex<Vec<String>>,
    max_output_bytes: AtomicUsize,
}

struct MockSandbox {
    sandbox: Sandbox,
    files: BTreeMap<String, Vec<u8>>,
}

impl MockRuntime {
    pub fn new() -> Arc<Self> {
        let runtime = Self::default();
        runtime
            .max_output_bytes
            .store(10 * 1024 * 1024, Ordering::SeqCst);
        Arc::new(runtime)
    }

    /// Make subsequent creates fail with `ProvisionFailed`.
    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    /// Cap captured exec output, as a real backend would.
    pub fn set_max_output_bytes(&self, cap: usize) {
        self.max_output_bytes.store(cap, Ordering::SeqCst);
    }

    /// Register a container left behind on the backend by a previous
    /// process generation. Invisible until `reconcile` adopts it.
    pub fn backend_sandbox(&self, status: SandboxStatus) -> Sandbox {
        let seq = self.counter.fetch_add(1, Ordering::SeqCst);
        let id = format!("orphan{seq:04}");
        let now = Utc::now();
        let sandbox = Sandbox {
            id: id.clone(),
            status,
            container_id: format!("container-{id}"),
            image: "python:3.11-slim".to_string(),
            ip: String::new(),
            created_at: now,
            last_active_at: now,
            labels: Default::default(),
        };
        if let Ok(mut backend) = self.backend.lock() {
            backend.push(sandbox.clone());
        }
        sandbox
    }

    /// Ids destroyed so far, in order.
    pub fn destroyed_ids(&self) -> Vec<String> {
        self.destroyed
            .lock()
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    pub fn live_count(&self) -> usize {
        self.sandboxes.len()
    }

    fn files_of(&self, id: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        self.sandboxes
            .get(id)
            .map(|entry| entry.files.clone())
            .ok_or_else(|| Error::NotFound(format!("sandbox {id}")))
    }
}

#[async_trait]
impl Runtime for MockRuntime {
    async fn create(&self, config: &SandboxConfig) -> Result<Sandbox> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(Error::provision(
                ProvisionReason::BackendUnreachable,
                "mock backend refused",
            ));
        }

        let seq = self.counter.fetch_add(1, Ordering::SeqCst);
        let id = format!("mock{seq:04}");
        let now = Utc::now();
        let sandbox = Sandbox {
            id: id.clone(),
            status: SandboxStatus::Idle,
            container_id: format!("container-{id}"),
            image: if config.image.is_empty() {
                "python:3.11-slim".to_string()
            } else {
                config.image.clone()
            },
            ip: String::new(),
            created_at: now,
            last_active_at: now,
            labels: Default::default(),
        };
        self.sandboxes.insert(
            id,
            MockSandbox {
                sandbox: sandbox.clone(),
                files: BTreeMap::new(),
            },
        );
        Ok(sandbox)
    }

    async fn start(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn stop(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        self.sandboxes.remove(id);
        if let Ok(mut backend) = self.backend.lock() {
            backend.retain(|sandbox| sandbox.id != id);
        }
        if let Ok(mut destroyed) = self.destroyed.lock() {
            destroyed.push(id.to_string());
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Sandbox> {
        self.sandboxes
            .get(id)
            .map(|entry| entry.sandbox.clone())
            .ok_or_else(|| Error::NotFound(format!("sandbox {id}")))
    }

    async fn list(&self) -> Result<Vec<Sandbox>> {
        Ok(self
            .sandboxes
            .iter()
            .map(|entry| entry.sandbox.clone())
            .collect())
    }

    async fn exec(&self, id: &str, req: ExecRequest) -> Result<ExecResult> {
        if !self.sandboxes.contains_key(id) {
            return Err(Error::NotFound(format!("sandbox {id}")));
        }

        let timeout = req.timeout.unwrap_or(Duration::from_secs(300));
        let cap = self.max_output_bytes.load(Ordering::SeqCst);
        let started = Instant::now();

        let argv = if req.command.is_empty() {
            vec!["bash".to_string(), "-c".to_string(), req.code.clone()]
        } else {
            req.command.clone()
        };

        let head = argv.first().map(String::as_str).unwrap_or("");
        let (exit_code, stdout, stderr, timed_out) = match head {
            "echo" => (0, format!("{}\n", argv[1..].join(" ")), String::new(), false),
            "sleep" => {
                let wanted =
                    Duration::from_secs_f64(argv.get(1).and_then(|s| s.parse().ok()).unwrap_or(0.0));
                if wanted > timeout {
                    tokio::time::sleep(timeout).await;
                    (-1, String::new(), String::new(), true)
                } else {
                    tokio::time::sleep(wanted).await;
                    (0, String::new(), String::new(), false)
                }
            }
            "spew" => {
                let n: usize = argv.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);
                (0, "x".repeat(n), String::new(), false)
            }
            "false" => (1, String::new(), "failed\n".to_string(), false),
            _ => (0, String::new(), String::new(), false),
        };

        let mut stdout = stdout;
        let mut stderr = stderr;
        stdout.truncate(cap);
        stderr.truncate(cap);

        Ok(ExecResult {
            exit_code,
            stdout,
            stderr,
            duration: started.elapsed(),
            timed_out,
        })
    }

    async fn write_file(&self, id: &str, path: &str, content: &[u8]) -> Result<()> {
        let mut entry = self
            .sandboxes
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("sandbox {id}")))?;
        entry.files.insert(path.to_string(), content.to_vec());
        Ok(())
    }

    async fn read_file(&self, id: &str, path: &str) -> Result<Vec<u8>> {
        self.files_of(id)?
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("file {path}")))
    }

    async fn list_files(&self, id: &str, path: &str) -> Result<Vec<FileEntry>> {
        let prefix = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{path}/")
        };
        let now = Utc::now();
        Ok(self
            .files_of(id)?
            .iter()
            .filter(|(file, _)| file.starts_with(&prefix))
            .map(|(file, bytes)| FileEntry {
                name: file[prefix.len()..].to_string(),
                path: file.clone(),
                size: bytes.len() as u64,
                is_dir: false,
                mod_time: now,
            })
            .collect())
    }

    async fn delete_file(&self, id: &str, path: &str) -> Result<()> {
        let mut entry = self
            .sandboxes
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("sandbox {id}")))?;
        entry.files.retain(|file, _| {
            file != path && !file.starts_with(&format!("{path}/"))
        });
        Ok(())
    }

    async fn export_workspace(&self, id: &str) -> Result<Vec<u8>> {
        let files = self.files_of(id)?;
        let mut builder = tar::Builder::new(Vec::new());
        let prefix = format!("{WORK_DIR}/");

        for (path, bytes) in files.iter().filter(|(p, _)| p.starts_with(&prefix)) {
            // `docker cp dir -` style: paths rooted at the directory name.
            let tar_path = format!("workspace/{}", &path[prefix.len()..]);
            let mut header = tar::Header::new_gnu();
            header.set_size(bytes.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, tar_path, bytes.as_slice())
                .map_err(|e| Error::Io(e.to_string()))?;
        }
        builder.into_inner().map_err(|e| Error::Io(e.to_string()))
    }

    async fn import_workspace(&self, id: &str, data: &[u8]) -> Result<()> {
        let mut entry = self
            .sandboxes
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("sandbox {id}")))?;

        let mut archive = tar::Archive::new(data);
        for file in archive.entries().map_err(|e| Error::Io(e.to_string()))? {
            let mut file = file.map_err(|e| Error::Io(e.to_string()))?;
            if !file.header().entry_type().is_file() {
                continue;
            }
            let path = file
                .path()
                .map_err(|e| Error::Io(e.to_string()))?
                .to_string_lossy()
                .into_owned();
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes)
                .map_err(|e| Error::Io(e.to_string()))?;
            entry.files.insert(format!("/{path}"), bytes);
        }
        Ok(())
    }

    async fn reconcile(&self) -> Result<()> {
        let backend = self
            .backend
            .lock()
            .map(|sandboxes| sandboxes.clone())
            .unwrap_or_default();
        for sandbox in backend {
            self.sandboxes
                .entry(sandbox.id.clone())
                .or_insert(MockSandbox {
                    sandbox,
                    files: BTreeMap::new(),
                });
        }
        Ok(())
    }
}

/// Pool config with fast timers and no background warmup, unless asked.
pub fn quick_pool_config(min: usize, max: usize, warmup: usize) -> PoolConfig {
    PoolConfig {
        min_size: min,
        max_size: max,
        warmup_size: warmup,
        idle_timeout: Duration::from_secs(300),
        cleanup_interval: Duration::from_secs(300),
        sandbox: SandboxConfig::default(),
    }
}

/// Manager wired to in-memory store/cache and a temp-dir object store.
/// The returned TempDir must stay alive for the archive to work.
pub fn test_manager(
    runtime: Arc<MockRuntime>,
    config: ManagerConfig,
) -> (Arc<SessionManager>, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let object_store =
        LocalObjectStore::new(dir.path().to_path_buf()).expect("object store");
    let archive = Arc::new(WorkspaceArchive::new(
        runtime,
        Arc::new(object_store),
        ArchiveConfig::default(),
    ));

    let manager = SessionManager::new(
        Arc::new(MemoryStore::new()),
        Some(Arc::new(MemoryCache::new())),
        Some(archive),
        config,
    );
    (manager, dir)
}

/// Full application wired against the mock runtime.
pub fn test_app(pool_config: PoolConfig) -> (Router, TestHandles) {
    let runtime = MockRuntime::new();
    let pool = Pool::new(pool_config, runtime.clone() as Arc<dyn Runtime>);
    let (sessions, archive_dir) = test_manager(runtime.clone(), ManagerConfig::default());

    let state = AppState::new(
        Arc::clone(&pool),
        Arc::clone(&sessions),
        runtime.clone() as Arc<dyn Runtime>,
    );
    let router = create_router(state);

    (
        router,
        TestHandles {
            runtime,
            pool,
            sessions,
            _archive_dir: archive_dir,
        },
    )
}

/// Keeps the backing services (and temp dirs) alive for a test.
pub struct TestHandles {
    pub runtime: Arc<MockRuntime>,
    pub pool: Arc<Pool>,
    pub sessions: Arc<SessionManager>,
    _archive_dir: TempDir,
}
