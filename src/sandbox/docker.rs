//! Container-backed [`Runtime`] driven through the Docker or Podman CLI.
//!
//! Each sandbox is a long-lived container running `sleep infinity`, with a
//! tmpfs workspace, cpu/memory caps, and ownership labels so a restarted
//! process can reconcile its registry against the backend.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use dashmap::DashMap;
use log::{debug, warn};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use uuid::Uuid;

use crate::error::{Error, ProvisionReason, Result};

use super::types::{
    ExecRequest, ExecResult, FileEntry, Runtime, Sandbox, SandboxConfig, SandboxStatus,
};

const LABEL_SANDBOX_ID: &str = "sandcastle.sandbox-id";
const LABEL_MANAGED: &str = "sandcastle.managed";

/// Which container engine backs the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineKind {
    #[default]
    Docker,
    Podman,
}

impl EngineKind {
    fn default_binary(&self) -> &'static str {
        match self {
            EngineKind::Docker => "docker",
            EngineKind::Podman => "podman",
        }
    }
}

/// CLI-driven runtime over Docker or Podman.
pub struct DockerRuntime {
    binary: String,
    defaults: SandboxConfig,
    sandboxes: DashMap<String, Sandbox>,
}

impl DockerRuntime {
    /// Create a runtime, auto-detecting the available engine binary.
    pub fn new(defaults: SandboxConfig) -> Self {
        let kind = if is_binary_available("docker") {
            EngineKind::Docker
        } else {
            EngineKind::Podman
        };
        Self::with_engine(kind, defaults)
    }

    /// Create a runtime bound to a specific engine.
    pub fn with_engine(kind: EngineKind, defaults: SandboxConfig) -> Self {
        Self {
            binary: kind.default_binary().to_string(),
            defaults,
            sandboxes: DashMap::new(),
        }
    }

    /// Verify the engine daemon is reachable.
    pub async fn ping(&self) -> Result<()> {
        let output = Command::new(&self.binary)
            .args(["version", "--format", "{{.Server.Version}}"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                Error::provision(ProvisionReason::BackendUnreachable, e.to_string())
            })?;

        if !output.status.success() {
            return Err(Error::provision(
                ProvisionReason::BackendUnreachable,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    fn merged_config(&self, config: &SandboxConfig) -> SandboxConfig {
        let mut merged = config.clone();
        if merged.image.is_empty() {
            merged.image = self.defaults.image.clone();
        }
        if merged.cpu_count == 0 {
            merged.cpu_count = self.defaults.cpu_count;
        }
        if merged.memory_mb == 0 {
            merged.memory_mb = self.defaults.memory_mb;
        }
        if merged.work_dir.is_empty() {
            merged.work_dir = self.defaults.work_dir.clone();
        }
        merged
    }

    fn container_id_for(&self, id: &str) -> Result<String> {
        self.sandboxes
            .get(id)
            .map(|entry| entry.container_id.clone())
            .ok_or_else(|| Error::NotFound(format!("sandbox {id}")))
    }

    fn touch(&self, id: &str, status: SandboxStatus) {
        if let Some(mut entry) = self.sandboxes.get_mut(id) {
            entry.status = status;
            entry.last_active_at = Utc::now();
        }
    }

    /// Run a command inside a container, capturing stdout and stderr
    /// independently with a per-stream byte cap. Output already captured
    /// when the deadline fires is kept; the child is killed immediately.
    async fn exec_raw(
        &self,
        container_id: &str,
        argv: &[String],
        env: &HashMap<String, String>,
        work_dir: &str,
        stdin: Option<&[u8]>,
        timeout: Duration,
        output_cap: usize,
    ) -> Result<RawExec> {
        validate_container_ref(container_id)?;

        let mut args: Vec<String> = vec!["exec".to_string()];
        if stdin.is_some() {
            args.push("-i".to_string());
        }
        if !work_dir.is_empty() {
            args.push("-w".to_string());
            args.push(work_dir.to_string());
        }
        for (key, value) in env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(container_id.to_string());
        args.extend(argv.iter().cloned());

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ExecFailure(format!("spawning {}: {e}", self.binary)))?;

        if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
            let data = data.to_vec();
            tokio::spawn(async move {
                let _ = pipe.write_all(&data).await;
                let _ = pipe.shutdown().await;
            });
        }

        let stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| Error::ExecFailure("stdout pipe missing".to_string()))?;
        let stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| Error::ExecFailure("stderr pipe missing".to_string()))?;

        let stdout_task = tokio::spawn(read_capped(stdout_pipe, output_cap));
        let stderr_task = tokio::spawn(read_capped(stderr_pipe, output_cap));

        let started = Instant::now();
        let (exit_code, timed_out) =
            match tokio::time::timeout(timeout, child.wait()).await {
                Ok(status) => {
                    let status =
                        status.map_err(|e| Error::ExecFailure(e.to_string()))?;
                    (status.code().unwrap_or(-1), false)
                }
                Err(_) => {
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                    (-1, true)
                }
            };
        let duration = started.elapsed();

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        Ok(RawExec {
            exit_code,
            stdout,
            stderr,
            duration,
            timed_out,
        })
    }

    /// Run a short bookkeeping command via the engine and return stdout.
    async fn engine_command(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::Io(format!("{} {}: {e}", self.binary, args[0])))?;

        if !output.status.success() {
            return Err(Error::Io(format!(
                "{} {} failed: {}",
                self.binary,
                args[0],
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

struct RawExec {
    exit_code: i32,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    duration: Duration,
    timed_out: bool,
}

#[async_trait]
impl Runtime for DockerRuntime {
    async fn create(&self, config: &SandboxConfig) -> Result<Sandbox> {
        let config = self.merged_config(config);
        validate_image_name(&config.image)?;

        let sandbox_id = generate_sandbox_id();
        let container_name = format!("sandbox-{sandbox_id}");

        let args: Vec<String> = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            container_name,
            "--label".to_string(),
            format!("{LABEL_SANDBOX_ID}={sandbox_id}"),
            "--label".to_string(),
            format!("{LABEL_MANAGED}=true"),
            "--memory".to_string(),
            format!("{}m", config.memory_mb),
            "--cpus".to_string(),
            config.cpu_count.to_string(),
            "--security-opt".to_string(),
            "no-new-privileges".to_string(),
            "--tmpfs".to_string(),
            format!("{}:rw,size={}m", config.work_dir, config.disk_size_mb),
            "-w".to_string(),
            config.work_dir.clone(),
            "--network".to_string(),
            if config.network_enabled {
                "bridge".to_string()
            } else {
                "none".to_string()
            },
            config.image.clone(),
            "sleep".to_string(),
            "infinity".to_string(),
        ];
        let output = Command::new(&self.binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                Error::provision(ProvisionReason::BackendUnreachable, e.to_string())
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(Error::provision(classify_create_failure(&stderr), stderr));
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();

        let ip = if config.network_enabled {
            self.engine_command(&[
                "inspect",
                "-f",
                "{{range .NetworkSettings.Networks}}{{.IPAddress}}{{end}}",
                &container_id,
            ])
            .await
            .map(|out| out.trim().to_string())
            .unwrap_or_default()
        } else {
            String::new()
        };

        let now = Utc::now();
        let sandbox = Sandbox {
            id: sandbox_id.clone(),
            status: SandboxStatus::Idle,
            container_id,
            image: config.image.clone(),
            ip,
            created_at: now,
            last_active_at: now,
            labels: HashMap::from([
                (LABEL_SANDBOX_ID.to_string(), sandbox_id.clone()),
                (LABEL_MANAGED.to_string(), "true".to_string()),
            ]),
        };

        self.sandboxes.insert(sandbox_id.clone(), sandbox.clone());
        debug!("created sandbox {} ({})", sandbox.id, sandbox.image);
        Ok(sandbox)
    }

    async fn start(&self, id: &str) -> Result<()> {
        let container_id = self.container_id_for(id)?;
        self.engine_command(&["start", &container_id]).await?;
        self.touch(id, SandboxStatus::Idle);
        Ok(())
    }

    async fn stop(&self, id: &str) -> Result<()> {
        let container_id = self.container_id_for(id)?;
        self.engine_command(&["stop", "-t", "10", &container_id])
            .await?;
        if let Some(mut entry) = self.sandboxes.get_mut(id) {
            entry.status = SandboxStatus::Stopped;
        }
        Ok(())
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        let Some((_, sandbox)) = self.sandboxes.remove(id) else {
            // Already gone; destroy is idempotent.
            return Ok(());
        };

        match self
            .engine_command(&["rm", "-f", "--volumes", &sandbox.container_id])
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_missing_container(&err) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn get(&self, id: &str) -> Result<Sandbox> {
        self.sandboxes
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::NotFound(format!("sandbox {id}")))
    }

    async fn list(&self) -> Result<Vec<Sandbox>> {
        Ok(self
            .sandboxes
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn exec(&self, id: &str, req: ExecRequest) -> Result<ExecResult> {
        let container_id = self.container_id_for(id)?;
        self.touch(id, SandboxStatus::Active);

        let argv = if req.command.is_empty() {
            build_command(&req.language, &req.code)
        } else {
            req.command.clone()
        };
        let work_dir = if req.work_dir.is_empty() {
            self.defaults.work_dir.clone()
        } else {
            req.work_dir.clone()
        };
        let timeout = req.timeout.unwrap_or(self.defaults.max_execution_time);

        let raw = self
            .exec_raw(
                &container_id,
                &argv,
                &req.env,
                &work_dir,
                req.stdin.as_deref(),
                timeout,
                self.defaults.max_output_bytes,
            )
            .await;

        self.touch(id, SandboxStatus::Idle);
        let raw = raw?;

        Ok(ExecResult {
            exit_code: raw.exit_code,
            stdout: String::from_utf8_lossy(&raw.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&raw.stderr).into_owned(),
            duration: raw.duration,
            timed_out: raw.timed_out,
        })
    }

    async fn write_file(&self, id: &str, path: &str, content: &[u8]) -> Result<()> {
        validate_sandbox_path(path)?;
        let container_id = self.container_id_for(id)?;

        // Base64 framing keeps arbitrary bytes intact through the shell.
        let dir = parent_dir(path);
        let script = format!(
            "mkdir -p {} && base64 -d > {}",
            shell_quote(&dir),
            shell_quote(path)
        );
        let encoded = general_purpose::STANDARD.encode(content);
        let raw = self
            .exec_raw(
                &container_id,
                &[
                    "sh".to_string(),
                    "-c".to_string(),
                    script,
                ],
                &HashMap::new(),
                "",
                Some(encoded.as_bytes()),
                self.defaults.max_execution_time,
                usize::MAX,
            )
            .await?;

        if raw.exit_code != 0 {
            return Err(Error::Io(format!(
                "writing {path}: {}",
                String::from_utf8_lossy(&raw.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn read_file(&self, id: &str, path: &str) -> Result<Vec<u8>> {
        validate_sandbox_path(path)?;
        let container_id = self.container_id_for(id)?;

        let check = self
            .exec_raw(
                &container_id,
                &["test".to_string(), "-f".to_string(), path.to_string()],
                &HashMap::new(),
                "",
                None,
                self.defaults.max_execution_time,
                usize::MAX,
            )
            .await?;
        if check.exit_code != 0 {
            return Err(Error::NotFound(format!("file {path}")));
        }

        let script = format!("cat {} | base64", shell_quote(path));
        let raw = self
            .exec_raw(
                &container_id,
                &["sh".to_string(), "-c".to_string(), script],
                &HashMap::new(),
                "",
                None,
                self.defaults.max_execution_time,
                usize::MAX,
            )
            .await?;
        if raw.exit_code != 0 {
            return Err(Error::Io(format!(
                "reading {path}: {}",
                String::from_utf8_lossy(&raw.stderr).trim()
            )));
        }
        decode_base64(&raw.stdout)
    }

    async fn list_files(&self, id: &str, path: &str) -> Result<Vec<FileEntry>> {
        validate_sandbox_path(path)?;
        let container_id = self.container_id_for(id)?;

        let raw = self
            .exec_raw(
                &container_id,
                &["ls".to_string(), "-la".to_string(), path.to_string()],
                &HashMap::new(),
                "",
                None,
                self.defaults.max_execution_time,
                usize::MAX,
            )
            .await?;
        if raw.exit_code != 0 {
            let stderr = String::from_utf8_lossy(&raw.stderr);
            if stderr.contains("No such file") {
                return Err(Error::NotFound(format!("path {path}")));
            }
            return Err(Error::Io(format!("listing {path}: {}", stderr.trim())));
        }

        Ok(parse_ls_output(
            &String::from_utf8_lossy(&raw.stdout),
            path,
        ))
    }

    async fn delete_file(&self, id: &str, path: &str) -> Result<()> {
        validate_sandbox_path(path)?;
        let container_id = self.container_id_for(id)?;

        let raw = self
            .exec_raw(
                &container_id,
                &["rm".to_string(), "-rf".to_string(), path.to_string()],
                &HashMap::new(),
                "",
                None,
                self.defaults.max_execution_time,
                usize::MAX,
            )
            .await?;
        if raw.exit_code != 0 {
            return Err(Error::Io(format!(
                "deleting {path}: {}",
                String::from_utf8_lossy(&raw.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn export_workspace(&self, id: &str) -> Result<Vec<u8>> {
        let container_id = self.container_id_for(id)?;
        let source = format!("{container_id}:{}", self.defaults.work_dir);

        let output = Command::new(&self.binary)
            .args(["cp", &source, "-"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::Io(format!("exporting workspace: {e}")))?;

        if !output.status.success() {
            return Err(Error::Io(format!(
                "exporting workspace: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }

    async fn import_workspace(&self, id: &str, tar: &[u8]) -> Result<()> {
        let container_id = self.container_id_for(id)?;
        let target = format!("{container_id}:/");

        let mut child = Command::new(&self.binary)
            .args(["cp", "-", &target])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Io(format!("importing workspace: {e}")))?;

        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(tar)
                .await
                .map_err(|e| Error::Io(format!("importing workspace: {e}")))?;
            pipe.shutdown()
                .await
                .map_err(|e| Error::Io(format!("importing workspace: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::Io(format!("importing workspace: {e}")))?;
        if !output.status.success() {
            return Err(Error::Io(format!(
                "importing workspace: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn reconcile(&self) -> Result<()> {
        let ids = self
            .engine_command(&[
                "ps",
                "-a",
                "--filter",
                &format!("label={LABEL_MANAGED}=true"),
                "--format",
                "{{.ID}}",
            ])
            .await?;

        for container_id in ids.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let inspected = match self
                .engine_command(&["inspect", "--format", "json", container_id])
                .await
            {
                Ok(out) => out,
                Err(err) => {
                    warn!("reconcile: inspect {container_id} failed: {err}");
                    continue;
                }
            };

            let entries: Vec<InspectEntry> = match serde_json::from_str(&inspected) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!("reconcile: unparseable inspect output for {container_id}: {err}");
                    continue;
                }
            };
            let Some(entry) = entries.into_iter().next() else {
                continue;
            };

            let Some(sandbox_id) = entry.config.labels.get(LABEL_SANDBOX_ID).cloned()
            else {
                continue;
            };

            let status = match entry.state.status.as_str() {
                "running" => SandboxStatus::Idle,
                "paused" => SandboxStatus::Paused,
                "exited" | "dead" => SandboxStatus::Stopped,
                _ => SandboxStatus::Idle,
            };

            self.sandboxes
                .entry(sandbox_id.clone())
                .and_modify(|existing| existing.status = status)
                .or_insert_with(|| Sandbox {
                    id: sandbox_id,
                    status,
                    container_id: entry.id.clone(),
                    image: entry.config.image.clone(),
                    ip: String::new(),
                    created_at: entry
                        .created
                        .parse()
                        .unwrap_or_else(|_| Utc::now()),
                    last_active_at: Utc::now(),
                    labels: entry.config.labels.clone(),
                });
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct InspectEntry {
    #[serde(rename = "Id", default)]
    id: String,
    #[serde(rename = "Created", default)]
    created: String,
    #[serde(rename = "Config", default)]
    config: InspectConfig,
    #[serde(rename = "State", default)]
    state: InspectState,
}

#[derive(Debug, Default, Deserialize)]
struct InspectConfig {
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "Labels", default)]
    labels: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct InspectState {
    #[serde(rename = "Status", default)]
    status: String,
}

/// Read a stream into memory, keeping at most `cap` bytes but draining
/// the rest so the writing process never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> Vec<u8> {
    let mut collected = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if collected.len() < cap {
                    let take = n.min(cap - collected.len());
                    collected.extend_from_slice(&chunk[..take]);
                }
            }
        }
    }
    collected
}

/// Map a language tag onto its canonical invocation.
pub fn build_command(language: &str, code: &str) -> Vec<String> {
    match language.to_lowercase().as_str() {
        "python" | "python3" => vec!["python3".into(), "-c".into(), code.into()],
        "node" | "javascript" | "js" => vec!["node".into(), "-e".into(), code.into()],
        "ruby" => vec!["ruby".into(), "-e".into(), code.into()],
        // bash/sh/shell and anything unknown run as shell.
        _ => vec!["bash".into(), "-c".into(), code.into()],
    }
}

/// Parse `ls -la` output into entries. Handles both GNU coreutils and
/// BusyBox field layouts; mtimes are not recoverable from this format so
/// entries carry the listing time.
pub fn parse_ls_output(output: &str, base_path: &str) -> Vec<FileEntry> {
    let now = Utc::now();
    let mut entries = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("total") {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 {
            continue;
        }

        let name = fields[fields.len() - 1];
        if name == "." || name == ".." {
            continue;
        }

        let perms = fields[0];
        let size = fields[4].parse::<u64>().unwrap_or(0);

        entries.push(FileEntry {
            name: name.to_string(),
            path: join_path(base_path, name),
            size,
            is_dir: perms.starts_with('d'),
            mod_time: now,
        });
    }

    entries
}

fn join_path(base: &str, name: &str) -> String {
    if base.ends_with('/') {
        format!("{base}{name}")
    } else {
        format!("{base}/{name}")
    }
}

/// Decode the output of the `base64` tool, which wraps lines.
fn decode_base64(data: &[u8]) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = data
        .iter()
        .copied()
        .filter(|byte| !byte.is_ascii_whitespace())
        .collect();
    general_purpose::STANDARD
        .decode(cleaned)
        .map_err(|e| Error::Io(format!("decoding file content: {e}")))
}

fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
        None => ".".to_string(),
    }
}

/// Quote a string for safe interpolation into `sh -c`.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn generate_sandbox_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn is_binary_available(name: &str) -> bool {
    std::process::Command::new("which")
        .arg(name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn is_missing_container(err: &Error) -> bool {
    let message = err.to_string().to_lowercase();
    message.contains("no such container") || message.contains("no container with")
}

fn classify_create_failure(stderr: &str) -> ProvisionReason {
    let lower = stderr.to_lowercase();
    if lower.contains("manifest unknown")
        || lower.contains("pull access denied")
        || lower.contains("no such image")
        || lower.contains("not found: manifest")
    {
        ProvisionReason::ImageUnavailable
    } else if lower.contains("memory")
        || lower.contains("quota")
        || lower.contains("resources")
        || lower.contains("disk")
    {
        ProvisionReason::ResourceDenied
    } else {
        ProvisionReason::BackendUnreachable
    }
}

/// Validate an OCI image reference: `[registry/][ns/]name[:tag][@digest]`.
fn validate_image_name(image: &str) -> Result<()> {
    if image.is_empty() {
        return Err(Error::PreconditionFailed(
            "image name cannot be empty".to_string(),
        ));
    }
    if image.contains("..") {
        return Err(Error::PreconditionFailed(
            "image name cannot contain '..'".to_string(),
        ));
    }
    let valid = |c: char| {
        c.is_ascii_alphanumeric()
            || matches!(c, '.' | '-' | '_' | '/' | ':' | '@')
    };
    if !image.chars().all(valid) {
        return Err(Error::PreconditionFailed(format!(
            "image name '{image}' contains invalid characters"
        )));
    }
    Ok(())
}

/// Container ids are hex; names are alphanumeric with `-` and `_`.
fn validate_container_ref(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 128 {
        return Err(Error::PreconditionFailed(
            "container reference must be 1-128 characters".to_string(),
        ));
    }
    let valid = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    if !id.chars().all(valid) {
        return Err(Error::PreconditionFailed(format!(
            "container reference '{id}' contains invalid characters"
        )));
    }
    Ok(())
}

/// Sandbox paths must be absolute and free of null bytes.
fn validate_sandbox_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::PreconditionFailed(
            "path cannot be empty".to_string(),
        ));
    }
    if !path.starts_with('/') {
        return Err(Error::PreconditionFailed(format!(
            "path '{path}' must be absolute"
        )));
    }
    if path.contains('\0') {
        return Err(Error::PreconditionFailed(
            "path cannot contain null bytes".to_string(),
        ));
    }
    Ok(())
}
