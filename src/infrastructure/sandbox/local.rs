//! Local-process sandbox provider.
//!
//! Runs commands with `sh -c` inside a per-sandbox directory on the host.
//! There is no isolation beyond the working directory: GPU, network policy
//! and container images are reported as ignored by `resolve_config`.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AppliedSandboxConfig, CommandOutput, CommandSpec, ResolvedSandboxConfig, SandboxCapabilities,
    SandboxRequest,
};
use crate::domain::ports::{LineCallback, OutputCallbacks, Sandbox, SandboxProvider};

const PROVIDER_NAME: &str = "local";

/// Smallest CPU share a local sandbox can be asked for.
pub const CPU_FLOOR: f64 = 0.25;

const DEFAULT_CPU: f64 = 1.0;
const DEFAULT_MEMORY_MB: u64 = 2048;
const DEFAULT_DISK_MB: u64 = 10 * 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 3600;
const FALLBACK_HOST_MEMORY_MB: u64 = 4096;

/// Resources of the machine running the sandboxes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostLimits {
    pub cpu: f64,
    pub memory_mb: u64,
}

impl HostLimits {
    /// Read limits from the current host.
    pub fn detect() -> Self {
        let cpu = std::thread::available_parallelism()
            .map(|n| n.get() as f64)
            .unwrap_or(DEFAULT_CPU);
        let memory_mb = std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|text| parse_mem_total_mb(&text))
            .unwrap_or(FALLBACK_HOST_MEMORY_MB);
        Self { cpu, memory_mb }
    }
}

fn parse_mem_total_mb(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find(|line| line.starts_with("MemTotal:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb / 1024)
}

/// Provider creating [`LocalProcessSandbox`]es under a base directory.
#[derive(Debug, Clone)]
pub struct LocalProvider {
    base_dir: PathBuf,
    limits: HostLimits,
}

impl LocalProvider {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            limits: HostLimits::detect(),
        }
    }

    #[must_use]
    pub fn with_limits(mut self, limits: HostLimits) -> Self {
        self.limits = limits;
        self
    }
}

#[async_trait]
impl SandboxProvider for LocalProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn resolve_config(&self, requested: &SandboxRequest) -> DomainResult<ResolvedSandboxConfig> {
        let mut warnings = Vec::new();
        let mut ignored_fields = Vec::new();

        let requested_cpu = requested.cpu.unwrap_or(DEFAULT_CPU);
        if !requested_cpu.is_finite() || requested_cpu < CPU_FLOOR {
            return Err(DomainError::Configuration(format!(
                "requested cpu {requested_cpu} is below the local provider floor of {CPU_FLOOR}"
            )));
        }
        let cpu = if requested_cpu > self.limits.cpu {
            warnings.push(format!(
                "cpu {requested_cpu} exceeds host limit, clamped to {}",
                self.limits.cpu
            ));
            self.limits.cpu
        } else {
            requested_cpu
        };

        let requested_memory = requested
            .memory_mb
            .unwrap_or_else(|| DEFAULT_MEMORY_MB.min(self.limits.memory_mb));
        let memory_mb = if requested_memory > self.limits.memory_mb {
            warnings.push(format!(
                "memory_mb {requested_memory} exceeds host limit, clamped to {}",
                self.limits.memory_mb
            ));
            self.limits.memory_mb
        } else {
            requested_memory
        };

        if requested.gpu.is_some_and(|n| n > 0) {
            ignored_fields.push("gpu".to_string());
            warnings.push("gpu is not available to local sandboxes".to_string());
        }
        if let Some(policy) = &requested.network {
            ignored_fields.push("network".to_string());
            warnings.push(format!(
                "network policy '{policy}' cannot be enforced by local sandboxes"
            ));
        }
        if let Some(image) = &requested.image {
            ignored_fields.push("image".to_string());
            warnings.push(format!("image '{image}' ignored, commands run on the host"));
        }

        Ok(ResolvedSandboxConfig {
            provider: PROVIDER_NAME.to_string(),
            applied_config: AppliedSandboxConfig {
                cpu,
                memory_mb,
                disk_mb: requested.disk_mb.unwrap_or(DEFAULT_DISK_MB),
                timeout_secs: requested.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
                image: None,
                env: requested.env.clone(),
            },
            capabilities: SandboxCapabilities {
                streaming: true,
                file_transfer: true,
                gpu: false,
                network_isolation: false,
            },
            warnings,
            ignored_fields,
        })
    }

    async fn create(&self, resolved: &ResolvedSandboxConfig) -> DomainResult<Arc<dyn Sandbox>> {
        let root = self.base_dir.join(format!("sbx-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            DomainError::Sandbox(format!("failed to create sandbox dir {}: {e}", root.display()))
        })?;

        for warning in &resolved.warnings {
            tracing::warn!(provider = PROVIDER_NAME, "{warning}");
        }
        tracing::info!(root = %root.display(), "created local sandbox");

        Ok(Arc::new(LocalProcessSandbox::new(
            root,
            resolved.applied_config.env.clone(),
        )))
    }
}

/// A sandbox that is a directory plus `sh -c`.
pub struct LocalProcessSandbox {
    root: PathBuf,
    env: BTreeMap<String, String>,
    terminated: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl LocalProcessSandbox {
    pub fn new(root: impl Into<PathBuf>, env: BTreeMap<String, String>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            root: root.into(),
            env,
            terminated: AtomicBool::new(false),
            shutdown,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_live(&self) -> DomainResult<()> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(DomainError::Sandbox("sandbox has been terminated".to_string()));
        }
        Ok(())
    }

    /// Map a sandbox path onto the host, refusing anything outside the root.
    fn resolve_path(&self, path: &str) -> DomainResult<PathBuf> {
        let candidate = Path::new(path);
        let relative = if candidate.is_absolute() {
            candidate.strip_prefix(&self.root).map_err(|_| {
                DomainError::Sandbox(format!("path {path} is outside the sandbox root"))
            })?
        } else {
            candidate
        };

        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(DomainError::Sandbox(format!(
                "path {path} escapes the sandbox root"
            )));
        }
        Ok(self.root.join(relative))
    }
}

async fn collect_lines<R>(reader: R, callback: Option<LineCallback>) -> String
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut collected = String::new();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(cb) = &callback {
                    cb(&line);
                }
                collected.push_str(&line);
                collected.push('\n');
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "stopped reading command output");
                break;
            }
        }
    }
    collected
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl Sandbox for LocalProcessSandbox {
    fn provider(&self) -> &str {
        PROVIDER_NAME
    }

    async fn run(&self, spec: CommandSpec, callbacks: OutputCallbacks) -> DomainResult<CommandOutput> {
        self.ensure_live()?;
        let cwd = match &spec.cwd {
            Some(dir) => self.resolve_path(dir)?,
            None => self.root.clone(),
        };

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&spec.cmd)
            .current_dir(&cwd)
            .envs(&self.env)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| DomainError::Sandbox(format!("failed to spawn command: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DomainError::Sandbox("failed to get stdout handle".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DomainError::Sandbox("failed to get stderr handle".to_string()))?;

        // Dropping `work` drops the child, which kills it.
        let work = async move {
            let (out, err) = tokio::join!(
                collect_lines(stdout, callbacks.on_stdout_line),
                collect_lines(stderr, callbacks.on_stderr_line)
            );
            let status = child.wait().await;
            (out, err, status)
        };

        let mut shutdown = self.shutdown.subscribe();
        let result = tokio::select! {
            r = tokio::time::timeout(spec.timeout, work) => r,
            () = wait_for_shutdown(&mut shutdown) => {
                tracing::debug!(cmd = %spec.cmd, "command interrupted by terminate");
                return Err(DomainError::Cancelled);
            }
        };

        match result {
            Ok((stdout, stderr, status)) => {
                let status = status
                    .map_err(|e| DomainError::Sandbox(format!("failed to wait for command: {e}")))?;
                let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                Ok(CommandOutput {
                    exit_code: status.code().unwrap_or(-1),
                    stdout,
                    stderr,
                    duration_ms,
                })
            }
            Err(_) => {
                tracing::warn!(cmd = %spec.cmd, timeout_secs = spec.timeout.as_secs(), "command timed out");
                Err(DomainError::Timeout(spec.timeout.as_secs()))
            }
        }
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> DomainResult<()> {
        self.ensure_live()?;
        let target = self.resolve_path(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DomainError::Sandbox(format!("failed to create {}: {e}", parent.display())))?;
        }
        tokio::fs::write(&target, content)
            .await
            .map_err(|e| DomainError::Sandbox(format!("failed to write {path}: {e}")))
    }

    async fn read_file(&self, path: &str) -> DomainResult<String> {
        self.ensure_live()?;
        let target = self.resolve_path(path)?;
        tokio::fs::read_to_string(&target)
            .await
            .map_err(|e| DomainError::Sandbox(format!("failed to read {path}: {e}")))
    }

    async fn read_file_bytes(&self, path: &str) -> DomainResult<Bytes> {
        self.ensure_live()?;
        let target = self.resolve_path(path)?;
        tokio::fs::read(&target)
            .await
            .map(Bytes::from)
            .map_err(|e| DomainError::Sandbox(format!("failed to read {path}: {e}")))
    }

    async fn terminate(&self) -> DomainResult<()> {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown.send_replace(true);
        tracing::info!(root = %self.root.display(), "terminated local sandbox");
        Ok(())
    }
}
