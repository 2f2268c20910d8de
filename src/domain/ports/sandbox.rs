//! Sandbox port - remote, isolated command execution.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::errors::DomainResult;
use crate::domain::models::{CommandOutput, CommandSpec, ResolvedSandboxConfig, SandboxRequest};

/// Callback receiving one line of streamed output, without the newline.
pub type LineCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Optional per-stream line callbacks for [`Sandbox::run`].
#[derive(Clone, Default)]
pub struct OutputCallbacks {
    pub on_stdout_line: Option<LineCallback>,
    pub on_stderr_line: Option<LineCallback>,
}

impl std::fmt::Debug for OutputCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputCallbacks")
            .field("on_stdout_line", &self.on_stdout_line.is_some())
            .field("on_stderr_line", &self.on_stderr_line.is_some())
            .finish()
    }
}

/// A live sandbox.
///
/// `run` may block for a long time; implementations must stream lines to
/// the callbacks as they arrive and honour `spec.timeout`.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Provider name, for logging only.
    fn provider(&self) -> &str;

    async fn run(&self, spec: CommandSpec, callbacks: OutputCallbacks) -> DomainResult<CommandOutput>;

    async fn write_file(&self, path: &str, content: &[u8]) -> DomainResult<()>;

    async fn read_file(&self, path: &str) -> DomainResult<String>;

    async fn read_file_bytes(&self, path: &str) -> DomainResult<Bytes>;

    /// Release the sandbox. Calling it more than once is a no-op.
    async fn terminate(&self) -> DomainResult<()>;
}

/// One infrastructure provider able to create sandboxes.
///
/// Callers never branch on provider identity; everything provider-specific
/// is expressed through [`SandboxProvider::resolve_config`].
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Clamp and derive concrete resources for `requested`.
    ///
    /// Pure. Fails with `DomainError::Configuration` when a requested
    /// minimum cannot be met at all.
    fn resolve_config(&self, requested: &SandboxRequest) -> DomainResult<ResolvedSandboxConfig>;

    async fn create(&self, resolved: &ResolvedSandboxConfig) -> DomainResult<Arc<dyn Sandbox>>;
}
