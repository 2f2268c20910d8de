//! Subprocess task resolvers.
//!
//! A resolver plugin lives in its own directory with a `resolver.toml`:
//!
//! ```toml
//! name = "swe-tasks"
//! entry = "python3"
//! args = ["resolve.py"]
//! timeout_secs = 60
//! ```
//!
//! The entry command runs with the plugin directory as its working
//! directory, receives the task params as a JSON object on stdin and must
//! print one `ResolvedTask` JSON object on stdout.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::domain::errors::DomainResult;
use crate::domain::ports::{ResolvedTask, TaskResolver};
use crate::infrastructure::config::ConfigError;

/// File name of the manifest inside a plugin directory.
pub const MANIFEST_FILE: &str = "resolver.toml";

const STDERR_TAIL_CHARS: usize = 500;

const fn default_timeout_secs() -> u64 {
    60
}

/// Parsed `resolver.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolverManifest {
    pub name: String,
    /// Command to run; paths containing `/` are relative to the plugin dir.
    pub entry: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ResolverManifest {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Plugin("manifest name is empty".to_string()));
        }
        if self.entry.trim().is_empty() {
            return Err(ConfigError::Plugin(format!(
                "resolver '{}' has an empty entry",
                self.name
            )));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Plugin(format!(
                "resolver '{}' timeout_secs must be at least 1",
                self.name
            )));
        }
        Ok(())
    }
}

/// A resolver backed by an external command.
#[derive(Debug, Clone)]
pub struct SubprocessResolver {
    manifest: ResolverManifest,
    dir: PathBuf,
}

impl SubprocessResolver {
    /// Load the plugin in `dir`.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let text = std::fs::read_to_string(&manifest_path).map_err(|e| {
            ConfigError::Plugin(format!("cannot read {}: {e}", manifest_path.display()))
        })?;
        let manifest: ResolverManifest = toml::from_str(&text).map_err(|e| {
            ConfigError::Plugin(format!("invalid {}: {e}", manifest_path.display()))
        })?;
        manifest.validate()?;

        Ok(Self {
            manifest,
            dir: dir.to_path_buf(),
        })
    }

    pub fn manifest(&self) -> &ResolverManifest {
        &self.manifest
    }

    fn program(&self) -> PathBuf {
        if self.manifest.entry.contains('/') {
            self.dir.join(&self.manifest.entry)
        } else {
            PathBuf::from(&self.manifest.entry)
        }
    }

    async fn invoke(&self, input: &[u8]) -> Result<ResolvedTask, ConfigError> {
        let name = &self.manifest.name;
        let mut child = Command::new(self.program())
            .args(&self.manifest.args)
            .current_dir(&self.dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ConfigError::Plugin(format!("resolver '{name}' failed to start: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ConfigError::Plugin(format!("resolver '{name}': no stdin handle")))?;

        // The timeout covers feeding stdin too: a plugin that never reads a
        // large input would otherwise block the write forever.
        let run = async move {
            // A plugin may exit without reading its input; its exit status decides.
            if let Err(e) = stdin.write_all(input).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(ConfigError::Plugin(format!(
                        "resolver '{name}': writing params failed: {e}"
                    )));
                }
            }
            drop(stdin);
            child
                .wait_with_output()
                .await
                .map_err(|e| ConfigError::Plugin(format!("resolver '{name}' failed: {e}")))
        };

        let timeout = Duration::from_secs(self.manifest.timeout_secs);
        let output = tokio::time::timeout(timeout, run).await.map_err(|_| {
            ConfigError::Plugin(format!(
                "resolver '{name}' timed out after {}s",
                self.manifest.timeout_secs
            ))
        })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConfigError::Plugin(format!(
                "resolver '{name}' exited with {:?}: {}",
                output.status.code(),
                tail(stderr.trim(), STDERR_TAIL_CHARS)
            )));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            ConfigError::Plugin(format!("resolver '{name}' returned an invalid task: {e}"))
        })
    }
}

fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    text.char_indices().nth(skip).map_or(text, |(i, _)| &text[i..])
}

#[async_trait]
impl TaskResolver for SubprocessResolver {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    async fn resolve(&self, task_params: &Map<String, Value>) -> DomainResult<ResolvedTask> {
        let input = serde_json::to_vec(task_params)?;
        let task = self.invoke(&input).await?;
        tracing::info!(
            resolver = %self.manifest.name,
            suites = task.suites.len(),
            "resolved task"
        );
        Ok(task)
    }
}

/// Load every plugin under `base_dir/*/resolver.toml`.
///
/// A missing base directory yields no resolvers. A broken plugin fails the
/// whole load.
pub fn load_resolvers(base_dir: &Path) -> Result<Vec<SubprocessResolver>, ConfigError> {
    if !base_dir.exists() {
        tracing::info!(
            path = %base_dir.display(),
            "No resolver directory found, skipping plugin loading"
        );
        return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(base_dir).map_err(|e| {
        ConfigError::Plugin(format!("cannot read {}: {e}", base_dir.display()))
    })?;

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.join(MANIFEST_FILE).is_file())
        .collect();
    dirs.sort();

    let mut resolvers = Vec::with_capacity(dirs.len());
    for dir in dirs {
        let resolver = SubprocessResolver::load(&dir)?;
        if resolvers
            .iter()
            .any(|r: &SubprocessResolver| r.manifest.name == resolver.manifest.name)
        {
            return Err(ConfigError::Plugin(format!(
                "duplicate resolver name '{}'",
                resolver.manifest.name
            )));
        }
        tracing::debug!(name = %resolver.manifest.name, path = %dir.display(), "loaded resolver");
        resolvers.push(resolver);
    }
    Ok(resolvers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::DomainError;
    use serde_json::json;

    fn write_plugin(dir: &Path, manifest: &str, script: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();
        std::fs::write(dir.join("resolve.sh"), script).unwrap();
    }

    const MANIFEST: &str = r#"
name = "echo"
entry = "sh"
args = ["resolve.sh"]
"#;

    #[tokio::test]
    async fn test_resolve_reads_stdin_and_parses_stdout() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("echo");
        write_plugin(
            &dir,
            MANIFEST,
            "cat > received.json\necho '{\"prompt\": \"fix the bug\", \"suites\": [\"unit\"], \"sandbox\": {\"cpu\": 2.0}}'\n",
        );

        let resolver = SubprocessResolver::load(&dir).unwrap();
        assert_eq!(resolver.name(), "echo");

        let mut params = Map::new();
        params.insert("difficulty".to_string(), json!("hard"));
        let task = resolver.resolve(&params).await.unwrap();

        assert_eq!(task.prompt, "fix the bug");
        assert_eq!(task.suites, vec!["unit"]);
        assert_eq!(task.sandbox.cpu, Some(2.0));

        let received: Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("received.json")).unwrap())
                .unwrap();
        assert_eq!(received, json!({"difficulty": "hard"}));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_configuration_error() {
        let tmp = tempfile::tempdir().unwrap();
        write_plugin(tmp.path(), MANIFEST, "echo 'no such task' >&2\nexit 2\n");

        let resolver = SubprocessResolver::load(tmp.path()).unwrap();
        let err = resolver.resolve(&Map::new()).await.unwrap_err();
        match err {
            DomainError::Configuration(msg) => assert!(msg.contains("no such task")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_output_is_configuration_error() {
        let tmp = tempfile::tempdir().unwrap();
        write_plugin(tmp.path(), MANIFEST, "echo '{\"prompt\": \"x\", \"bogus\": 1}'\n");

        let resolver = SubprocessResolver::load(tmp.path()).unwrap();
        let err = resolver.resolve(&Map::new()).await.unwrap_err();
        assert!(matches!(err, DomainError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_timeout_covers_unread_stdin() {
        let tmp = tempfile::tempdir().unwrap();
        let manifest = format!("{MANIFEST}timeout_secs = 1\n");
        write_plugin(tmp.path(), &manifest, "sleep 30\n");

        let resolver = SubprocessResolver::load(tmp.path()).unwrap();
        let mut params = Map::new();
        params.insert("blob".to_string(), json!("x".repeat(4 * 1024 * 1024)));

        let started = std::time::Instant::now();
        let err = resolver.resolve(&params).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(10));
        match err {
            DomainError::Configuration(msg) => assert!(msg.contains("timed out"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_manifest_validation() {
        let tmp = tempfile::tempdir().unwrap();
        write_plugin(tmp.path(), "name = \"\"\nentry = \"sh\"\n", "");
        assert!(SubprocessResolver::load(tmp.path()).is_err());

        let other = tempfile::tempdir().unwrap();
        write_plugin(other.path(), "name = \"x\"\nentry = \"sh\"\nunknown = 1\n", "");
        assert!(SubprocessResolver::load(other.path()).is_err());

        let missing = tempfile::tempdir().unwrap();
        assert!(matches!(
            SubprocessResolver::load(missing.path()),
            Err(ConfigError::Plugin(_))
        ));
    }

    #[test]
    fn test_load_resolvers_scans_subdirs() {
        let tmp = tempfile::tempdir().unwrap();
        write_plugin(&tmp.path().join("b"), "name = \"beta\"\nentry = \"sh\"\n", "");
        write_plugin(&tmp.path().join("a"), "name = \"alpha\"\nentry = \"sh\"\n", "");
        std::fs::create_dir_all(tmp.path().join("not-a-plugin")).unwrap();

        let resolvers = load_resolvers(tmp.path()).unwrap();
        let names: Vec<_> = resolvers.iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);

        assert!(load_resolvers(&tmp.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_load_resolvers_rejects_duplicates() {
        let tmp = tempfile::tempdir().unwrap();
        write_plugin(&tmp.path().join("a"), "name = \"same\"\nentry = \"sh\"\n", "");
        write_plugin(&tmp.path().join("b"), "name = \"same\"\nentry = \"sh\"\n", "");
        assert!(load_resolvers(tmp.path()).is_err());
    }

    #[test]
    fn test_tail_keeps_end() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 3), "ab");
    }
}
