use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{error::Error, types::ResourceLimits, Result};

const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Variables every child gets from the runner itself
const RESERVED_ENV: &[&str] = &["PATH", "HOME", "TMPDIR", "LANG"];

/// Host variables that version managers and toolchains keep their state in,
/// with the directory under the host `$HOME` they fall back to. Children run
/// with `HOME` pointing at the workspace, so these have to be spelled out.
const TOOLCHAIN_ENV: &[(&str, Option<&str>)] = &[
    ("RUSTUP_HOME", Some(".rustup")),
    ("CARGO_HOME", Some(".cargo")),
    ("RUSTUP_TOOLCHAIN", None),
    ("PYENV_ROOT", Some(".pyenv")),
    ("NVM_DIR", Some(".nvm")),
    ("GOROOT", None),
    ("GOPATH", None),
    ("GOCACHE", None),
    ("GOMODCACHE", None),
    ("JAVA_HOME", None),
];

/// Build caches placed under [`ExecutorConfig::cache_dir`] unless the host
/// already provides them
const CACHE_ENV: &[(&str, &str)] = &[("GOCACHE", "go-build"), ("GOPATH", "gopath")];

/// Runtime settings for the execution service
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Directory under which per-request workspaces are created
    pub workspace_root: PathBuf,
    /// Budget used when a request does not ask for one
    pub default_timeout: Duration,
    /// Upper bound for any requested budget
    pub max_timeout: Duration,
    /// Maximum number of requests executing at the same time
    pub max_concurrent: usize,
    /// Per-stream cap on captured output; the rest is discarded
    pub max_output_bytes: usize,
    /// Limits applied to every child process
    pub limits: ResourceLimits,
    /// `PATH` given to child processes
    pub child_path: String,
    /// Extra variables handed to every child, resolved from the host
    pub child_env: Vec<(String, String)>,
    /// Build caches that outlive a single workspace
    pub cache_dir: PathBuf,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir().join("code-exec"),
            default_timeout: Duration::from_secs(10),
            max_timeout: Duration::from_secs(60),
            max_concurrent: 10,
            max_output_bytes: 64 * 1024,
            limits: ResourceLimits::default(),
            child_path: std::env::var("PATH").unwrap_or_else(|_| FALLBACK_PATH.to_string()),
            child_env: toolchain_env(
                |name| std::env::var(name).ok(),
                std::env::var_os("HOME").map(PathBuf::from).as_deref(),
            ),
            cache_dir: std::env::temp_dir().join("code-exec-cache"),
        }
    }
}

/// Resolve [`TOOLCHAIN_ENV`] against the host. A variable that is not set is
/// still passed when its conventional directory exists under `home`.
fn toolchain_env(
    lookup: impl Fn(&str) -> Option<String>,
    home: Option<&Path>,
) -> Vec<(String, String)> {
    let mut env = Vec::new();
    for &(name, home_default) in TOOLCHAIN_ENV {
        if let Some(value) = lookup(name).filter(|v| !v.is_empty()) {
            env.push((name.to_string(), value));
            continue;
        }
        let fallback = home
            .zip(home_default)
            .map(|(home, dir)| home.join(dir))
            .filter(|dir| dir.is_dir());
        if let Some(dir) = fallback {
            env.push((name.to_string(), dir.to_string_lossy().into_owned()));
        }
    }
    env
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_timeout.is_zero() || self.max_timeout.is_zero() {
            return Err(Error::Config("timeouts must be non-zero".to_string()));
        }
        if self.default_timeout > self.max_timeout {
            return Err(Error::Config(format!(
                "default timeout {:?} exceeds maximum {:?}",
                self.default_timeout, self.max_timeout
            )));
        }
        if self.max_concurrent == 0 {
            return Err(Error::Config(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.max_output_bytes == 0 {
            return Err(Error::Config(
                "max_output_bytes must be at least 1".to_string(),
            ));
        }
        for (name, _) in &self.child_env {
            if name.is_empty() || name.contains('=') || name.contains('\0') {
                return Err(Error::Config(format!(
                    "invalid environment variable name {:?}",
                    name
                )));
            }
            if RESERVED_ENV.contains(&name.as_str()) {
                return Err(Error::Config(format!(
                    "{} is set by the runner and cannot be passed through",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Copy `name` from the host environment into [`Self::child_env`].
    /// Returns false when the host does not have it.
    pub fn pass_through(&mut self, name: &str) -> bool {
        match std::env::var(name) {
            Ok(value) => {
                self.child_env.retain(|(existing, _)| existing != name);
                self.child_env.push((name.to_string(), value));
                true
            }
            Err(_) => false,
        }
    }

    /// Everything a child sees besides the runner's own variables: the
    /// passthrough list plus cache locations under [`Self::cache_dir`].
    pub fn child_environment(&self) -> Vec<(String, String)> {
        let mut env = self.child_env.clone();
        for &(name, dir) in CACHE_ENV {
            if !env.iter().any(|(existing, _)| existing == name) {
                env.push((
                    name.to_string(),
                    self.cache_dir.join(dir).to_string_lossy().into_owned(),
                ));
            }
        }
        env
    }

    /// Wall-clock budget for a request, shared by its compile and run steps.
    pub fn budget_for(&self, requested: Option<Duration>) -> Duration {
        match requested {
            Some(t) if !t.is_zero() => t.min(self.max_timeout),
            _ => self.default_timeout,
        }
    }
}
