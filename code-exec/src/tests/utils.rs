pub mod defaults {
    use crate::{CodeExecutionService, ExecutorConfig, Result};
    use std::path::Path;
    use std::time::Duration;

    pub fn default_timeout() -> Duration {
        Duration::from_secs(10)
    }

    /// Compiled toolchains (javac, rustc, go) can be slow on a cold cache
    pub fn extended_timeout() -> Duration {
        Duration::from_secs(60)
    }

    pub fn test_config(workspace_root: &Path) -> ExecutorConfig {
        ExecutorConfig {
            workspace_root: workspace_root.to_path_buf(),
            default_timeout: default_timeout(),
            max_timeout: extended_timeout(),
            max_concurrent: 8,
            ..ExecutorConfig::default()
        }
    }

    pub fn test_service(workspace_root: &Path) -> Result<CodeExecutionService> {
        CodeExecutionService::with_builtin_recipes(test_config(workspace_root))
    }
}

pub mod assertions {
    use std::path::Path;

    /// No workspace survived under `root` (a root that was never created counts)
    pub fn assert_no_workspaces(root: &Path) {
        if !root.exists() {
            return;
        }
        let leftovers: Vec<_> = std::fs::read_dir(root)
            .expect("workspace root is readable")
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name())
            .collect();
        assert!(leftovers.is_empty(), "leftover workspaces: {:?}", leftovers);
    }
}

pub(crate) fn skip_if_not_available(tools: &[&str]) -> bool {
    let missing: Vec<_> = tools
        .iter()
        .filter(|tool| which::which(tool).is_err())
        .map(|s| (*s).to_string())
        .collect();

    if !missing.is_empty() {
        eprintln!("Skipping test: {} not available", missing.join(", "));
        return true;
    }
    false
}
