use std::path::Path;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::{
    config::ExecutorConfig,
    error::Error,
    process::{ProcessOutcome, ProcessRunner, SpawnError},
    registry::{CommandLine, Registry, ToolchainRecipe},
    report::redact,
    types::{ExecutionRequest, ExecutionResult, Phase},
    workspace::{Workspace, WorkspaceManager},
};

/// Dispatches requests to their toolchain: resolve recipe, materialize the
/// source, compile, run.
pub struct CodeExecutor {
    registry: Arc<Registry>,
    workspaces: WorkspaceManager,
    runner: ProcessRunner,
}

enum Step {
    Finished(ProcessOutcome),
    Failed(ExecutionResult),
}

impl CodeExecutor {
    pub fn new(registry: Arc<Registry>, config: &ExecutorConfig) -> Self {
        Self {
            registry,
            workspaces: WorkspaceManager::new(config.workspace_root.clone()),
            runner: ProcessRunner::new(
                config.child_path.clone(),
                config.child_environment(),
                config.limits.clone(),
                config.max_output_bytes,
            ),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Execute `request`, with compile and run sharing one `deadline`.
    ///
    /// Only workspace faults surface as `Err`; everything the submitted code
    /// can cause is an `Ok` result.
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
        deadline: Instant,
    ) -> Result<ExecutionResult, Error> {
        let started = Instant::now();

        let Some(recipe) = self.registry.resolve(&request.language) else {
            info!(language = %request.language, "Rejected unsupported language");
            return Ok(ExecutionResult::unsupported_language(&request.language));
        };

        for tool in recipe.required_tools() {
            if self
                .runner
                .resolve_program(tool, self.workspaces.root())
                .is_none()
            {
                info!(language = recipe.language(), tool, "Toolchain unavailable");
                return Ok(ExecutionResult::toolchain_unavailable(
                    String::new(),
                    &format!("{} is not available on this host", tool),
                    None,
                    started.elapsed(),
                ));
            }
        }

        let mut workspace = self.workspaces.acquire(recipe).await.map_err(|e| {
            error!("Failed to acquire workspace: {}", e);
            e
        })?;

        let result = self
            .run_recipe(recipe, &workspace, &request.code, deadline, started)
            .await;

        if let Err(e) = workspace.release().await {
            error!("{}", e);
        }

        if let Ok(result) = &result {
            info!(
                language = recipe.language(),
                status = %result.status(),
                duration_ms = result.duration().as_millis() as u64,
                "Execution finished"
            );
        }
        result
    }

    async fn run_recipe(
        &self,
        recipe: &ToolchainRecipe,
        workspace: &Workspace,
        code: &str,
        deadline: Instant,
        started: Instant,
    ) -> Result<ExecutionResult, Error> {
        workspace.write_source(code).await?;

        let vars = workspace.template_vars();
        let dir = workspace.dir();
        let mut output = String::new();

        if let Some(compile) = recipe.compile_command(&vars) {
            let outcome = match self
                .step(&compile, Phase::Compile, dir, deadline, &output, started)
                .await
            {
                Step::Finished(outcome) => outcome,
                Step::Failed(result) => return Ok(result),
            };
            output.push_str(&outcome.combined_output());

            if outcome.timed_out {
                return Ok(ExecutionResult::timeout(
                    redact(&output, dir),
                    Phase::Compile,
                    started.elapsed(),
                ));
            }
            if !outcome.success() {
                debug!(exit_code = ?outcome.exit_code, "Compilation failed, skipping run");
                return Ok(ExecutionResult::compilation_error(
                    redact(&output, dir),
                    outcome.exit_code,
                    started.elapsed(),
                ));
            }
        }

        let run = recipe.run_command(&vars);
        let outcome = match self
            .step(&run, Phase::Run, dir, deadline, &output, started)
            .await
        {
            Step::Finished(outcome) => outcome,
            Step::Failed(result) => return Ok(result),
        };
        debug!(
            exit_code = ?outcome.exit_code,
            signal = ?outcome.signal,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Run step finished"
        );
        output.push_str(&outcome.combined_output());
        let output = redact(&output, dir);

        Ok(if outcome.timed_out {
            ExecutionResult::timeout(output, Phase::Run, started.elapsed())
        } else if outcome.success() {
            ExecutionResult::success(output, started.elapsed())
        } else {
            ExecutionResult::runtime_error(output, outcome.exit_code, started.elapsed())
        })
    }

    async fn step(
        &self,
        command: &CommandLine,
        phase: Phase,
        dir: &Path,
        deadline: Instant,
        output: &str,
        started: Instant,
    ) -> Step {
        if Instant::now() >= deadline {
            return Step::Failed(ExecutionResult::timeout(
                redact(output, dir),
                phase,
                started.elapsed(),
            ));
        }

        match self.runner.run(command, dir, deadline).await {
            Ok(outcome) => Step::Finished(outcome),
            Err(e) => {
                let reason = match &e {
                    SpawnError::NotFound { .. } => e.to_string(),
                    SpawnError::Spawn { source, .. } | SpawnError::Wait { source, .. } => {
                        format!("could not run {}: {}", command.program, source)
                    }
                };
                info!(%phase, program = e.program(), "Process could not be started");
                Step::Failed(ExecutionResult::toolchain_unavailable(
                    redact(output, dir),
                    &redact(&reason, dir),
                    Some(phase),
                    started.elapsed(),
                ))
            }
        }
    }
}
