use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::{
    config::ExecutorConfig,
    error::Error,
    executor::CodeExecutor,
    registry::Registry,
    types::{ExecutionRequest, ExecutionResult},
};

#[derive(Clone)]
pub struct CodeExecutionService {
    executor: Arc<CodeExecutor>,
    semaphore: Arc<Semaphore>,
    config: Arc<ExecutorConfig>,
}

impl CodeExecutionService {
    pub fn new(config: ExecutorConfig, registry: Registry) -> Result<Self, Error> {
        config.validate()?;
        let executor = CodeExecutor::new(Arc::new(registry), &config);

        Ok(Self {
            executor: Arc::new(executor),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            config: Arc::new(config),
        })
    }

    /// Service with the built-in recipe table
    pub fn with_builtin_recipes(config: ExecutorConfig) -> Result<Self, Error> {
        Self::new(config, Registry::builtin()?)
    }

    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, Error> {
        // Acquire execution permit
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| Error::System(format!("Failed to acquire execution permit: {}", e)))?;

        // The budget starts once the request holds a permit.
        let budget = self.config.budget_for(request.timeout);
        let deadline = Instant::now() + budget;

        debug!(
            language = %request.language,
            budget_ms = budget.as_millis() as u64,
            "Starting code execution"
        );

        let result = self.executor.execute(&request, deadline).await;

        if let Err(e) = &result {
            error!("Code execution failed: {}", e);
        }

        result
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn languages(&self) -> Vec<String> {
        self.executor
            .registry()
            .languages()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }
}
