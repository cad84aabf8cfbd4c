//! Executor façade: the single entry point callers construct and hold.
//!
//! Owns the tool and variable registries, the resource bounds, and the
//! language → strategy dispatch. Strategy instances and the validator are
//! cheap to rebuild per call in this implementation, so nothing is cached
//! beyond the registries and the container runtime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crucible_config::ContainerConfig;
use crucible_core::EngineError;
use crucible_types::{ExecutionOutcome, ExecutionResult, Language, ToolCallRecord, TraceMode};

use crate::container::ContainerExecutor;
use crate::in_process::InProcessExecutor;
use crate::sandbox::CallLog;
use crate::tool::{Tool, ToolRegistry, VariableRegistry};
use crate::validator;
use crate::worker::IsolatedWorkerExecutor;

/// Which strategy services one `execute` call. Host-language code defaults to
/// [`Strategy::InProcess`]; callers opt into [`Strategy::IsolatedWorker`] for
/// extra isolation on suspicious input. Non-host languages always go through
/// [`Strategy::Container`] regardless of what is requested here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    InProcess,
    IsolatedWorker,
    Container,
}

/// Per-call overrides layered on top of the façade's resource bounds.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    pub strategy: Option<Strategy>,
    pub timeout_secs: Option<u64>,
}

/// Holds registries, resource bounds, and dispatch for every `execute` call.
pub struct Executor {
    tools: ToolRegistry,
    variables: VariableRegistry,
    max_operations: u64,
    max_output_length: usize,
    trace_mode: TraceMode,
    container_config: ContainerConfig,
    call_log: CallLog,
    runtime: tokio::runtime::Runtime,
}

impl Executor {
    /// Build a façade with the given resource bounds and container defaults.
    pub fn new(max_operations: u64, max_output_length: usize, trace_mode: TraceMode) -> Result<Self, EngineError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| EngineError::unknown(format!("failed to start container runtime: {e}")))?;
        Ok(Self {
            tools: ToolRegistry::new(),
            variables: VariableRegistry::new(),
            max_operations,
            max_output_length,
            trace_mode,
            container_config: ContainerConfig::default(),
            call_log: Arc::new(Mutex::new(Vec::new())),
            runtime,
        })
    }

    #[must_use]
    pub fn with_container_config(mut self, container_config: ContainerConfig) -> Self {
        self.container_config = container_config;
        self
    }

    /// Every recognized language is serviceable: the host language in-process
    /// (or isolated-worker), everything else through the container strategy.
    #[must_use]
    pub fn supports(_language: Language) -> bool {
        true
    }

    /// Merge `tools` into the registry. Fails closed on the first dangerous
    /// name; earlier entries in this call remain registered.
    pub fn send_tools(&mut self, tools: HashMap<String, Arc<dyn Tool>>) -> Result<(), EngineError> {
        self.tools.merge(tools)
    }

    pub fn send_variables(&mut self, variables: HashMap<String, serde_json::Value>) {
        self.variables.merge(variables);
    }

    /// Tool calls observed during the most recent `execute`, in insertion
    /// order. Cleared at the start of the next `execute`.
    #[must_use]
    pub fn tool_calls(&self) -> Vec<ToolCallRecord> {
        self.call_log.lock().expect("call log mutex poisoned").clone()
    }

    pub fn execute(
        &self,
        code: &str,
        language: Language,
        options: ExecuteOptions,
    ) -> Result<ExecutionResult, EngineError> {
        {
            let mut log = self.call_log.lock().expect("call log mutex poisoned");
            log.clear();
        }

        let strategy = self.resolve_strategy(language, options.strategy);
        match strategy {
            Strategy::InProcess => InProcessExecutor::execute(
                code,
                language,
                &self.tools,
                &self.variables,
                self.max_operations,
                self.trace_mode,
                self.max_output_length,
                Arc::clone(&self.call_log),
            ),
            Strategy::IsolatedWorker => IsolatedWorkerExecutor::execute(
                code,
                language,
                &self.tools,
                &self.variables,
                self.max_operations,
                self.max_output_length,
                Arc::clone(&self.call_log),
            ),
            Strategy::Container => {
                let validation = validator::validate(code, language);
                if !validation.is_valid() {
                    return Ok(ExecutionResult::failure(validation.joined_errors(), Vec::new()));
                }
                let mut config = self.container_config.clone();
                if let Some(timeout_secs) = options.timeout_secs {
                    config.timeout_secs = timeout_secs;
                }
                self.runtime
                    .block_on(ContainerExecutor::execute(code, language, &config))
            }
        }
    }

    /// `execute` plus a monotonic duration measurement and derived state.
    pub fn execute_with_outcome(
        &self,
        code: &str,
        language: Language,
        options: ExecuteOptions,
    ) -> Result<ExecutionOutcome, EngineError> {
        let started = Instant::now();
        let result = self.execute(code, language, options)?;
        Ok(ExecutionOutcome::new(result, started.elapsed()))
    }

    fn resolve_strategy(&self, language: Language, requested: Option<Strategy>) -> Strategy {
        if !language.is_host() {
            return Strategy::Container;
        }
        requested.unwrap_or(Strategy::InProcess)
    }
}
