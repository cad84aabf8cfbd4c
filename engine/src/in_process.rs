//! In-process strategy: validate, limit, and evaluate host-language source on
//! the calling thread.

use std::sync::{Arc, Mutex};

use crucible_core::EngineError;
use crucible_types::{ExecutionResult, Language, TraceMode};

use crate::limiter::OperationLimiter;
use crate::sandbox::{CallLog, Sandbox, SandboxOutcome};
use crate::tool::{ToolRegistry, VariableRegistry};
use crate::validator;

/// Reports `supports(language)` true only for the host language.
pub struct InProcessExecutor;

impl InProcessExecutor {
    #[must_use]
    pub fn supports(language: Language) -> bool {
        language.is_host()
    }

    /// Run `code` to completion, or to the operation limit, whichever comes first.
    /// Tool calls made during the run are appended to `call_log` in insertion order.
    pub fn execute(
        code: &str,
        language: Language,
        tools: &ToolRegistry,
        variables: &VariableRegistry,
        max_operations: u64,
        trace_mode: TraceMode,
        max_output_length: usize,
        call_log: CallLog,
    ) -> Result<ExecutionResult, EngineError> {
        if code.trim().is_empty() {
            return Err(EngineError::invalid_argument("code must not be empty"));
        }
        if !Self::supports(language) {
            return Err(EngineError::invalid_argument(format!(
                "in-process executor does not support language: {language}"
            )));
        }

        let validation = validator::validate(code, language);
        if !validation.is_valid() {
            return Ok(ExecutionResult::failure(validation.joined_errors(), Vec::new()));
        }

        let limiter = OperationLimiter::new(max_operations, trace_mode);
        let mut sandbox = if tools.is_empty() {
            Sandbox::code_only(variables, limiter.clone())
        } else {
            Sandbox::tool_capable(tools, variables, limiter.clone(), call_log)
        };

        let outcome = sandbox.eval(code);
        limiter.disable();

        let logs = sandbox.take_output();
        let mut result = match outcome {
            SandboxOutcome::Value(v) => ExecutionResult::success(Some(v), logs),
            SandboxOutcome::FinalAnswer(v) => ExecutionResult::final_answer(Some(v), logs),
            SandboxOutcome::Error(e) => ExecutionResult::failure(e.message, logs),
        };
        result.truncate_logs(max_output_length);
        Ok(result)
    }

    /// Run `code` on a dedicated fiber thread (`crate::fiber`) instead of the
    /// calling thread, so every tool call the guest makes is deferred into a
    /// batch rather than invoked eagerly. Each batch is resolved as soon as
    /// it's yielded; a caller wanting to run several fibers concurrently and
    /// resolve their batches together would drive `Fiber::step` directly
    /// instead of going through this convenience wrapper.
    pub fn execute_batched(
        code: &str,
        language: Language,
        tools: &ToolRegistry,
        variables: &VariableRegistry,
        max_operations: u64,
        trace_mode: TraceMode,
        max_output_length: usize,
        call_log: CallLog,
    ) -> Result<ExecutionResult, EngineError> {
        if code.trim().is_empty() {
            return Err(EngineError::invalid_argument("code must not be empty"));
        }
        if !Self::supports(language) {
            return Err(EngineError::invalid_argument(format!(
                "in-process executor does not support language: {language}"
            )));
        }

        let validation = validator::validate(code, language);
        if !validation.is_valid() {
            return Ok(ExecutionResult::failure(validation.joined_errors(), Vec::new()));
        }

        let owned_code = code.to_string();
        let owned_tools = tools.clone();
        let owned_variables = variables.clone();
        let limiter = OperationLimiter::new(max_operations, trace_mode);
        let settled: Arc<Mutex<Option<ExecutionResult>>> = Arc::new(Mutex::new(None));
        let settled_for_guest = Arc::clone(&settled);

        let fiber = crate::fiber::Fiber::spawn(move |_ctx| {
            let mut sandbox = if owned_tools.is_empty() {
                Sandbox::code_only(&owned_variables, limiter.clone())
            } else {
                Sandbox::tool_capable(&owned_tools, &owned_variables, limiter.clone(), call_log)
            };
            let outcome = sandbox.eval(&owned_code);
            limiter.disable();
            let logs = sandbox.take_output();
            let result = match outcome {
                SandboxOutcome::Value(v) => ExecutionResult::success(Some(v), logs),
                SandboxOutcome::FinalAnswer(v) => ExecutionResult::final_answer(Some(v), logs),
                SandboxOutcome::Error(e) => ExecutionResult::failure(e.message, logs),
            };
            *settled_for_guest.lock().expect("settled mutex poisoned") = Some(result);
            Ok(serde_json::Value::Null)
        });

        fiber.run_to_completion()?;
        let mut result = settled
            .lock()
            .expect("settled mutex poisoned")
            .take()
            .unwrap_or_else(|| ExecutionResult::failure("fiber ended without a result", Vec::new()));
        result.truncate_logs(max_output_length);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{Tool, ToolOutcome};
    use serde_json::Value;

    fn empty_log() -> CallLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn empty_code_is_invalid_argument() {
        let tools = ToolRegistry::new();
        let vars = VariableRegistry::new();
        let err = InProcessExecutor::execute(
            "",
            Language::Rhai,
            &tools,
            &vars,
            1000,
            TraceMode::Call,
            1024,
            empty_log(),
        )
        .unwrap_err();
        assert!(err.propagates());
    }

    #[test]
    fn unsupported_language_is_invalid_argument() {
        let tools = ToolRegistry::new();
        let vars = VariableRegistry::new();
        let err = InProcessExecutor::execute(
            "1 + 1",
            Language::Python,
            &tools,
            &vars,
            1000,
            TraceMode::Call,
            1024,
            empty_log(),
        )
        .unwrap_err();
        assert!(err.propagates());
    }

    #[test]
    fn validator_rejection_produces_failure_not_error() {
        let tools = ToolRegistry::new();
        let vars = VariableRegistry::new();
        let result = InProcessExecutor::execute(
            "system(\"rm -rf /\")",
            Language::Rhai,
            &tools,
            &vars,
            1000,
            TraceMode::Call,
            1024,
            empty_log(),
        )
        .unwrap();
        assert!(!result.is_success());
        assert!(result.error.unwrap().contains("Dangerous method call"));
    }

    #[test]
    fn successful_evaluation_produces_output() {
        let tools = ToolRegistry::new();
        let vars = VariableRegistry::new();
        let result = InProcessExecutor::execute(
            "21 * 2",
            Language::Rhai,
            &tools,
            &vars,
            1000,
            TraceMode::Call,
            1024,
            empty_log(),
        )
        .unwrap();
        assert!(result.is_success());
        assert_eq!(result.output, Some(serde_json::json!(42)));
    }

    #[test]
    fn operation_limit_exceeded_produces_failure() {
        let tools = ToolRegistry::new();
        let vars = VariableRegistry::new();
        let result = InProcessExecutor::execute(
            "let n = 0; while true { n += 1; }",
            Language::Rhai,
            &tools,
            &vars,
            100,
            TraceMode::Line,
            1024,
            empty_log(),
        )
        .unwrap();
        assert!(!result.is_success());
        assert!(result.error.unwrap().contains("Operation limit exceeded: 100"));
    }

    #[test]
    fn final_answer_sets_flag() {
        let tools = ToolRegistry::new();
        let vars = VariableRegistry::new();
        let result = InProcessExecutor::execute(
            "final_answer(7)",
            Language::Rhai,
            &tools,
            &vars,
            1000,
            TraceMode::Call,
            1024,
            empty_log(),
        )
        .unwrap();
        assert!(result.is_final_answer);
        assert_eq!(result.output, Some(serde_json::json!(7)));
    }

    #[test]
    fn registered_tool_call_is_recorded() {
        let mut tools = ToolRegistry::new();
        tools
            .register(
                "search",
                Arc::new(|_args: Value, _kwargs: Value| Ok(ToolOutcome::Value(Value::from("R")))) as Arc<dyn Tool>,
            )
            .unwrap();
        let vars = VariableRegistry::new();
        let call_log = empty_log();
        let result = InProcessExecutor::execute(
            "search([], #{query: \"x\"})",
            Language::Rhai,
            &tools,
            &vars,
            1000,
            TraceMode::Call,
            1024,
            Arc::clone(&call_log),
        )
        .unwrap();
        assert!(result.is_success());
        assert_eq!(result.output, Some(serde_json::json!("R")));
        let log = call_log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].tool_name, "search");
        assert!(log[0].error.is_none());
    }

    #[test]
    fn batched_execution_routes_real_guest_tool_calls_through_a_fiber() {
        let mut tools = ToolRegistry::new();
        tools
            .register(
                "search",
                Arc::new(|_args: Value, _kwargs: Value| Ok(ToolOutcome::Value(Value::from("R")))) as Arc<dyn Tool>,
            )
            .unwrap();
        let vars = VariableRegistry::new();
        let call_log = empty_log();
        let result = InProcessExecutor::execute_batched(
            "search([], #{query: \"x\"})",
            Language::Rhai,
            &tools,
            &vars,
            1000,
            TraceMode::Call,
            1024,
            Arc::clone(&call_log),
        )
        .unwrap();
        assert!(result.is_success());
        assert_eq!(result.output, Some(serde_json::json!("R")));
        let log = call_log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].tool_name, "search");
    }
}
