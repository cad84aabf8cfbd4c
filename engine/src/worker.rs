//! Isolated-worker strategy: evaluate guest code on a dedicated thread with
//! no shared mutable state, servicing tool calls from the host by message
//! passing only.
//!
//! Rust's ownership model already gives the "no shared mutable state"
//! guarantee a forked process or language-level Ractor would provide: moving
//! owned, `Send` data into `std::thread::spawn` statically rules out data
//! races with the host, so a real OS process or actor runtime buys nothing
//! extra here.

use std::collections::HashMap;
use std::sync::mpsc;

use crucible_core::EngineError;
use crucible_types::{ExecutionResult, Language};
use serde_json::Value;

use crate::limiter::OperationLimiter;
use crate::sandbox::{CallLog, Sandbox, SandboxOutcome};
use crate::serializer;
use crate::tool::{Tool, ToolOutcome, ToolRegistry, VariableRegistry};
use crate::validator;

/// Bounds pathological tool loops between the worker and the host.
pub const MAX_MESSAGE_ITERATIONS: u32 = 10_000;

enum WorkerToHost {
    ToolCall {
        name: String,
        args: Value,
        kwargs: Value,
        reply_to: mpsc::Sender<HostToWorker>,
    },
    Final { result: ExecutionResult },
}

enum HostToWorker {
    Result(Value),
    FinalAnswer(Value),
    /// Shaped by [`serializer::prepare_exception`]: `{class, message, backtrace}`.
    Error(Value),
}

/// A tool proxy installed inside the worker that routes every call back to
/// the host over `to_host`, then blocks for the reply.
struct RemoteTool {
    name: String,
    to_host: mpsc::Sender<WorkerToHost>,
}

impl Tool for RemoteTool {
    fn call(&self, args: Value, kwargs: Value) -> Result<ToolOutcome, EngineError> {
        let (reply_to, reply_rx) = mpsc::channel();
        self.to_host
            .send(WorkerToHost::ToolCall {
                name: self.name.clone(),
                args,
                kwargs,
                reply_to,
            })
            .map_err(|_| EngineError::unknown("host channel closed"))?;
        match reply_rx.recv() {
            Ok(HostToWorker::Result(v)) => Ok(ToolOutcome::Value(v)),
            Ok(HostToWorker::FinalAnswer(v)) => Ok(ToolOutcome::FinalAnswer(v)),
            Ok(HostToWorker::Error(exception)) => {
                let message = exception
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("tool error")
                    .to_string();
                Err(EngineError::interpreter_error(message))
            }
            Err(_) => Err(EngineError::unknown("host channel closed before reply")),
        }
    }
}

pub struct IsolatedWorkerExecutor;

impl IsolatedWorkerExecutor {
    #[must_use]
    pub fn supports(language: Language) -> bool {
        language.is_host()
    }

    /// Run `code` on a dedicated worker thread. Tool calls observed by the
    /// guest — each a full round trip through the host's real registry — are
    /// appended to `call_log` in insertion order.
    pub fn execute(
        code: &str,
        language: Language,
        tools: &ToolRegistry,
        variables: &VariableRegistry,
        max_operations: u64,
        max_output_length: usize,
        call_log: CallLog,
    ) -> Result<ExecutionResult, EngineError> {
        if code.trim().is_empty() {
            return Err(EngineError::invalid_argument("code must not be empty"));
        }
        if !Self::supports(language) {
            return Err(EngineError::invalid_argument(format!(
                "isolated-worker executor does not support language: {language}"
            )));
        }

        let validation = validator::validate(code, language);
        if !validation.is_valid() {
            return Ok(ExecutionResult::failure(validation.joined_errors(), Vec::new()));
        }

        let prepared_variables: HashMap<String, Value> = variables
            .iter()
            .map(|(k, v)| (k.clone(), serializer::prepare(v, 0)))
            .collect();
        let tool_name_list = tools.names();

        let (to_host, from_worker) = mpsc::channel::<WorkerToHost>();
        let worker_code = code.to_string();
        let worker_names = tool_name_list.clone();
        let worker_to_host = to_host.clone();

        let handle = std::thread::spawn(move || {
            run_worker(
                worker_code,
                max_operations,
                worker_names,
                prepared_variables,
                worker_to_host,
                call_log,
            );
        });
        drop(to_host);

        let mut result = host_loop(&from_worker, tools);
        result.truncate_logs(max_output_length);
        let _ = handle.join();
        Ok(result)
    }
}

fn run_worker(
    code: String,
    max_operations: u64,
    tool_name_list: Vec<String>,
    prepared_variables: HashMap<String, Value>,
    to_host: mpsc::Sender<WorkerToHost>,
    call_log: CallLog,
) {
    let mut variables = VariableRegistry::new();
    for (k, v) in prepared_variables {
        variables.set(k, v);
    }

    let mut worker_tools = ToolRegistry::new();
    for name in &tool_name_list {
        let remote = RemoteTool {
            name: name.clone(),
            to_host: to_host.clone(),
        };
        // Dangerous-name collisions were already rejected at host registration
        // time; re-checking here would only duplicate that guard.
        let _ = worker_tools.register(name.clone(), std::sync::Arc::new(remote));
    }

    let limiter = OperationLimiter::new(max_operations, crucible_types::TraceMode::Line);
    let mut sandbox = if tool_name_list.is_empty() {
        Sandbox::code_only(&variables, limiter.clone())
    } else {
        Sandbox::tool_capable(&worker_tools, &variables, limiter.clone(), call_log)
    };

    let outcome = sandbox.eval(&code);
    limiter.disable();
    let logs = sandbox.take_output();

    let result = match outcome {
        SandboxOutcome::Value(v) => ExecutionResult::success(Some(v), logs),
        SandboxOutcome::FinalAnswer(v) => ExecutionResult::final_answer(Some(v), logs),
        SandboxOutcome::Error(e) => ExecutionResult::failure(e.message, logs),
    };
    let _ = to_host.send(WorkerToHost::Final { result });
}

fn host_loop(from_worker: &mpsc::Receiver<WorkerToHost>, tools: &ToolRegistry) -> ExecutionResult {
    for _ in 0..MAX_MESSAGE_ITERATIONS {
        let Ok(message) = from_worker.recv() else {
            return ExecutionResult::failure("worker channel closed unexpectedly", Vec::new());
        };
        match message {
            WorkerToHost::Final { result } => return result,
            WorkerToHost::ToolCall { name, args, kwargs, reply_to } => {
                let reply = match tools.get(&name) {
                    None => HostToWorker::Error(serializer::prepare_exception(
                        "UnknownTool",
                        &format!("Unknown tool: {name}"),
                        &[],
                    )),
                    Some(tool) => match tool.call(args, kwargs) {
                        Ok(ToolOutcome::Value(v)) => HostToWorker::Result(serializer::prepare(&v, 0)),
                        Ok(ToolOutcome::FinalAnswer(v)) => {
                            HostToWorker::FinalAnswer(serializer::prepare(&v, 0))
                        }
                        Err(e) => HostToWorker::Error(serializer::prepare_exception(
                            &e.kind.to_string(),
                            &e.message,
                            &[],
                        )),
                    },
                };
                let _ = reply_to.send(reply);
            }
        }
    }
    ExecutionResult::failure("Message processing limit exceeded", Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn empty_log() -> CallLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn empty_code_is_invalid_argument() {
        let tools = ToolRegistry::new();
        let vars = VariableRegistry::new();
        let err =
            IsolatedWorkerExecutor::execute("", Language::Rhai, &tools, &vars, 1000, 1024, empty_log())
                .unwrap_err();
        assert!(err.propagates());
    }

    #[test]
    fn code_only_evaluation_succeeds() {
        let tools = ToolRegistry::new();
        let vars = VariableRegistry::new();
        let result = IsolatedWorkerExecutor::execute(
            "6 * 7",
            Language::Rhai,
            &tools,
            &vars,
            1000,
            1024,
            empty_log(),
        )
        .unwrap();
        assert!(result.is_success());
        assert_eq!(result.output, Some(serde_json::json!(42)));
    }

    #[test]
    fn tool_call_round_trips_through_host() {
        let mut tools = ToolRegistry::new();
        tools
            .register(
                "double",
                std::sync::Arc::new(|args: Value, _kwargs: Value| {
                    let n = args.get(0).and_then(Value::as_i64).unwrap_or(0);
                    Ok(ToolOutcome::Value(Value::from(n * 2)))
                }),
            )
            .unwrap();
        let vars = VariableRegistry::new();
        let call_log = empty_log();
        let result = IsolatedWorkerExecutor::execute(
            "double([21], #{})",
            Language::Rhai,
            &tools,
            &vars,
            1000,
            1024,
            Arc::clone(&call_log),
        )
        .unwrap();
        assert!(result.is_success());
        assert_eq!(result.output, Some(serde_json::json!(42)));
        let log = call_log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].tool_name, "double");
        assert!(log[0].error.is_none());
    }

    #[test]
    fn failing_tool_error_crosses_the_boundary_via_prepare_exception() {
        let mut tools = ToolRegistry::new();
        tools
            .register(
                "boom",
                std::sync::Arc::new(|_args: Value, _kwargs: Value| {
                    Err(EngineError::interpreter_error("remote API rejected the request"))
                }),
            )
            .unwrap();
        let vars = VariableRegistry::new();
        let result = IsolatedWorkerExecutor::execute(
            "boom([], #{})",
            Language::Rhai,
            &tools,
            &vars,
            1000,
            1024,
            empty_log(),
        )
        .unwrap();
        assert!(!result.is_success());
        assert!(result.error.unwrap().contains("remote API rejected the request"));
    }

    #[test]
    fn missing_tool_reports_unknown_tool_error() {
        let tools = ToolRegistry::new();
        let vars = VariableRegistry::new();
        let result = IsolatedWorkerExecutor::execute(
            "ghost_tool([], #{})",
            Language::Rhai,
            &tools,
            &vars,
            1000,
            1024,
            empty_log(),
        )
        .unwrap();
        assert!(!result.is_success());
    }

    #[test]
    fn operation_limit_exceeded_in_worker() {
        let tools = ToolRegistry::new();
        let vars = VariableRegistry::new();
        let result = IsolatedWorkerExecutor::execute(
            "let n = 0; while true { n += 1; }",
            Language::Rhai,
            &tools,
            &vars,
            50,
            1024,
            empty_log(),
        )
        .unwrap();
        assert!(!result.is_success());
        assert!(result.error.unwrap().contains("Operation limit exceeded"));
    }
}
