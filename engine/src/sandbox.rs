//! Sandbox surface: a closed evaluation context for host-language guest code.
//!
//! Only the methods explicitly granted below are callable. Everything else —
//! a registered tool, a registered variable, a fixed identity-hiding answer,
//! or a name-resolution error — is resolved through registration into the
//! guest engine rather than through a runtime `method_missing` hook, since
//! the host language here (rhai) has no such hook: an unregistered call
//! simply fails to resolve, which rhai reports as "function not found" and
//! this module reinterprets as the spec's name-resolution error.
//!
//! Precedence, enforced by registration order: tool names are bound first,
//! then variables, so a tool and a variable can never collide (attempting to
//! register both under the same name is a caller bug, not adjudicated here).

use std::sync::{Arc, Mutex};
use std::time::Instant;

use crucible_core::EngineError;
use crucible_types::ToolCallRecord;
use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use serde_json::Value;

use crate::fiber;
use crate::limiter::OperationLimiter;
use crate::tool::{Tool, ToolOutcome, ToolRegistry, VariableRegistry};

/// Shared sink for [`ToolCallRecord`]s, one execution's worth at a time.
pub type CallLog = Arc<Mutex<Vec<ToolCallRecord>>>;

const FINAL_ANSWER_TAG: &str = "__crucible_final_answer__";

/// Bound on a recorded tool failure's message, so one verbose tool can't blow
/// up an execution's call log; the guest-visible error is not bounded by this.
const TOOL_ERROR_PREVIEW_CHARS: usize = 500;

/// Guest-visible object identity the sandbox reports for `class`, hiding the
/// fact that guest code runs inside an embedded scripting engine at all.
const GENERIC_CLASS_NAME: &str = "Object";

/// Per-execution evaluation context. Discarded at execution end; nothing here
/// outlives one `eval` call.
pub struct Sandbox {
    engine: Engine,
    scope: Scope<'static>,
    output: Arc<Mutex<Vec<u8>>>,
}

/// Outcome of a single sandboxed evaluation.
pub enum SandboxOutcome {
    Value(Value),
    FinalAnswer(Value),
    Error(EngineError),
}

impl Sandbox {
    /// Build a tool-capable sandbox: tools and variables are both callable.
    /// Every tool invocation is appended to `call_log` in insertion order.
    #[must_use]
    pub fn tool_capable(
        tools: &ToolRegistry,
        variables: &VariableRegistry,
        limiter: OperationLimiter,
        call_log: CallLog,
    ) -> Self {
        Self::build(Some((tools, call_log)), variables, limiter)
    }

    /// Build a code-only sandbox: variables are callable, the tool table is empty.
    #[must_use]
    pub fn code_only(variables: &VariableRegistry, limiter: OperationLimiter) -> Self {
        Self::build(None, variables, limiter)
    }

    fn build(tools: Option<(&ToolRegistry, CallLog)>, variables: &VariableRegistry, limiter: OperationLimiter) -> Self {
        let mut engine = Engine::new();
        let output: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));

        install_progress_limiter(&mut engine, limiter);
        install_output_capture(&mut engine, Arc::clone(&output));
        install_identity_hiding(&mut engine);
        install_final_answer(&mut engine);
        install_bounded_random(&mut engine);

        if let Some((tools, call_log)) = tools {
            install_tools(&mut engine, tools, call_log);
        }

        let mut scope = Scope::new();
        for (name, value) in variables.iter() {
            scope.push_constant_dynamic(name.clone(), json_to_dynamic(value));
        }

        Self {
            engine,
            scope,
            output,
        }
    }

    /// Evaluate `code` to completion, returning its outcome.
    pub fn eval(&mut self, code: &str) -> SandboxOutcome {
        match self.engine.eval_with_scope::<Dynamic>(&mut self.scope, code) {
            Ok(v) => SandboxOutcome::Value(dynamic_to_json(&v)),
            Err(err) => classify_error(*err),
        }
    }

    #[must_use]
    pub fn take_output(&self) -> Vec<u8> {
        self.output.lock().expect("output mutex poisoned").clone()
    }
}

fn classify_error(err: EvalAltResult) -> SandboxOutcome {
    if let EvalAltResult::ErrorRuntime(value, _) = &err {
        if let Some(map) = value.read_lock::<rhai::Map>() {
            if map.contains_key(FINAL_ANSWER_TAG) {
                let inner = map.get(FINAL_ANSWER_TAG).cloned().unwrap_or(Dynamic::UNIT);
                return SandboxOutcome::FinalAnswer(dynamic_to_json(&inner));
            }
        }
    }
    SandboxOutcome::Error(EngineError::interpreter_error(format!(
        "InterpreterError: {err}"
    )))
}

fn install_progress_limiter(engine: &mut Engine, limiter: OperationLimiter) {
    engine.on_progress(move |_ops| {
        if limiter.tick() {
            None
        } else {
            Some(Dynamic::from(limiter.exceeded_message()))
        }
    });
}

fn install_output_capture(engine: &mut Engine, output: Arc<Mutex<Vec<u8>>>) {
    let puts_sink = Arc::clone(&output);
    engine.register_fn("puts", move |s: &str| {
        let mut buf = puts_sink.lock().expect("output mutex poisoned");
        buf.extend_from_slice(s.as_bytes());
        buf.push(b'\n');
    });

    let print_sink = Arc::clone(&output);
    engine.register_fn("print", move |s: &str| {
        print_sink
            .lock()
            .expect("output mutex poisoned")
            .extend_from_slice(s.as_bytes());
    });

    let inspect_sink = Arc::clone(&output);
    engine.register_fn("p", move |v: Dynamic| -> Dynamic {
        let rendered = format!("{v:?}");
        let mut buf = inspect_sink.lock().expect("output mutex poisoned");
        buf.extend_from_slice(rendered.as_bytes());
        buf.push(b'\n');
        v
    });
}

fn install_identity_hiding(engine: &mut Engine) {
    engine.register_fn("class", |_v: Dynamic| GENERIC_CLASS_NAME.to_string());
    engine.register_fn("is_nil", |v: Dynamic| v.is_unit());
    for predicate in ["is_a", "is_kind_of", "is_instance_of"] {
        engine.register_fn(predicate, |_v: Dynamic, _name: &str| false);
    }
}

fn install_final_answer(engine: &mut Engine) {
    engine.register_fn("final_answer", |v: Dynamic| -> Result<Dynamic, Box<EvalAltResult>> {
        let mut map = rhai::Map::new();
        map.insert(FINAL_ANSWER_TAG.into(), v);
        Err(Box::new(EvalAltResult::ErrorRuntime(
            Dynamic::from_map(map),
            rhai::Position::NONE,
        )))
    });
}

fn install_bounded_random(engine: &mut Engine) {
    engine.register_fn("rand_below", |bound: i64| -> i64 {
        if bound <= 0 {
            return 0;
        }
        (rand::random::<u64>() % bound as u64) as i64
    });
}

fn install_tools(engine: &mut Engine, tools: &ToolRegistry, call_log: CallLog) {
    for name in tools.names() {
        let Some(tool) = tools.get(&name) else {
            continue;
        };
        register_tool_fn(engine, name, tool, Arc::clone(&call_log));
    }
}

/// Dispatch one guest tool call to `tool`, honoring the spec's fiber
/// protocol: inside a fiber (`fiber::current()` installed), the call is
/// deferred into the fiber's pending batch and the guest thread suspends
/// until the orchestrator resolves that batch; everywhere else — in-process
/// and isolated-worker evaluation both run outside any fiber — it runs
/// eagerly on the calling thread, as it always has.
fn dispatch_tool_call(name: &str, tool: &Arc<dyn Tool>, args: Value, kwargs: Value) -> Result<ToolOutcome, EngineError> {
    match fiber::current() {
        Some(ctx) if ctx.in_fiber() => ctx.call_tool(name.to_string(), Arc::clone(tool), args, kwargs),
        _ => tool.call(args, kwargs),
    }
}

fn register_tool_fn(engine: &mut Engine, name: String, tool: Arc<dyn Tool>, call_log: CallLog) {
    engine.register_fn(
        name.clone().as_str(),
        move |args: rhai::Array, kwargs: rhai::Map| -> Result<Dynamic, Box<EvalAltResult>> {
            let args_json = Value::Array(args.iter().map(dynamic_to_json).collect());
            let kwargs_json = Value::Object(
                kwargs
                    .iter()
                    .map(|(k, v)| (k.to_string(), dynamic_to_json(v)))
                    .collect(),
            );
            let started = Instant::now();
            let outcome = dispatch_tool_call(&name, &tool, args_json.clone(), kwargs_json.clone());
            let elapsed = started.elapsed();
            let mut log = call_log.lock().expect("call log mutex poisoned");
            match outcome {
                Ok(ToolOutcome::Value(result)) => {
                    log.push(ToolCallRecord::success(name.clone(), args_json, result.clone(), elapsed));
                    drop(log);
                    Ok(json_to_dynamic(&result))
                }
                Ok(ToolOutcome::FinalAnswer(result)) => {
                    log.push(ToolCallRecord::success(name.clone(), args_json, result.clone(), elapsed));
                    drop(log);
                    let mut map = rhai::Map::new();
                    map.insert(FINAL_ANSWER_TAG.into(), json_to_dynamic(&result));
                    Err(Box::new(EvalAltResult::ErrorRuntime(
                        Dynamic::from_map(map),
                        rhai::Position::NONE,
                    )))
                }
                Err(e) => {
                    // A tool's error can echo back a remote API's own raw
                    // response text, which may embed a host credential the
                    // tool itself had to hold.
                    let sanitized = crucible_utils::sanitize_display_text(&e.message);
                    let preview = crucible_types::truncate_with_ellipsis(&sanitized, TOOL_ERROR_PREVIEW_CHARS);
                    log.push(ToolCallRecord::failure(name.clone(), args_json, preview, elapsed));
                    drop(log);
                    Err(format!("InterpreterError: {sanitized}").into())
                }
            }
        },
    );
}

fn json_to_dynamic(value: &Value) -> Dynamic {
    rhai::serde::to_dynamic(value).unwrap_or(Dynamic::UNIT)
}

fn dynamic_to_json(value: &Dynamic) -> Value {
    rhai::serde::from_dynamic(value).unwrap_or(Value::String(value.to_string()))
}
