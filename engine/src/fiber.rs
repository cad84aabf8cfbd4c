//! Lazy tool-future/batch layer, sitting above the in-process strategy.
//!
//! rhai has no first-class stackful coroutine; a guest fiber is modeled as a
//! dedicated OS thread exchanging `BatchYield`/resume messages with the
//! orchestrator over bounded channels, per the design note that languages
//! without stackful coroutines may simulate one this way. The isolated-worker
//! and container strategies bypass this layer entirely.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crucible_core::EngineError;
use serde_json::Value;

use crate::tool::{Tool, ToolOutcome};

thread_local! {
    static CURRENT: RefCell<Option<FiberContext>> = const { RefCell::new(None) };
}

/// The fiber context installed on the calling thread, if any.
///
/// `register_tool_fn` (in [`crate::sandbox`]) checks this before dispatching
/// a guest tool call: present and in-fiber means the call is deferred into a
/// batch via [`FiberContext::call_tool`]; absent means it runs eagerly on the
/// calling thread, as every non-fiber strategy already does.
#[must_use]
pub fn current() -> Option<FiberContext> {
    CURRENT.with(|cell| cell.borrow().clone())
}

fn install(ctx: FiberContext) {
    CURRENT.with(|cell| *cell.borrow_mut() = Some(ctx));
}

fn uninstall() {
    CURRENT.with(|cell| *cell.borrow_mut() = None);
}

/// Tool-name substrings that mark a yield as retrieval-flavored.
pub const RETRIEVAL_SUBSTRINGS: &[&str] = &["search", "wikipedia", "fetch", "web", "http", "query"];

/// Prefix marking a tool call as delegating to a subagent.
pub const SUBAGENT_PREFIX: &str = "subagent_";

struct ToolThunk {
    tool: Arc<dyn Tool>,
    args: Value,
    kwargs: Value,
}

/// A pending tool invocation: recorded when the guest calls a tool inside a
/// fiber, resolved the first time anything observes it.
pub struct PendingFuture {
    pub tool_name: String,
    pub arguments: Value,
    thunk: Mutex<Option<ToolThunk>>,
    outcome: Mutex<Option<Result<ToolOutcome, EngineError>>>,
}

impl PendingFuture {
    fn new(tool_name: String, arguments: Value, tool: Arc<dyn Tool>, args: Value, kwargs: Value) -> Arc<Self> {
        Arc::new(Self {
            tool_name,
            arguments,
            thunk: Mutex::new(Some(ToolThunk { tool, args, kwargs })),
            outcome: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.outcome.lock().expect("pending-future mutex poisoned").is_some()
    }

    /// Run the thunk if it hasn't run yet, recording the outcome and the
    /// elapsed duration. Idempotent: a future is never re-invoked once resolved.
    fn run(&self) -> Duration {
        let taken = self.thunk.lock().expect("pending-future mutex poisoned").take();
        let Some(thunk) = taken else {
            return Duration::ZERO;
        };
        let start = Instant::now();
        let result = thunk.tool.call(thunk.args, thunk.kwargs);
        let elapsed = start.elapsed();
        *self.outcome.lock().expect("pending-future mutex poisoned") = Some(result);
        elapsed
    }

    /// Block until resolved and return a clone of the outcome.
    ///
    /// Outside a fiber this runs the thunk synchronously on the calling
    /// thread; inside a fiber, resolution only happens once the orchestrator
    /// has executed the batch this future belongs to (see [`FiberContext::call_tool`]).
    fn outcome(&self) -> Result<ToolOutcome, EngineError> {
        if !self.is_resolved() {
            self.run();
        }
        self.outcome
            .lock()
            .expect("pending-future mutex poisoned")
            .clone()
            .expect("run() always populates outcome")
    }
}

/// Messages a fiber thread sends to the orchestrator.
pub enum FiberEvent {
    /// The guest observed a future; here is every future still unresolved at
    /// that moment, in insertion order.
    BatchYield(Vec<Arc<PendingFuture>>),
    /// The guest finished evaluating; any trailing pending futures were
    /// already flushed via a prior `BatchYield`.
    Completed(Result<Value, EngineError>),
}

/// Per-fiber execution context, held by the guest-side closure.
#[derive(Clone)]
pub struct FiberContext {
    pending: Arc<Mutex<Vec<Arc<PendingFuture>>>>,
    to_orchestrator: Sender<FiberEvent>,
    from_orchestrator: Arc<Mutex<Receiver<()>>>,
    in_fiber: Arc<AtomicBool>,
}

impl FiberContext {
    /// Whether a tool call made right now would be deferred into a future
    /// (true) or invoked eagerly (false). Mirrors the spec's thread-local
    /// `in_code_fiber` flag.
    #[must_use]
    pub fn in_fiber(&self) -> bool {
        self.in_fiber.load(Ordering::Relaxed)
    }

    /// Call `tool`, deferring it into the pending batch and suspending the
    /// fiber to let the orchestrator resolve the whole batch.
    pub fn call_tool(
        &self,
        tool_name: impl Into<String>,
        tool: Arc<dyn Tool>,
        args: Value,
        kwargs: Value,
    ) -> Result<ToolOutcome, EngineError> {
        let tool_name = tool_name.into();
        let future = PendingFuture::new(tool_name, args.clone(), tool, args, kwargs);
        self.pending.lock().expect("pending mutex poisoned").push(Arc::clone(&future));
        self.ensure_resolved(&future)
    }

    fn ensure_resolved(&self, future: &Arc<PendingFuture>) -> Result<ToolOutcome, EngineError> {
        if future.is_resolved() {
            return future.outcome();
        }
        let batch = {
            let mut pending = self.pending.lock().expect("pending mutex poisoned");
            std::mem::take(&mut *pending)
        };
        self.yield_batch(batch);
        future.outcome()
    }

    fn yield_batch(&self, batch: Vec<Arc<PendingFuture>>) {
        let _ = self.to_orchestrator.send(FiberEvent::BatchYield(batch));
        let _ = self
            .from_orchestrator
            .lock()
            .expect("resume channel mutex poisoned")
            .recv();
    }

    fn flush_trailing(&self) {
        let batch = {
            let mut pending = self.pending.lock().expect("pending mutex poisoned");
            std::mem::take(&mut *pending)
        };
        if !batch.is_empty() {
            self.yield_batch(batch);
        }
    }
}

/// A running or finished guest fiber, observed from the orchestrator side.
pub struct Fiber {
    events: Receiver<FiberEvent>,
    resume: Sender<()>,
    join: Option<std::thread::JoinHandle<()>>,
}

/// What the orchestrator sees after stepping a fiber.
pub enum StepOutcome {
    Yielded(Vec<Arc<PendingFuture>>),
    Completed(Result<Value, EngineError>),
}

impl Fiber {
    /// Start a guest closure on a dedicated thread. `guest` receives a
    /// [`FiberContext`] to route tool calls through; its return value becomes
    /// the fiber's completion value.
    pub fn spawn<F>(guest: F) -> Self
    where
        F: FnOnce(&FiberContext) -> Result<Value, EngineError> + Send + 'static,
    {
        let (to_orchestrator, events) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel();
        let ctx = FiberContext {
            pending: Arc::new(Mutex::new(Vec::new())),
            to_orchestrator: to_orchestrator.clone(),
            from_orchestrator: Arc::new(Mutex::new(resume_rx)),
            in_fiber: Arc::new(AtomicBool::new(true)),
        };
        let join = std::thread::spawn(move || {
            install(ctx.clone());
            let result = guest(&ctx);
            ctx.flush_trailing();
            uninstall();
            let _ = to_orchestrator.send(FiberEvent::Completed(result));
        });
        Self {
            events,
            resume: resume_tx,
            join: Some(join),
        }
    }

    /// Block for the fiber's next event.
    pub fn step(&mut self) -> StepOutcome {
        match self.events.recv() {
            Ok(FiberEvent::BatchYield(batch)) => StepOutcome::Yielded(batch),
            Ok(FiberEvent::Completed(result)) => StepOutcome::Completed(result),
            Err(_) => StepOutcome::Completed(Err(EngineError::unknown("fiber thread ended without a result"))),
        }
    }

    /// Resolve every future in `batch` (sequentially; thunks are free to run
    /// concurrently with each other since they share no mutable state), then
    /// let the fiber continue.
    pub fn resolve_and_resume(&self, batch: &[Arc<PendingFuture>]) {
        for future in batch {
            future.run();
        }
        let _ = self.resume.send(());
    }

    /// Drive the fiber to completion, resolving every yielded batch as it arrives.
    pub fn run_to_completion(mut self) -> Result<Value, EngineError> {
        loop {
            match self.step() {
                StepOutcome::Yielded(batch) => self.resolve_and_resume(&batch),
                StepOutcome::Completed(result) => {
                    if let Some(join) = self.join.take() {
                        let _ = join.join();
                    }
                    return result;
                }
            }
        }
    }
}

/// Whether any tool name in `batch` looks like a retrieval call.
#[must_use]
pub fn is_retrieval_yield(batch: &[Arc<PendingFuture>]) -> bool {
    batch.iter().any(|f| {
        let lower = f.tool_name.to_ascii_lowercase();
        RETRIEVAL_SUBSTRINGS.iter().any(|s| lower.contains(s))
    })
}

/// Whether `batch` includes a call to the designated final-answer tool.
#[must_use]
pub fn is_final_answer_yield(batch: &[Arc<PendingFuture>], final_answer_tool: &str) -> bool {
    batch.iter().any(|f| f.tool_name == final_answer_tool)
}

/// Whether `batch` includes a call delegating to a subagent.
#[must_use]
pub fn is_subagent_yield(batch: &[Arc<PendingFuture>]) -> bool {
    batch.iter().any(|f| f.tool_name.starts_with(SUBAGENT_PREFIX))
}
