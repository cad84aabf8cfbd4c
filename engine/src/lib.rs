//! Validator, limiter, sandbox surface, and execution strategies for the
//! crucible sandboxed code-execution engine.
//!
//! [`facade::Executor`] is the entry point most callers want: it owns the
//! tool and variable registries and dispatches `(code, language)` to the
//! right strategy. The strategy modules (`in_process`, `worker`,
//! `container`) and the `fiber` batching layer are public so a caller that
//! needs finer control — e.g. the agent loop driving the lazy tool-future
//! protocol directly — can reach them without going through the façade.

pub mod container;
pub mod facade;
pub mod fiber;
pub mod in_process;
pub mod limiter;
pub mod process;
pub mod sandbox;
pub mod serializer;
pub mod tool;
pub mod validator;
pub mod worker;

pub use crucible_core::EngineError;
pub use facade::{ExecuteOptions, Executor, Strategy};
pub use sandbox::{CallLog, Sandbox, SandboxOutcome};
pub use tool::{Tool, ToolOutcome, ToolRegistry, VariableRegistry};
