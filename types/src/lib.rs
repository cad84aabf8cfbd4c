//! Core domain types for the crucible sandboxed code-execution engine.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies. Everything here can be used from any layer of the engine.

mod sanitize;
mod stego;
mod text;

pub use sanitize::sanitize_terminal_text;
pub use stego::strip_steganographic_chars;
pub use text::{truncate_to_fit, truncate_with_ellipsis};

/// Glob patterns (case-insensitive) matching environment variable names that
/// are likely to hold credentials, used to seed dynamic secret redaction.
pub const ENV_CREDENTIAL_PATTERNS: &[&str] = &[
    "*_KEY", "*_SECRET", "*_TOKEN", "*_PASSWORD", "*_CREDENTIAL*", "*_AUTH",
];

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Languages the engine can execute.
///
/// `Rhai` is the embedded host language: the in-process and isolated-worker
/// strategies evaluate it directly inside this process. The others are only
/// ever run through the container strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Rhai,
    Python,
    JavaScript,
    TypeScript,
}

impl Language {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Rhai => "rhai",
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
        }
    }

    /// Whether this is the host language evaluated in-process.
    #[must_use]
    pub fn is_host(self) -> bool {
        matches!(self, Language::Rhai)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which trace event the operation limiter counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceMode {
    /// Count guest source lines executed.
    Line,
    /// Count guest function/operation calls executed.
    Call,
}

impl Default for TraceMode {
    fn default() -> Self {
        TraceMode::Call
    }
}

/// Immutable outcome of a single `execute` invocation.
///
/// Invariant: `is_success() == error.is_none()`; `is_final_answer` implies
/// success. `logs` truncation to the configured maximum is enforced by the
/// producing executor via [`ExecutionResult::truncate_logs`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub output: Option<Value>,
    #[serde(with = "logs_as_string")]
    pub logs: Vec<u8>,
    pub error: Option<String>,
    pub is_final_answer: bool,
}

/// `logs` is conceptually a byte string but round-trips through JSON as text;
/// invalid UTF-8 is replaced rather than rejected since logs are best-effort
/// diagnostics, never a correctness-bearing channel.
mod logs_as_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&String::from_utf8_lossy(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        Ok(String::deserialize(de)?.into_bytes())
    }
}

impl ExecutionResult {
    #[must_use]
    pub fn success(output: Option<Value>, logs: Vec<u8>) -> Self {
        Self {
            output,
            logs,
            error: None,
            is_final_answer: false,
        }
    }

    #[must_use]
    pub fn final_answer(output: Option<Value>, logs: Vec<u8>) -> Self {
        Self {
            output,
            logs,
            error: None,
            is_final_answer: true,
        }
    }

    #[must_use]
    pub fn failure(error: impl Into<String>, logs: Vec<u8>) -> Self {
        Self {
            output: None,
            logs,
            error: Some(error.into()),
            is_final_answer: false,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Truncate `logs` to at most `max_bytes`, splitting on a char boundary.
    pub fn truncate_logs(&mut self, max_bytes: usize) {
        if self.logs.len() <= max_bytes {
            return;
        }
        let mut end = max_bytes;
        while end > 0 && !is_utf8_boundary(&self.logs, end) {
            end -= 1;
        }
        self.logs.truncate(end);
    }
}

fn is_utf8_boundary(bytes: &[u8], index: usize) -> bool {
    index == bytes.len() || (bytes[index] & 0xC0) != 0x80
}

/// State-machine view over an [`ExecutionResult`] plus timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Success,
    FinalAnswer,
    Error,
}

impl ExecutionState {
    #[must_use]
    pub fn derive(result: &ExecutionResult) -> Self {
        if result.error.is_some() {
            ExecutionState::Error
        } else if result.is_final_answer {
            ExecutionState::FinalAnswer
        } else {
            ExecutionState::Success
        }
    }
}

/// [`ExecutionResult`] plus derived state and wall-clock duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub result: ExecutionResult,
    pub state: ExecutionState,
    pub duration: Duration,
}

impl ExecutionOutcome {
    #[must_use]
    pub fn new(result: ExecutionResult, duration: Duration) -> Self {
        let state = ExecutionState::derive(&result);
        Self {
            result,
            state,
            duration,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(
            self.state,
            ExecutionState::Success | ExecutionState::FinalAnswer
        )
    }
}

/// Result of static validation: `valid` iff `errors` is empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    #[must_use]
    pub fn ok() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn push_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Join all errors with `; `, matching `validate!`'s raised message shape.
    #[must_use]
    pub fn joined_errors(&self) -> String {
        self.errors.join("; ")
    }
}

/// One recorded tool invocation within a single execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub arguments: Value,
    pub result: Option<Value>,
    pub duration: Duration,
    pub error: Option<String>,
}

impl ToolCallRecord {
    #[must_use]
    pub fn success(
        tool_name: impl Into<String>,
        arguments: Value,
        result: Value,
        duration: Duration,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            result: Some(result),
            duration,
            error: None,
        }
    }

    #[must_use]
    pub fn failure(
        tool_name: impl Into<String>,
        arguments: Value,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            result: None,
            duration,
            error: Some(error.into()),
        }
    }
}

/// Container image and interpreter command prefix for one language.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerDescriptor {
    pub image: String,
    pub command_prefix: Vec<String>,
}

impl ContainerDescriptor {
    #[must_use]
    pub fn new(image: impl Into<String>, command_prefix: Vec<String>) -> Self {
        Self {
            image: image.into(),
            command_prefix,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_result_success_has_no_error() {
        let r = ExecutionResult::success(Some(Value::from(6)), Vec::new());
        assert!(r.is_success());
        assert!(r.error.is_none());
    }

    #[test]
    fn execution_result_failure_has_no_output() {
        let r = ExecutionResult::failure("boom", Vec::new());
        assert!(!r.is_success());
        assert!(r.output.is_none());
    }

    #[test]
    fn execution_state_derives_error() {
        let r = ExecutionResult::failure("boom", Vec::new());
        assert_eq!(ExecutionState::derive(&r), ExecutionState::Error);
    }

    #[test]
    fn execution_state_derives_final_answer() {
        let r = ExecutionResult::final_answer(Some(Value::from(1)), Vec::new());
        assert_eq!(ExecutionState::derive(&r), ExecutionState::FinalAnswer);
    }

    #[test]
    fn truncate_logs_respects_byte_boundary() {
        let mut r = ExecutionResult::success(None, "héllo".as_bytes().to_vec());
        r.truncate_logs(2);
        assert!(r.logs.len() <= 2);
        assert!(std::str::from_utf8(&r.logs).is_ok());
    }

    #[test]
    fn truncate_logs_noop_when_under_limit() {
        let mut r = ExecutionResult::success(None, b"ok".to_vec());
        r.truncate_logs(100);
        assert_eq!(r.logs, b"ok");
    }

    #[test]
    fn validation_result_valid_iff_no_errors() {
        let mut v = ValidationResult::ok();
        assert!(v.is_valid());
        v.push_error("Dangerous method call: system");
        assert!(!v.is_valid());
        assert_eq!(v.joined_errors(), "Dangerous method call: system");
    }

    #[test]
    fn language_host_is_only_rhai() {
        assert!(Language::Rhai.is_host());
        assert!(!Language::Python.is_host());
    }
}
