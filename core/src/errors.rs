//! Error taxonomy for the execution engine.
//!
//! Every failure a strategy can produce maps to one of these kinds. The kind
//! decides propagation: [`EngineErrorKind::InvalidArgument`] always raises to
//! the caller, everything else is captured into an
//! [`crucible_types::ExecutionResult::failure`] by the executor façade rather
//! than bubbling up as a Rust error.

use std::fmt;

/// Classification of an engine failure, independent of which strategy raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// Caller passed a malformed request (unknown language, empty source, bad
    /// limiter config). Always propagates as an exception rather than being
    /// captured into a result.
    InvalidArgument,
    /// Static validation rejected the source before any guest code ran.
    ValidationFailure,
    /// The guest raised, panicked, or otherwise failed mid-evaluation.
    InterpreterError,
    /// The operation limit or wall-clock timeout was exceeded.
    ExecutionTimeout,
    /// A value crossing the host/guest boundary could not be serialized.
    CrossBoundary,
    /// Anything else: IO failure standing up a worker or container, etc.
    Unknown,
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineErrorKind::InvalidArgument => "invalid_argument",
            EngineErrorKind::ValidationFailure => "validation_failure",
            EngineErrorKind::InterpreterError => "interpreter_error",
            EngineErrorKind::ExecutionTimeout => "execution_timeout",
            EngineErrorKind::CrossBoundary => "cross_boundary",
            EngineErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// An engine failure: a [`EngineErrorKind`] plus a human-readable message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub message: String,
}

impl EngineError {
    #[must_use]
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::InvalidArgument, message)
    }

    #[must_use]
    pub fn validation_failure(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::ValidationFailure, message)
    }

    #[must_use]
    pub fn interpreter_error(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::InterpreterError, message)
    }

    #[must_use]
    pub fn execution_timeout(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::ExecutionTimeout, message)
    }

    #[must_use]
    pub fn cross_boundary(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::CrossBoundary, message)
    }

    #[must_use]
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Unknown, message)
    }

    /// Whether this error must propagate to the caller rather than being
    /// captured into an [`crucible_types::ExecutionResult`].
    #[must_use]
    pub fn propagates(&self) -> bool {
        matches!(self.kind, EngineErrorKind::InvalidArgument)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_argument_propagates() {
        let e = EngineError::invalid_argument("unknown language: cobol");
        assert!(e.propagates());
    }

    #[test]
    fn interpreter_error_is_captured_not_propagated() {
        let e = EngineError::interpreter_error("NameError: undefined local x");
        assert!(!e.propagates());
    }

    #[test]
    fn display_includes_kind_and_message() {
        let e = EngineError::execution_timeout("Operation limit exceeded: 5000");
        assert_eq!(
            e.to_string(),
            "execution_timeout: Operation limit exceeded: 5000"
        );
    }
}
