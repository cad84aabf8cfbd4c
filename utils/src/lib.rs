//! Shared infrastructure utilities for the crucible engine.
//!
//! This crate provides cross-cutting utilities that multiple crucible crates
//! need but that don't belong in the domain-pure `crucible-types` crate:
//!
//! - **`security`**: Secret redaction and sanitization for text crossing out
//!   of the sandbox (guest stdout, interpreter error messages).

pub mod security;

pub use security::{sanitize_display_text, sanitize_stream_error};
