//! Diagnostic message handling for the Lyra compiler

use crate::span::Position;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity level for diagnostic messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

/// A diagnostic message with location and severity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub pos: Position,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, pos: Position) -> Self {
        Self { severity: Severity::Error, message: message.into(), pos }
    }

    pub fn warning(message: impl Into<String>, pos: Position) -> Self {
        Self { severity: Severity::Warning, message: message.into(), pos }
    }

    pub fn note(message: impl Into<String>, pos: Position) -> Self {
        Self { severity: Severity::Note, message: message.into(), pos }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} at {}", self.severity, self.message, self.pos)
    }
}

/// Collection of diagnostic messages
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub messages: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, diagnostic: Diagnostic) {
        self.messages.push(diagnostic);
    }

    pub fn error(&mut self, message: impl Into<String>, pos: Position) {
        self.add(Diagnostic::error(message, pos));
    }

    pub fn warning(&mut self, message: impl Into<String>, pos: Position) {
        self.add(Diagnostic::warning(message, pos));
    }

    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.messages.extend(other.messages);
    }
}
