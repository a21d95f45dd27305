//! Error handling utilities for the Lyra compiler

use crate::span::Position;
use thiserror::Error;

/// The main error type for the Lyra compiler.
///
/// The first four variants carry the source position at the throw site; the
/// driver turns them into a single `file:line:offset` report line. Backend
/// errors have no source position because they arise from the IR, not from
/// source text.
#[derive(Error, Debug, Clone)]
pub enum LyraError {
    #[error("syntax error: {message}")]
    Syntax { message: String, pos: Position },

    #[error("error: {message}")]
    Semantic { message: String, pos: Position },

    #[error("linkage error: {message}")]
    Linkage { message: String, pos: Position },

    #[error("internal error: {message}")]
    Internal { message: String, pos: Position },

    #[error("backend error: {message}")]
    Backend { message: String },

    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for Lyra compiler operations
pub type LyraResult<T> = Result<T, LyraError>;

impl LyraError {
    pub fn syntax(message: impl Into<String>, pos: Position) -> Self {
        Self::Syntax { message: message.into(), pos }
    }

    pub fn semantic(message: impl Into<String>, pos: Position) -> Self {
        Self::Semantic { message: message.into(), pos }
    }

    pub fn linkage(message: impl Into<String>, pos: Position) -> Self {
        Self::Linkage { message: message.into(), pos }
    }

    pub fn internal(message: impl Into<String>, pos: Position) -> Self {
        Self::Internal { message: message.into(), pos }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend { message: message.into() }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io { message: message.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Source position of the error, when it has one.
    pub fn pos(&self) -> Option<Position> {
        match self {
            Self::Syntax { pos, .. }
            | Self::Semantic { pos, .. }
            | Self::Linkage { pos, .. }
            | Self::Internal { pos, .. } => Some(*pos),
            _ => None,
        }
    }
}
