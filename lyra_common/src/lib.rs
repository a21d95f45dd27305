//! Shared utilities for the Lyra compiler

pub mod diagnostics;
pub mod error;
pub mod span;
pub mod strfmt;

pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{LyraError, LyraResult};
pub use span::Position;
pub use strfmt::{strfmt, FmtArg};
