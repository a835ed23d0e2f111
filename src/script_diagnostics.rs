//! Structured diagnostics for script loading.
//!
//! The text codec is permissive: a line it cannot understand is dropped
//! rather than failing the whole load. Every dropped line is reported here in
//! a stable, JSON-serializable form so the UI (or the `check` command) can
//! show what was lost.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The line matched no command pattern.
    UnknownCommand,
    /// Known command name, but arguments of the wrong arity or kind.
    BadArguments,
    /// A `} N Times;` line with no open loop.
    UnmatchedLoopClose,
    /// A `LOOP REPEAT {` line whose block never closed.
    UnterminatedLoop,
}

impl SkipReason {
    pub fn describe(&self) -> &'static str {
        match self {
            SkipReason::UnknownCommand => "unknown command",
            SkipReason::BadArguments => "bad arguments",
            SkipReason::UnmatchedLoopClose => "loop close without open",
            SkipReason::UnterminatedLoop => "loop never closed",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SkippedLine {
    /// 1-based line number in the source text.
    pub line: u32,
    pub reason: SkipReason,
    /// The offending line, trimmed.
    pub text: String,
}

impl SkippedLine {
    pub fn new(index: usize, reason: SkipReason, text: &str) -> Self {
        Self {
            line: index as u32 + 1,
            reason,
            text: text.trim().to_string(),
        }
    }
}

impl std::fmt::Display for SkippedLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {} ({})", self.line, self.text, self.reason.describe())
    }
}
