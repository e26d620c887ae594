//! Engine under test
//!
//! The harness treats the engine as a black box that either completes,
//! throws a named error, or has to be killed. [`crate::process::ProcessEngine`]
//! is the out-of-process implementation; anything else (an embedded runtime,
//! a scripted fake) plugs in through [`Engine`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Something that can run one prepared test source.
///
/// Implementations must not share mutable state between calls: each call
/// gets a fresh process or a freshly reset context.
pub trait Engine: Send + Sync {
    fn execute(&self, request: &ExecutionRequest) -> ExecutionResult;
}

impl<E: Engine + ?Sized> Engine for std::sync::Arc<E> {
    fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        (**self).execute(request)
    }
}

/// Input for one execution
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Test id, for diagnostics
    pub path: String,
    /// Source with harness prelude already applied
    pub source: String,
    /// Wall-clock budget
    pub timeout: Duration,
}

/// A thrown error as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrownError {
    /// Error category, e.g. `TypeError`
    pub kind: String,
    pub message: String,
}

impl ThrownError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ThrownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

/// How an execution ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum ExitSignal {
    /// Completed without error
    Normal,
    /// Engine reported a thrown error
    Threw(ThrownError),
    /// Non-zero exit with no recognizable error
    Error { code: Option<i32> },
    /// Killed at the timeout boundary
    Timeout,
    /// Died abnormally (signal, panic)
    Crash { reason: String },
    /// The engine could not be started at all
    InvocationError { reason: String },
}

impl fmt::Display for ExitSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitSignal::Normal => write!(f, "completed"),
            ExitSignal::Threw(err) => write!(f, "threw {}", err),
            ExitSignal::Error { code: Some(code) } => write!(f, "exited with status {}", code),
            ExitSignal::Error { code: None } => write!(f, "exited with an error"),
            ExitSignal::Timeout => write!(f, "timed out"),
            ExitSignal::Crash { reason } => write!(f, "crashed: {}", reason),
            ExitSignal::InvocationError { reason } => {
                write!(f, "engine invocation failed: {}", reason)
            }
        }
    }
}

/// Raw result of running one test
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub signal: ExitSignal,
    pub elapsed: Duration,
    /// Captured standard output
    pub output: String,
    /// Captured diagnostics (stderr, stack traces)
    pub diagnostic: String,
}

impl ExecutionResult {
    pub fn new(signal: ExitSignal, elapsed: Duration) -> Self {
        Self {
            signal,
            elapsed,
            output: String::new(),
            diagnostic: String::new(),
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = diagnostic.into();
        self
    }

    /// One-line description plus captured diagnostics, for reports
    pub fn describe(&self) -> String {
        let diagnostic = self.diagnostic.trim();
        if diagnostic.is_empty() {
            self.signal.to_string()
        } else {
            format!("{}\n{}", self.signal, diagnostic)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        let plain = ExecutionResult::new(ExitSignal::Timeout, Duration::from_secs(10));
        assert_eq!(plain.describe(), "timed out");

        let threw = ExecutionResult::new(
            ExitSignal::Threw(ThrownError::new("RangeError", "invalid currency")),
            Duration::from_millis(3),
        )
        .with_diagnostic("  at format (testIntl.js:10)\n");
        assert_eq!(
            threw.describe(),
            "threw RangeError: invalid currency\nat format (testIntl.js:10)"
        );
    }
}
