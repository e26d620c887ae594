//! Outcome classification
//!
//! Two steps: [`judge`] decides whether an execution met the test's own
//! expectation, then [`classify`] folds in deny-list membership.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::{ExecutionResult, ExitSignal, ThrownError};
use crate::metadata::TestMetadata;

/// Printed by `doneprintHandle.js` when an async test resolves
pub const ASYNC_COMPLETE: &str = "Test262:AsyncTestComplete";
/// Printed by `doneprintHandle.js` when an async test rejects
pub const ASYNC_FAILURE: &str = "Test262:AsyncTestFailure:";

/// Canonical per-test outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail,
    /// Failed, and the deny list says it should
    ExpectedFail,
    /// Passed despite a deny entry: the entry is stale
    UnexpectedPass,
    /// Left out by the allow list; never executed
    Skip,
    /// Harness-side fault, e.g. the test file vanished after discovery.
    /// Fails the run: the test's real outcome is unknown.
    Error,
}

impl Outcome {
    pub const ALL: [Outcome; 6] = [
        Outcome::Pass,
        Outcome::Fail,
        Outcome::ExpectedFail,
        Outcome::UnexpectedPass,
        Outcome::Skip,
        Outcome::Error,
    ];

    /// Whether this outcome leaves the run successful
    pub fn is_benign(self) -> bool {
        !matches!(
            self,
            Outcome::Fail | Outcome::UnexpectedPass | Outcome::Error
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Outcome::Pass => "PASS",
            Outcome::Fail => "FAIL",
            Outcome::ExpectedFail => "XFAIL",
            Outcome::UnexpectedPass => "XPASS",
            Outcome::Skip => "SKIP",
            Outcome::Error => "ERROR",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Did the execution do what the test asked for?
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Failure(FailureKind),
}

/// Why an execution did not meet its expectation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Ended some way other than expected (threw, crashed, timed out, ...)
    Execution(ExitSignal),
    /// Threw, but not the error the test asked for
    WrongErrorKind {
        expected: String,
        actual: ThrownError,
    },
    /// Completed normally when an error was expected
    MissingError { expected: String },
    /// Async test exited without ever calling `$DONE`
    AsyncIncomplete,
    /// Async test called `$DONE` with an error
    AsyncFailure(String),
    /// The harness itself panicked while handling the test
    HarnessFault(String),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Execution(signal) => write!(f, "{}", signal),
            FailureKind::WrongErrorKind { expected, actual } => {
                write!(f, "expected {} but got {}", expected, actual)
            }
            FailureKind::MissingError { expected } => {
                write!(f, "expected {} but completed normally", expected)
            }
            FailureKind::AsyncIncomplete => write!(f, "async test never signalled completion"),
            FailureKind::AsyncFailure(message) => write!(f, "async test failed: {}", message),
            FailureKind::HarnessFault(reason) => write!(f, "harness fault: {}", reason),
        }
    }
}

/// Check a raw result against the test's own expectation
pub fn judge(result: &ExecutionResult, metadata: &TestMetadata) -> Verdict {
    if let Some(expected) = metadata.expected_error() {
        return match &result.signal {
            ExitSignal::Threw(thrown) if thrown.kind == expected => Verdict::Success,
            ExitSignal::Threw(thrown) => Verdict::Failure(FailureKind::WrongErrorKind {
                expected: expected.to_string(),
                actual: thrown.clone(),
            }),
            ExitSignal::Normal => Verdict::Failure(FailureKind::MissingError {
                expected: expected.to_string(),
            }),
            other => Verdict::Failure(FailureKind::Execution(other.clone())),
        };
    }

    match &result.signal {
        ExitSignal::Normal if metadata.is_async() => judge_async(&result.output),
        ExitSignal::Normal => Verdict::Success,
        other => Verdict::Failure(FailureKind::Execution(other.clone())),
    }
}

fn judge_async(output: &str) -> Verdict {
    if let Some(line) = output.lines().find(|l| l.contains(ASYNC_FAILURE)) {
        let message = line
            .split_once(ASYNC_FAILURE)
            .map(|(_, rest)| rest.trim())
            .unwrap_or_default();
        return Verdict::Failure(FailureKind::AsyncFailure(message.to_string()));
    }
    if output.lines().any(|l| l.trim() == ASYNC_COMPLETE) {
        Verdict::Success
    } else {
        Verdict::Failure(FailureKind::AsyncIncomplete)
    }
}

/// Fold deny-list membership into a verdict
pub fn classify(verdict: &Verdict, expected_failure: bool) -> Outcome {
    match (verdict, expected_failure) {
        (Verdict::Success, false) => Outcome::Pass,
        (Verdict::Success, true) => Outcome::UnexpectedPass,
        (Verdict::Failure(_), false) => Outcome::Fail,
        (Verdict::Failure(_), true) => Outcome::ExpectedFail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn result(signal: ExitSignal) -> ExecutionResult {
        ExecutionResult::new(signal, Duration::from_millis(1))
    }

    fn negative(error_type: &str) -> TestMetadata {
        TestMetadata::parse(&format!(
            "/*---\nnegative:\n  phase: runtime\n  type: {error_type}\n---*/"
        ))
        .unwrap()
    }

    #[test]
    fn test_classification_table() {
        let ok = Verdict::Success;
        let bad = Verdict::Failure(FailureKind::Execution(ExitSignal::Timeout));
        assert_eq!(classify(&ok, false), Outcome::Pass);
        assert_eq!(classify(&ok, true), Outcome::UnexpectedPass);
        assert_eq!(classify(&bad, false), Outcome::Fail);
        assert_eq!(classify(&bad, true), Outcome::ExpectedFail);
    }

    #[test]
    fn test_plain_test_verdicts() {
        let meta = TestMetadata::default();
        assert_eq!(judge(&result(ExitSignal::Normal), &meta), Verdict::Success);

        for signal in [
            ExitSignal::Threw(ThrownError::new("Test262Error", "oops")),
            ExitSignal::Error { code: Some(3) },
            ExitSignal::Timeout,
            ExitSignal::Crash {
                reason: "signal 11".into(),
            },
            ExitSignal::InvocationError {
                reason: "no such file".into(),
            },
        ] {
            assert_eq!(
                judge(&result(signal.clone()), &meta),
                Verdict::Failure(FailureKind::Execution(signal))
            );
        }
    }

    #[test]
    fn test_expected_error_kind() {
        let meta = negative("TypeError");

        let right = result(ExitSignal::Threw(ThrownError::new("TypeError", "style")));
        assert_eq!(judge(&right, &meta), Verdict::Success);

        let wrong = result(ExitSignal::Threw(ThrownError::new("RangeError", "style")));
        let verdict = judge(&wrong, &meta);
        assert_eq!(
            verdict,
            Verdict::Failure(FailureKind::WrongErrorKind {
                expected: "TypeError".into(),
                actual: ThrownError::new("RangeError", "style"),
            })
        );
        if let Verdict::Failure(kind) = verdict {
            assert_eq!(kind.to_string(), "expected TypeError but got RangeError: style");
        }

        assert_eq!(
            judge(&result(ExitSignal::Normal), &meta),
            Verdict::Failure(FailureKind::MissingError {
                expected: "TypeError".into()
            })
        );
        assert!(matches!(
            judge(&result(ExitSignal::Timeout), &meta),
            Verdict::Failure(FailureKind::Execution(ExitSignal::Timeout))
        ));
    }

    #[test]
    fn test_async_markers() {
        let meta = TestMetadata::parse("/*---\nflags: [async]\n---*/").unwrap();

        let done = result(ExitSignal::Normal).with_output("Test262:AsyncTestComplete\n");
        assert_eq!(judge(&done, &meta), Verdict::Success);

        let failed = result(ExitSignal::Normal)
            .with_output("Test262:AsyncTestFailure:Test262Error: nope\n");
        assert_eq!(
            judge(&failed, &meta),
            Verdict::Failure(FailureKind::AsyncFailure("Test262Error: nope".into()))
        );

        let silent = result(ExitSignal::Normal);
        assert_eq!(
            judge(&silent, &meta),
            Verdict::Failure(FailureKind::AsyncIncomplete)
        );
    }

    #[test]
    fn test_benign_outcomes() {
        let benign: Vec<_> = Outcome::ALL.into_iter().filter(|o| o.is_benign()).collect();
        assert_eq!(
            benign,
            vec![Outcome::Pass, Outcome::ExpectedFail, Outcome::Skip]
        );
    }
}
