//! Out-of-process engine
//!
//! Every test runs in its own child process, so a crash or a hang only ever
//! takes down that one test. The prepared source is piped to stdin, or, when
//! an argument contains `{file}`, written to a temporary file whose path is
//! substituted in.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::LazyLock;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, bounded};
use regex::Regex;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::engine::{Engine, ExecutionRequest, ExecutionResult, ExitSignal, ThrownError};

/// Placeholder replaced by the temp file path in engine arguments
pub const FILE_PLACEHOLDER: &str = "{file}";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long to wait for output pipes to drain once the child is gone
const PIPE_GRACE: Duration = Duration::from_secs(2);

/// Matches `TypeError: message` or `Uncaught RangeError: message` lines
static THROWN_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:Uncaught\s+)?([A-Z][A-Za-z0-9_$]*(?:Error|Exception))(?::[ \t]*(.*?))?\s*$")
        .expect("thrown error pattern is valid")
});

/// Runs each test in a fresh process of an external engine binary
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    command: PathBuf,
    args: Vec<String>,
    poll_interval: Duration,
}

impl ProcessEngine {
    pub fn new(command: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn uses_file(&self) -> bool {
        self.args.iter().any(|a| a.contains(FILE_PLACEHOLDER))
    }

    fn build_command(&self, file: Option<&NamedTempFile>) -> Command {
        let mut cmd = Command::new(&self.command);
        match file {
            Some(file) => {
                let path = file.path().to_string_lossy();
                cmd.args(self.args.iter().map(|a| a.replace(FILE_PLACEHOLDER, &path)));
                cmd.stdin(Stdio::null());
            }
            None => {
                cmd.args(&self.args);
                cmd.stdin(Stdio::piped());
            }
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }
}

impl Engine for ProcessEngine {
    fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        let start = Instant::now();

        let file = if self.uses_file() {
            match write_source_file(&request.source) {
                Ok(file) => Some(file),
                Err(e) => {
                    return ExecutionResult::new(
                        ExitSignal::InvocationError {
                            reason: format!("failed to stage test source: {}", e),
                        },
                        start.elapsed(),
                    );
                }
            }
        } else {
            None
        };

        let mut child = match self.build_command(file.as_ref()).spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecutionResult::new(
                    ExitSignal::InvocationError {
                        reason: format!("failed to spawn '{}': {}", self.command.display(), e),
                    },
                    start.elapsed(),
                );
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            let source = request.source.clone();
            // A child that exits without reading closes the pipe; that is fine.
            thread::spawn(move || {
                let _ = stdin.write_all(source.as_bytes());
            });
        }

        let stdout_rx = drain(child.stdout.take());
        let stderr_rx = drain(child.stderr.take());

        let waited = wait_with_timeout(&mut child, request.timeout, self.poll_interval);
        let output = stdout_rx.recv_timeout(PIPE_GRACE).unwrap_or_default();
        let diagnostic = stderr_rx.recv_timeout(PIPE_GRACE).unwrap_or_default();
        let elapsed = start.elapsed();

        let signal = match waited {
            Ok(Some(status)) => interpret_status(status, &diagnostic, &output),
            Ok(None) => {
                debug!("{} timed out after {:?}", request.path, request.timeout);
                ExitSignal::Timeout
            }
            Err(e) => {
                warn!("waiting on engine for {} failed: {}", request.path, e);
                ExitSignal::InvocationError {
                    reason: format!("wait failed: {}", e),
                }
            }
        };

        ExecutionResult::new(signal, elapsed)
            .with_output(output)
            .with_diagnostic(diagnostic)
    }
}

fn write_source_file(source: &str) -> std::io::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("conformance-")
        .suffix(".js")
        .tempfile()?;
    file.write_all(source.as_bytes())?;
    file.flush()?;
    Ok(file)
}

/// Read a pipe to the end on a helper thread
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<String> {
    let (tx, rx) = bounded(1);
    match pipe {
        Some(mut pipe) => {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
            });
        }
        None => {
            let _ = tx.send(String::new());
        }
    }
    rx
}

/// Poll the child until it exits or the budget runs out.
///
/// Returns `Ok(None)` when the child had to be killed.
fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
    poll_interval: Duration,
) -> std::io::Result<Option<ExitStatus>> {
    let started_at = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if started_at.elapsed() >= timeout {
            let _ = child.kill();
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(poll_interval);
    }
}

fn interpret_status(status: ExitStatus, diagnostic: &str, output: &str) -> ExitSignal {
    if status.success() {
        return ExitSignal::Normal;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitSignal::Crash {
                reason: format!("terminated by signal {}", signal),
            };
        }
    }

    match parse_thrown_error(diagnostic).or_else(|| parse_thrown_error(output)) {
        Some(thrown) => ExitSignal::Threw(thrown),
        None => ExitSignal::Error {
            code: status.code(),
        },
    }
}

/// Find the first `Name: message` error line in engine output
pub fn parse_thrown_error(text: &str) -> Option<ThrownError> {
    THROWN_ERROR.captures(text).map(|caps| {
        ThrownError::new(
            &caps[1],
            caps.get(2).map(|m| m.as_str()).unwrap_or_default(),
        )
    })
}
