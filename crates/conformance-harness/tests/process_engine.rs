//! ProcessEngine against small shell scripts standing in for an engine
#![cfg(unix)]

use std::time::{Duration, Instant};

use conformance_harness::{Engine, ExecutionRequest, ExitSignal, ProcessEngine};

fn sh(script: &str) -> ProcessEngine {
    ProcessEngine::new("sh", vec!["-c".to_string(), script.to_string()])
}

fn request(source: &str, timeout: Duration) -> ExecutionRequest {
    ExecutionRequest {
        path: "test.js".to_string(),
        source: source.to_string(),
        timeout,
    }
}

#[test]
fn test_normal_exit() {
    let engine = sh("cat > /dev/null; echo done");
    let result = engine.execute(&request("1 + 1;", Duration::from_secs(5)));
    assert_eq!(result.signal, ExitSignal::Normal);
    assert_eq!(result.output.trim(), "done");
}

#[test]
fn test_source_arrives_on_stdin() {
    let engine = sh("cat");
    let result = engine.execute(&request("print('hello');", Duration::from_secs(5)));
    assert_eq!(result.signal, ExitSignal::Normal);
    assert_eq!(result.output, "print('hello');");
}

#[test]
fn test_thrown_error_on_stderr() {
    let engine = sh("cat > /dev/null; echo 'Uncaught TypeError: x is not a function' >&2; exit 1");
    let result = engine.execute(&request("x();", Duration::from_secs(5)));
    match result.signal {
        ExitSignal::Threw(thrown) => {
            assert_eq!(thrown.kind, "TypeError");
            assert_eq!(thrown.message, "x is not a function");
        }
        other => panic!("unexpected signal: {other}"),
    }
    assert!(result.diagnostic.contains("TypeError"));
}

#[test]
fn test_unrecognized_failure_keeps_exit_code() {
    let engine = sh("cat > /dev/null; echo 'something odd' >&2; exit 3");
    let result = engine.execute(&request("", Duration::from_secs(5)));
    assert_eq!(result.signal, ExitSignal::Error { code: Some(3) });
}

#[test]
fn test_timeout_kills_the_engine() {
    let engine = sh("exec sleep 30").with_poll_interval(Duration::from_millis(5));
    let start = Instant::now();
    let result = engine.execute(&request("while (true) {}", Duration::from_millis(200)));
    assert_eq!(result.signal, ExitSignal::Timeout);
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_signal_is_a_crash() {
    let engine = sh("kill -9 $$");
    let result = engine.execute(&request("", Duration::from_secs(5)));
    match result.signal {
        ExitSignal::Crash { reason } => assert!(reason.contains('9')),
        other => panic!("unexpected signal: {other}"),
    }
}

#[test]
fn test_file_placeholder() {
    let engine = ProcessEngine::new(
        "sh",
        vec![
            "-c".to_string(),
            "cat \"$1\"".to_string(),
            "engine".to_string(),
            "{file}".to_string(),
        ],
    );
    let result = engine.execute(&request("var staged = true;", Duration::from_secs(5)));
    assert_eq!(result.signal, ExitSignal::Normal);
    assert_eq!(result.output, "var staged = true;");
}

#[test]
fn test_missing_binary_is_invocation_error() {
    let engine = ProcessEngine::new("/nonexistent/engine-binary", Vec::new());
    let result = engine.execute(&request("", Duration::from_secs(1)));
    assert!(matches!(result.signal, ExitSignal::InvocationError { .. }));
}
