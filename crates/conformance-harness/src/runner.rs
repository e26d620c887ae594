//! Conformance test runner

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::classify::{FailureKind, Outcome, Verdict, classify, judge};
use crate::config::{DEFAULT_TIMEOUT_SECS, HarnessConfig};
use crate::corpus::{Corpus, TestCase, TestEntry};
use crate::engine::{Engine, ExecutionRequest, ExecutionResult, ExitSignal};
use crate::error::HarnessResult;
use crate::filter::{FilterSet, PlanStatus};
use crate::harness::Harness;
use crate::metadata::TestMetadata;
use crate::parallel::{ParallelConfig, run_parallel};
use crate::process::ProcessEngine;
use crate::report::{RunReport, TestRecord};

/// Cooperative stop flag shared by the caller and the worker pool
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs a corpus against one engine
pub struct ConformanceRunner {
    corpus: Corpus,
    filter: FilterSet,
    engine: Arc<dyn Engine>,
    harness: Harness,
    timeout: Duration,
}

impl ConformanceRunner {
    /// Create a runner, rejecting allow/deny entries the corpus does not contain
    pub fn new(corpus: Corpus, filter: FilterSet, engine: Arc<dyn Engine>) -> HarnessResult<Self> {
        let paths = corpus.paths();
        filter.validate(paths.iter().map(String::as_str))?;
        info!(
            "corpus {} has {} tests ({} allowed, {} denied)",
            corpus.root().display(),
            paths.len(),
            filter.allow().len(),
            filter.deny().len()
        );

        Ok(Self {
            corpus,
            filter,
            engine,
            harness: Harness::default(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    /// Build a runner driving an external engine process from configuration
    pub fn from_config(config: &HarnessConfig) -> HarnessResult<Self> {
        let corpus = Corpus::open(config.corpus_path()?, &config.extension)?;
        let engine = ProcessEngine::new(config.engine_command()?, config.engine.args.clone());

        Ok(Self::new(corpus, config.filter_set(), Arc::new(engine))?
            .with_harness(Harness::new(config.harness_dir.clone()))
            .with_timeout(config.timeout()))
    }

    pub fn with_harness(mut self, harness: Harness) -> Self {
        self.harness = harness;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    pub fn filter(&self) -> &FilterSet {
        &self.filter
    }

    /// Every discovered test with its filter status, without running anything
    pub fn plan(&self) -> Vec<(TestEntry, PlanStatus)> {
        self.corpus
            .entries()
            .map(|entry| {
                let status = self.filter.plan_status(&entry.path);
                (entry, status)
            })
            .collect()
    }

    /// Run the whole corpus on the worker pool
    pub fn run(
        self: &Arc<Self>,
        config: &ParallelConfig,
        cancel: &CancelToken,
    ) -> HarnessResult<RunReport> {
        let entries: Vec<TestEntry> = self.corpus.entries().collect();
        run_parallel(Arc::clone(self), entries, config, cancel, None)
    }

    /// Filter, execute and classify one discovered test
    pub fn run_entry(&self, entry: &TestEntry) -> TestRecord {
        if !self.filter.should_run(&entry.path) {
            return TestRecord::new(&entry.path, Outcome::Skip, Duration::ZERO);
        }

        let case = match entry.load() {
            Ok(case) => case,
            Err(e) => {
                error!("failed to read {}: {}", entry.location.display(), e);
                return TestRecord::new(&entry.path, Outcome::Error, Duration::ZERO)
                    .with_detail(format!("failed to read test file: {}", e));
            }
        };

        self.run_case(&case)
    }

    /// Execute and classify an already loaded test
    pub fn run_case(&self, case: &TestCase) -> TestRecord {
        let metadata = case.metadata();
        let result = self.execute_with(case, &metadata);
        let verdict = judge(&result, &metadata);
        let expected_failure = self.filter.is_expected_failure(&case.path);
        let outcome = classify(&verdict, expected_failure);
        debug!("{} -> {} ({:?})", case.path, outcome, result.elapsed);

        let record = TestRecord::new(&case.path, outcome, result.elapsed)
            .with_deny_reason(self.filter.deny_reason(&case.path));
        match verdict {
            Verdict::Failure(kind) => {
                let diagnostic = result.diagnostic.trim();
                if diagnostic.is_empty() {
                    record.with_detail(kind.to_string())
                } else {
                    record.with_detail(format!("{}\n{}", kind, diagnostic))
                }
            }
            Verdict::Success => record,
        }
    }

    /// Record for a test whose handling panicked inside the harness.
    ///
    /// Classified as a failure, so a denied test stays an expected failure.
    pub fn fault_record(&self, path: &str, reason: &str) -> TestRecord {
        error!("harness panicked on {}: {}", path, reason);
        let verdict = Verdict::Failure(FailureKind::HarnessFault(reason.to_string()));
        let outcome = classify(&verdict, self.filter.is_expected_failure(path));
        TestRecord::new(path, outcome, Duration::ZERO)
            .with_detail(format!("harness fault: {}", reason))
            .with_deny_reason(self.filter.deny_reason(path))
    }

    /// Run one test on the engine; a panicking engine is reported as a crash
    fn execute_with(&self, case: &TestCase, metadata: &TestMetadata) -> ExecutionResult {
        let request = ExecutionRequest {
            path: case.path.clone(),
            source: self.harness.prepare(case, metadata),
            timeout: self.timeout,
        };

        let start = Instant::now();
        match catch_unwind(AssertUnwindSafe(|| self.engine.execute(&request))) {
            Ok(result) => result,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!("engine panicked on {}: {}", case.path, reason);
                ExecutionResult::new(
                    ExitSignal::Crash {
                        reason: format!("engine panicked: {}", reason),
                    },
                    start.elapsed(),
                )
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ThrownError;
    use std::fs;
    use tempfile::TempDir;

    struct FnEngine<F>(F);

    impl<F> Engine for FnEngine<F>
    where
        F: Fn(&ExecutionRequest) -> ExecutionResult + Send + Sync,
    {
        fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
            (self.0)(request)
        }
    }

    fn corpus(files: &[(&str, &str)]) -> (TempDir, Corpus) {
        let tmp = TempDir::new().unwrap();
        for (name, body) in files {
            let path = tmp.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
        }
        let corpus = Corpus::open(tmp.path(), "js").unwrap();
        (tmp, corpus)
    }

    fn runner<F>(corpus: Corpus, filter: FilterSet, f: F) -> ConformanceRunner
    where
        F: Fn(&ExecutionRequest) -> ExecutionResult + Send + Sync + 'static,
    {
        ConformanceRunner::new(corpus, filter, Arc::new(FnEngine(f))).unwrap()
    }

    #[test]
    fn test_panicking_engine_is_a_crash() {
        let (_tmp, corpus) = corpus(&[("a.js", "boom();")]);
        let runner = runner(corpus, FilterSet::default(), |_| panic!("engine exploded"));

        let entry = runner.corpus().entries().next().unwrap();
        let record = runner.run_entry(&entry);
        assert_eq!(record.outcome, Outcome::Fail);
        assert!(record.detail.unwrap().contains("engine exploded"));
    }

    #[test]
    fn test_unreadable_entry_is_error() {
        let (tmp, corpus) = corpus(&[("a.js", "x;")]);
        let runner = runner(corpus, FilterSet::default(), |_| {
            ExecutionResult::new(ExitSignal::Normal, Duration::ZERO)
        });
        let entry = runner.corpus().entries().next().unwrap();
        fs::remove_file(tmp.path().join("a.js")).unwrap();

        let record = runner.run_entry(&entry);
        assert_eq!(record.outcome, Outcome::Error);
    }

    #[test]
    fn test_skipped_tests_never_reach_engine() {
        let (_tmp, corpus) = corpus(&[("a.js", ""), ("b.js", "")]);
        let filter = FilterSet::new(["a.js"], Vec::<(String, String)>::new());
        let runner = runner(corpus, filter, |req| {
            assert_ne!(req.path, "b.js");
            ExecutionResult::new(ExitSignal::Normal, Duration::ZERO)
        });

        let records: Vec<_> = runner
            .corpus()
            .entries()
            .map(|e| runner.run_entry(&e))
            .collect();
        assert_eq!(records[0].outcome, Outcome::Pass);
        assert_eq!(records[1].outcome, Outcome::Skip);
    }

    #[test]
    fn test_wrong_error_kind_detail() {
        let source = "/*---\nnegative:\n  phase: runtime\n  type: TypeError\n---*/\nx;";
        let (_tmp, corpus) = corpus(&[("neg.js", source)]);
        let runner = runner(corpus, FilterSet::default(), |_| {
            ExecutionResult::new(
                ExitSignal::Threw(ThrownError::new("RangeError", "style")),
                Duration::ZERO,
            )
            .with_diagnostic("    at NumberFormat\n")
        });
        let entry = runner.corpus().entries().next().unwrap();

        let record = runner.run_entry(&entry);
        assert_eq!(record.outcome, Outcome::Fail);
        assert_eq!(
            record.detail.as_deref(),
            Some("expected TypeError but got RangeError: style\nat NumberFormat")
        );
    }

    #[test]
    fn test_fault_record_respects_denials() {
        let (_tmp, corpus) = corpus(&[("a.js", ""), ("b.js", "")]);
        let filter = FilterSet::new(Vec::<String>::new(), vec![("b.js".to_string(), "bug".to_string())]);
        let runner = runner(corpus, filter, |_| {
            ExecutionResult::new(ExitSignal::Normal, Duration::ZERO)
        });

        let plain = runner.fault_record("a.js", "index out of range");
        assert_eq!(plain.outcome, Outcome::Fail);
        assert_eq!(plain.detail.as_deref(), Some("harness fault: index out of range"));

        let denied = runner.fault_record("b.js", "index out of range");
        assert_eq!(denied.outcome, Outcome::ExpectedFail);
        assert_eq!(denied.deny_reason.as_deref(), Some("bug"));
    }

    #[test]
    fn test_unknown_deny_entry_is_rejected() {
        let (_tmp, corpus) = corpus(&[("a.js", "")]);
        let filter = FilterSet::new(Vec::<String>::new(), vec![("zzz.js".to_string(), "old".to_string())]);
        let engine: Arc<dyn Engine> = Arc::new(FnEngine(|_: &ExecutionRequest| {
            ExecutionResult::new(ExitSignal::Normal, Duration::ZERO)
        }));
        assert!(ConformanceRunner::new(corpus, filter, engine).is_err());
    }

    #[test]
    fn test_plan() {
        let (_tmp, corpus) = corpus(&[("a.js", ""), ("b.js", ""), ("c.js", "")]);
        let filter = FilterSet::new(["a.js", "b.js"], vec![("b.js".to_string(), "bug".to_string())]);
        let runner = runner(corpus, filter, |_| {
            ExecutionResult::new(ExitSignal::Normal, Duration::ZERO)
        });
        let statuses: Vec<_> = runner.plan().into_iter().map(|(e, s)| (e.path, s)).collect();
        assert_eq!(
            statuses,
            vec![
                ("a.js".to_string(), PlanStatus::Run),
                ("b.js".to_string(), PlanStatus::Denied),
                ("c.js".to_string(), PlanStatus::Skip),
            ]
        );
    }
}
