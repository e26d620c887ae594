//! Parallel runner.
//!
//! Distributes tests across N worker threads fed by a bounded crossbeam
//! channel. Results flow back over a second channel to the calling thread,
//! which is the single owner of the [`RunAggregator`]. Isolation comes from
//! the engine (one process per test) and from `catch_unwind` around each
//! [`ConformanceRunner::run_entry`], so a bad test never takes a worker down.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use colored::Colorize;
use crossbeam_channel::bounded;
use indicatif::ProgressBar;
use tracing::{error, warn};

use crate::classify::Outcome;
use crate::corpus::TestEntry;
use crate::error::{HarnessError, HarnessResult};
use crate::report::{RunAggregator, RunReport, TestRecord};
use crate::runner::{CancelToken, ConformanceRunner, panic_message};

/// Worker stack size; in-process engines can recurse deeply
const WORKER_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Options shared by the pool and the result collector
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Number of worker threads
    pub jobs: usize,
    /// Verbosity level (mirrors the CLI `-v` count)
    pub verbose: u8,
    /// Suppress per-test console output when true
    pub json_mode: bool,
    /// Optional path for the JSONL result log
    pub log_path: Option<PathBuf>,
    /// Append to the log file instead of truncating at run start
    pub log_append: bool,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            jobs: num_cpus::get().max(1),
            verbose: 0,
            json_mode: true,
            log_path: None,
            log_append: false,
        }
    }
}

impl ParallelConfig {
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }
}

/// Run `entries` across `config.jobs` workers and aggregate the results.
///
/// Blocks until every started test has been classified. If `cancel` fires,
/// no further tests are started and the run ends with
/// [`HarnessError::Cancelled`].
pub fn run_parallel(
    runner: Arc<ConformanceRunner>,
    entries: Vec<TestEntry>,
    config: &ParallelConfig,
    cancel: &CancelToken,
    pb: Option<ProgressBar>,
) -> HarnessResult<RunReport> {
    let num_jobs = config.jobs.max(1);
    let total = entries.len();
    let expected: Vec<String> = entries.iter().map(|e| e.path.clone()).collect();

    let mut log_writer = open_log(config)?;

    let (job_tx, job_rx) = bounded::<TestEntry>(num_jobs * 4);
    let (result_tx, result_rx) = bounded::<TestRecord>(num_jobs * 8);

    let mut handles = Vec::with_capacity(num_jobs);
    for i in 0..num_jobs {
        let job_rx = job_rx.clone();
        let result_tx = result_tx.clone();
        let runner = Arc::clone(&runner);
        let cancel = cancel.clone();

        let handle = thread::Builder::new()
            .name(format!("conformance-worker-{i}"))
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || {
                for entry in &job_rx {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let record = catch_unwind(AssertUnwindSafe(|| runner.run_entry(&entry)))
                        .unwrap_or_else(|payload| {
                            runner.fault_record(&entry.path, &panic_message(payload.as_ref()))
                        });
                    if result_tx.send(record).is_err() {
                        break;
                    }
                }
            })?;
        handles.push(handle);
    }

    // The result channel closes once every worker has dropped its sender.
    drop(result_tx);
    drop(job_rx);

    let feed_cancel = cancel.clone();
    let send_handle = thread::spawn(move || {
        for entry in entries {
            if feed_cancel.is_cancelled() || job_tx.send(entry).is_err() {
                break;
            }
        }
    });

    let mut aggregator = RunAggregator::new();
    for record in &result_rx {
        if let Some(ref mut writer) = log_writer {
            if let Ok(line) = serde_json::to_string(&record) {
                let _ = writeln!(writer, "{}", line);
            }
        }

        if !config.json_mode {
            print_progress(&record, config.verbose, aggregator.len());
        }

        aggregator.record(record);

        if let Some(ref pb) = pb {
            let counts = aggregator.counts();
            pb.inc(1);
            pb.set_message(format!(
                "Pass: {} Fail: {} XFail: {} XPass: {} Skip: {} [{}j]",
                counts.pass,
                counts.fail,
                counts.expected_fail,
                counts.unexpected_pass,
                counts.skip,
                num_jobs
            ));
        }
    }

    if let Some(ref mut writer) = log_writer {
        writer.flush()?;
    }
    if config.verbose == 1 && !config.json_mode {
        eprintln!();
    }
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    let _ = send_handle.join();
    for h in handles {
        if let Err(e) = h.join() {
            error!("worker thread panicked: {}", panic_message(e.as_ref()));
        }
    }

    if cancel.is_cancelled() && aggregator.len() < total {
        return Err(HarnessError::Cancelled {
            completed: aggregator.len(),
            total,
        });
    }

    // A worker that died mid-test leaves a hole; surface it rather than
    // silently shrinking the run.
    if aggregator.len() < total {
        let recorded: HashSet<String> = aggregator.paths().map(str::to_string).collect();
        for path in expected.into_iter().filter(|p| !recorded.contains(p)) {
            warn!("{} was never classified", path);
            aggregator.record(
                TestRecord::new(path, Outcome::Error, Duration::ZERO)
                    .with_detail("worker exited before classifying this test"),
            );
        }
    }

    Ok(aggregator.finish())
}

fn open_log(config: &ParallelConfig) -> HarnessResult<Option<BufWriter<File>>> {
    let Some(path) = config.log_path.as_ref() else {
        return Ok(None);
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(!config.log_append)
        .append(config.log_append)
        .open(path)?;
    Ok(Some(BufWriter::new(file)))
}

fn print_progress(record: &TestRecord, verbose: u8, seen: usize) {
    match verbose {
        0 => {}
        1 => {
            let ch = match record.outcome {
                Outcome::Pass => ".".green().to_string(),
                Outcome::Fail => "F".red().to_string(),
                Outcome::ExpectedFail => "x".yellow().to_string(),
                Outcome::UnexpectedPass => "U".red().bold().to_string(),
                Outcome::Skip => "S".dimmed().to_string(),
                Outcome::Error => "!".magenta().to_string(),
            };
            eprint!("{}", ch);
            if seen % 80 == 79 {
                eprintln!();
            }
        }
        _ => {
            let status = match record.outcome {
                Outcome::Pass => "PASS".green().to_string(),
                Outcome::Fail => "FAIL".red().to_string(),
                Outcome::ExpectedFail => "XFAIL".yellow().to_string(),
                Outcome::UnexpectedPass => "XPASS".red().bold().to_string(),
                Outcome::Skip => "SKIP".dimmed().to_string(),
                Outcome::Error => "ERROR".magenta().to_string(),
            };
            eprintln!("[{}] {} {}ms", status, record.path, record.duration_ms);
            if let Some(ref detail) = record.detail {
                if let Some(first) = detail.lines().next() {
                    eprintln!("  {}", first);
                }
            }
        }
    }
}
