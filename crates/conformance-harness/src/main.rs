use clap::Parser;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

use conformance_harness::compare::compare_files;
use conformance_harness::parallel::{ParallelConfig, run_parallel};
use conformance_harness::report::PersistedReport;
use conformance_harness::filter::PlanStatus;
use conformance_harness::{CancelToken, ConformanceRunner, Corpus, HarnessConfig, HarnessError};

/// Run failed: failures, stale denials or harness errors
const EXIT_RUN_FAILED: u8 = 1;
/// Corpus, configuration or I/O problem before or outside the run
const EXIT_FATAL: u8 = 2;
/// Interrupted by the user
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "conformance")]
#[command(about = "Run conformance tests against an engine and triage known failures")]
struct Args {
    /// Config file (defaults to ./conformance.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Corpus root directory
    #[arg(long)]
    corpus: Option<PathBuf>,

    /// Directory of harness include files
    #[arg(long)]
    harness_dir: Option<PathBuf>,

    /// Engine executable
    #[arg(short, long)]
    engine: Option<PathBuf>,

    /// Argument passed to the engine; `{file}` becomes the test source path
    #[arg(long = "engine-arg", value_name = "ARG", allow_hyphen_values = true)]
    engine_args: Vec<String>,

    /// Only run these tests (relative paths); replaces the config allow list
    #[arg(long = "allow", value_name = "PATH")]
    allow: Vec<String>,

    /// Timeout in seconds for each test
    #[arg(long)]
    timeout: Option<u64>,

    /// Number of worker threads (0 = one per CPU)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Maximum number of tests to run
    #[arg(short = 'n', long)]
    max_tests: Option<usize>,

    /// Only list tests without running them
    #[arg(long)]
    list_only: bool,

    /// Output the report as JSON
    #[arg(long)]
    json: bool,

    /// Verbose per-test output (-v dots, -vv one line per test)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Write one JSON line per test to this file
    #[arg(long)]
    log: Option<PathBuf>,

    /// Append to the log instead of truncating it
    #[arg(long)]
    log_append: bool,

    /// Save the report into the results directory
    #[arg(long)]
    save: bool,

    /// Compare two saved reports instead of running
    #[arg(long, num_args = 2, value_names = ["BASE", "NEW"])]
    compare: Option<Vec<PathBuf>>,
}

impl Args {
    fn apply(&self, config: &mut HarnessConfig) {
        if let Some(ref corpus) = self.corpus {
            config.corpus = Some(corpus.clone());
        }
        if let Some(ref dir) = self.harness_dir {
            config.harness_dir = Some(dir.clone());
        }
        if let Some(ref engine) = self.engine {
            config.engine.command = Some(engine.clone());
        }
        if !self.engine_args.is_empty() {
            config.engine.args = self.engine_args.clone();
        }
        if !self.allow.is_empty() {
            config.allow = self.allow.clone();
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(jobs) = self.jobs {
            config.jobs = Some(jobs);
        }
    }
}

fn main() -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: failed to start runtime: {}", "error".red().bold(), e);
            return ExitCode::from(EXIT_FATAL);
        }
    };
    runtime.block_on(async_main())
}

async fn async_main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::WARN.into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(code) => code,
        Err(HarnessError::Cancelled { completed, total }) => {
            eprintln!(
                "{}: cancelled after {} of {} tests; no report produced",
                "interrupted".yellow().bold(),
                completed,
                total
            );
            ExitCode::from(EXIT_CANCELLED)
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(args: Args) -> Result<ExitCode, HarnessError> {
    if let Some(ref pair) = args.compare {
        let comparison = compare_files(&pair[0], &pair[1])?;
        comparison.print();
        return Ok(if comparison.has_regressions() {
            ExitCode::from(EXIT_RUN_FAILED)
        } else {
            ExitCode::SUCCESS
        });
    }

    let mut config = HarnessConfig::load_or_default(args.config.as_deref())?;
    args.apply(&mut config);

    // Listing needs no engine.
    if args.list_only {
        let corpus_path = config.corpus_path()?;
        let corpus = Corpus::open(corpus_path, &config.extension)?;
        let filter = config.filter_set();
        filter.validate(corpus.paths().iter().map(String::as_str))?;

        let mut count = 0;
        for entry in corpus.entries() {
            let tag = match filter.plan_status(&entry.path) {
                PlanStatus::Run => "run ".green(),
                PlanStatus::Denied => "deny".yellow(),
                PlanStatus::Skip => "skip".dimmed(),
            };
            println!("[{}] {}", tag, entry.path);
            count += 1;
        }
        println!("\nTotal: {} tests", count);
        return Ok(ExitCode::SUCCESS);
    }

    let runner = Arc::new(ConformanceRunner::from_config(&config)?);

    if !args.json {
        println!("{}", "Conformance Runner".bold().cyan());
        println!("Corpus: {}", runner.corpus().root().display());
        println!(
            "Allowed: {}  Denied: {}",
            runner.filter().allow().len(),
            runner.filter().deny().len()
        );
    }

    let mut entries: Vec<_> = runner.corpus().entries().collect();
    if let Some(max) = args.max_tests {
        entries.truncate(max);
    }

    let parallel = ParallelConfig {
        jobs: config.jobs(),
        verbose: args.verbose,
        json_mode: args.json,
        log_path: args.log.clone(),
        log_append: args.log_append,
    };

    let pb = if !args.json && args.verbose == 0 {
        let pb = ProgressBar::new(entries.len() as u64);
        if let Ok(style) =
            ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
        {
            pb.set_style(style);
        }
        Some(pb)
    } else {
        None
    };

    let cancel = CancelToken::new();
    let mut task = tokio::task::spawn_blocking({
        let cancel = cancel.clone();
        let runner = Arc::clone(&runner);
        move || run_parallel(runner, entries, &parallel, &cancel, pb)
    });

    let joined = tokio::select! {
        res = &mut task => res,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nInterrupted; letting in-flight tests finish...");
            cancel.cancel();
            task.await
        }
    };
    let report = joined.map_err(|e| HarnessError::Io(std::io::Error::other(e)))??;

    if args.json {
        match report.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to generate JSON: {}", e),
        }
    } else {
        report.print_summary();
    }

    if args.save {
        let corpus = runner.corpus().root().display().to_string();
        let path = PersistedReport::new(corpus, report.clone()).save(&config.results_dir)?;
        if !args.json {
            println!("Saved report to {}", path.display());
        }
    }

    Ok(if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_RUN_FAILED)
    })
}
