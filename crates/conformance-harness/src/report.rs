//! Result aggregation and reporting

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use colored::*;
use serde::{Deserialize, Serialize};

use crate::classify::Outcome;
use crate::error::HarnessResult;

/// Lines of diagnostic text shown per failure in the console summary
const MAX_DETAIL_LINES: usize = 12;

/// One classified test, as streamed to the JSONL log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRecord {
    /// Test path (relative to the corpus root)
    pub path: String,
    pub outcome: Outcome,
    /// Execution time in milliseconds
    pub duration_ms: u64,
    /// What went wrong, for failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Deny-list reason, for denied tests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny_reason: Option<String>,
}

impl TestRecord {
    pub fn new(path: impl Into<String>, outcome: Outcome, duration: Duration) -> Self {
        Self {
            path: path.into(),
            outcome,
            duration_ms: duration.as_millis() as u64,
            detail: None,
            deny_reason: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_deny_reason(mut self, reason: Option<&str>) -> Self {
        self.deny_reason = reason.map(str::to_string);
        self
    }
}

/// Per-category counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub pass: usize,
    pub fail: usize,
    pub expected_fail: usize,
    pub unexpected_pass: usize,
    pub skip: usize,
    pub error: usize,
}

impl OutcomeCounts {
    pub fn bump(&mut self, outcome: Outcome) {
        *self.slot(outcome) += 1;
    }

    pub fn get(&self, outcome: Outcome) -> usize {
        match outcome {
            Outcome::Pass => self.pass,
            Outcome::Fail => self.fail,
            Outcome::ExpectedFail => self.expected_fail,
            Outcome::UnexpectedPass => self.unexpected_pass,
            Outcome::Skip => self.skip,
            Outcome::Error => self.error,
        }
    }

    pub fn total(&self) -> usize {
        Outcome::ALL.iter().map(|o| self.get(*o)).sum()
    }

    fn slot(&mut self, outcome: Outcome) -> &mut usize {
        match outcome {
            Outcome::Pass => &mut self.pass,
            Outcome::Fail => &mut self.fail,
            Outcome::ExpectedFail => &mut self.expected_fail,
            Outcome::UnexpectedPass => &mut self.unexpected_pass,
            Outcome::Skip => &mut self.skip,
            Outcome::Error => &mut self.error,
        }
    }
}

/// A test listed under a report category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub path: String,
    /// Captured diagnostics (failures, harness errors)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Deny-list reason (expected failures, stale denials)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Finalized result of a run
///
/// Entries are sorted by path and carry no timings, so two runs over the
/// same corpus with a deterministic engine produce equal reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// No failures, no stale denials and no harness errors
    pub success: bool,
    pub counts: OutcomeCounts,
    /// Pass rate over executed tests, as a percentage
    pub pass_rate: f64,
    pub passed: Vec<String>,
    pub failed: Vec<ReportEntry>,
    pub expected_failures: Vec<ReportEntry>,
    pub unexpected_passes: Vec<ReportEntry>,
    pub skipped: Vec<String>,
    pub errors: Vec<ReportEntry>,
}

/// Collects records from a single owner
#[derive(Debug, Default)]
pub struct RunAggregator {
    records: Vec<TestRecord>,
    counts: OutcomeCounts,
}

impl RunAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: TestRecord) {
        self.counts.bump(record.outcome);
        self.records.push(record);
    }

    /// Running counts, for progress display
    pub fn counts(&self) -> OutcomeCounts {
        self.counts
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Paths recorded so far, in arrival order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.path.as_str())
    }

    pub fn finish(mut self) -> RunReport {
        self.records.sort_by(|a, b| a.path.cmp(&b.path));

        let mut report = RunReport {
            success: true,
            counts: self.counts,
            pass_rate: 0.0,
            passed: Vec::new(),
            failed: Vec::new(),
            expected_failures: Vec::new(),
            unexpected_passes: Vec::new(),
            skipped: Vec::new(),
            errors: Vec::new(),
        };

        for record in self.records {
            let entry = ReportEntry {
                path: record.path,
                detail: record.detail,
                reason: record.deny_reason,
            };
            match record.outcome {
                Outcome::Pass => report.passed.push(entry.path),
                Outcome::Skip => report.skipped.push(entry.path),
                Outcome::Fail => report.failed.push(entry),
                Outcome::ExpectedFail => report.expected_failures.push(entry),
                Outcome::UnexpectedPass => report.unexpected_passes.push(entry),
                Outcome::Error => report.errors.push(entry),
            }
        }

        report.success = report.failed.is_empty()
            && report.unexpected_passes.is_empty()
            && report.errors.is_empty();

        let counts = &report.counts;
        let executed = counts.pass + counts.fail + counts.expected_fail + counts.unexpected_pass;
        if executed > 0 {
            report.pass_rate =
                ((counts.pass + counts.unexpected_pass) as f64 / executed as f64) * 100.0;
        }

        report
    }
}

impl RunReport {
    pub fn total(&self) -> usize {
        self.counts.total()
    }

    /// Print a summary plus every actionable entry
    pub fn print_summary(&self) {
        let c = &self.counts;
        println!("\n{}", "=== Conformance Results ===".bold().cyan());
        println!("Total:           {}", self.total());
        println!("Passed:          {} ({:.1}%)", c.pass, self.pass_rate);
        println!("Failed:          {}", c.fail);
        println!("Expected fail:   {}", c.expected_fail);
        println!("Unexpected pass: {}", c.unexpected_pass);
        println!("Skipped:         {}", c.skip);
        if c.error > 0 {
            println!("Harness errors:  {}", c.error);
        }

        if !self.failed.is_empty() {
            println!("\n{}", "=== Failures ===".bold().red());
            for entry in &self.failed {
                println!("{}", entry.path.yellow());
                if let Some(ref detail) = entry.detail {
                    print_indented(detail);
                }
            }
        }

        if !self.unexpected_passes.is_empty() {
            println!(
                "\n{}",
                "=== Unexpected passes (remove from deny list) ===".bold().red()
            );
            for entry in &self.unexpected_passes {
                println!("{}", entry.path.yellow());
                if let Some(ref reason) = entry.reason {
                    println!("    stale reason: {}", reason.dimmed());
                }
            }
        }

        if !self.errors.is_empty() {
            println!("\n{}", "=== Harness errors ===".bold().magenta());
            for entry in &self.errors {
                println!("{}", entry.path.yellow());
                if let Some(ref detail) = entry.detail {
                    print_indented(detail);
                }
            }
        }

        println!();
        if self.success {
            println!("{}", "Run succeeded".green().bold());
        } else {
            println!("{}", "Run failed".red().bold());
        }
    }

    /// Export to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn print_indented(text: &str) {
    let lines: Vec<&str> = text.lines().collect();
    for line in lines.iter().take(MAX_DETAIL_LINES) {
        println!("    {}", line);
    }
    if lines.len() > MAX_DETAIL_LINES {
        println!("    ... {} more lines", lines.len() - MAX_DETAIL_LINES);
    }
}

/// A report saved to disk for later comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedReport {
    pub created_at: DateTime<Utc>,
    /// Corpus root the run was made against
    pub corpus: String,
    pub report: RunReport,
}

impl PersistedReport {
    pub fn new(corpus: impl Into<String>, report: RunReport) -> Self {
        Self {
            created_at: Utc::now(),
            corpus: corpus.into(),
            report,
        }
    }

    /// Write `<timestamp>.json` and `latest.json` into `dir`.
    ///
    /// An existing report with the same timestamp is never overwritten; the
    /// new one gets a `-N` suffix instead.
    pub fn save(&self, dir: &Path) -> HarnessResult<PathBuf> {
        fs::create_dir_all(dir)?;
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;

        let stamp = self.created_at.format("%Y%m%dT%H%M%S%.3fZ").to_string();
        let mut path = dir.join(format!("{}.json", stamp));
        let mut suffix = 1;
        while path.exists() {
            path = dir.join(format!("{}-{}.json", stamp, suffix));
            suffix += 1;
        }
        fs::write(&path, &json)?;
        fs::write(dir.join("latest.json"), &json)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> HarnessResult<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content).map_err(std::io::Error::other)?)
    }
}
