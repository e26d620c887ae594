//! Result comparison between saved runs

use colored::*;
use std::collections::BTreeMap;
use std::path::Path;

use crate::classify::Outcome;
use crate::error::{HarnessError, HarnessResult};
use crate::report::{PersistedReport, RunReport};

/// Comparison between two runs
#[derive(Debug, Default, PartialEq)]
pub struct RunComparison {
    /// Tests that started succeeding
    pub fixed: Vec<String>,
    /// Tests that stopped succeeding
    pub broken: Vec<String>,
    /// Denied tests that pass now and did not before
    pub new_stale_denials: Vec<String>,
    /// Tests present only in the new run
    pub added: Vec<String>,
    /// Tests present only in the base run
    pub removed: Vec<String>,
    /// Delta in pass count
    pub pass_delta: i64,
    /// Delta in fail count
    pub fail_delta: i64,
    pub base_pass_rate: f64,
    pub new_pass_rate: f64,
}

/// Outcome of every test in a report, keyed by path
pub fn outcome_map(report: &RunReport) -> BTreeMap<&str, Outcome> {
    let mut map = BTreeMap::new();
    for path in &report.passed {
        map.insert(path.as_str(), Outcome::Pass);
    }
    for path in &report.skipped {
        map.insert(path.as_str(), Outcome::Skip);
    }
    for (entries, outcome) in [
        (&report.failed, Outcome::Fail),
        (&report.expected_failures, Outcome::ExpectedFail),
        (&report.unexpected_passes, Outcome::UnexpectedPass),
        (&report.errors, Outcome::Error),
    ] {
        for entry in entries {
            map.insert(entry.path.as_str(), outcome);
        }
    }
    map
}

fn succeeded(outcome: Outcome) -> bool {
    matches!(outcome, Outcome::Pass | Outcome::UnexpectedPass)
}

fn failed(outcome: Outcome) -> bool {
    matches!(outcome, Outcome::Fail | Outcome::ExpectedFail)
}

impl RunComparison {
    pub fn compare(base: &RunReport, new: &RunReport) -> Self {
        let base_outcomes = outcome_map(base);
        let new_outcomes = outcome_map(new);

        let mut cmp = RunComparison {
            pass_delta: new.counts.pass as i64 - base.counts.pass as i64,
            fail_delta: new.counts.fail as i64 - base.counts.fail as i64,
            base_pass_rate: base.pass_rate,
            new_pass_rate: new.pass_rate,
            ..Default::default()
        };

        // BTreeMap iteration keeps every list sorted.
        for (path, new_outcome) in &new_outcomes {
            let Some(base_outcome) = base_outcomes.get(path) else {
                cmp.added.push(path.to_string());
                continue;
            };
            if failed(*base_outcome) && succeeded(*new_outcome) {
                cmp.fixed.push(path.to_string());
            }
            if succeeded(*base_outcome) && failed(*new_outcome) {
                cmp.broken.push(path.to_string());
            }
            if *new_outcome == Outcome::UnexpectedPass && *base_outcome != Outcome::UnexpectedPass {
                cmp.new_stale_denials.push(path.to_string());
            }
        }
        cmp.removed = base_outcomes
            .keys()
            .filter(|p| !new_outcomes.contains_key(*p))
            .map(|p| p.to_string())
            .collect();

        cmp
    }

    /// Regressions make a comparison fail
    pub fn has_regressions(&self) -> bool {
        !self.broken.is_empty()
    }

    /// Print the comparison as a colored report
    pub fn print(&self) {
        println!("{}", "=== Conformance Run Comparison ===".bold().cyan());
        println!();

        let rate_delta = self.new_pass_rate - self.base_pass_rate;
        let rate_str = if rate_delta >= 0.0 {
            format!("+{:.2}%", rate_delta).green()
        } else {
            format!("{:.2}%", rate_delta).red()
        };
        println!(
            "Pass rate: {:.2}% → {:.2}% ({})",
            self.base_pass_rate, self.new_pass_rate, rate_str
        );

        let pass_str = if self.pass_delta >= 0 {
            format!("+{}", self.pass_delta).green()
        } else {
            format!("{}", self.pass_delta).red()
        };
        println!("Pass delta: {}  Fail delta: {:+}", pass_str, self.fail_delta);

        print_list("Fixed tests".green().bold(), "+".green(), &self.fixed, 20);
        print_list("Regressions".red().bold(), "-".red(), &self.broken, 20);
        print_list(
            "Stale denials".yellow().bold(),
            "!".yellow(),
            &self.new_stale_denials,
            20,
        );
        print_list("Added tests".dimmed(), "+".dimmed(), &self.added, 10);
        print_list("Removed tests".dimmed(), "-".dimmed(), &self.removed, 10);

        if self.fixed.is_empty()
            && self.broken.is_empty()
            && self.new_stale_denials.is_empty()
            && self.added.is_empty()
            && self.removed.is_empty()
        {
            println!();
            println!("{}", "No changes detected.".dimmed());
        }
    }
}

fn print_list(title: ColoredString, marker: ColoredString, tests: &[String], limit: usize) {
    if tests.is_empty() {
        return;
    }
    println!();
    println!("{} ({}):", title, tests.len());
    for test in tests.iter().take(limit) {
        println!("  {} {}", marker, test);
    }
    if tests.len() > limit {
        println!("  ... and {} more", tests.len() - limit);
    }
}

/// Compare two saved reports from disk
pub fn compare_files(base_path: &Path, new_path: &Path) -> HarnessResult<RunComparison> {
    let base = PersistedReport::load(base_path).map_err(|e| {
        HarnessError::config(format!(
            "failed to load base report '{}': {}",
            base_path.display(),
            e
        ))
    })?;
    let new = PersistedReport::load(new_path).map_err(|e| {
        HarnessError::config(format!(
            "failed to load new report '{}': {}",
            new_path.display(),
            e
        ))
    })?;

    Ok(RunComparison::compare(&base.report, &new.report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{RunAggregator, TestRecord};
    use std::time::Duration;

    fn report(records: &[(&str, Outcome)]) -> RunReport {
        let mut agg = RunAggregator::new();
        for (path, outcome) in records {
            agg.record(TestRecord::new(*path, *outcome, Duration::ZERO));
        }
        agg.finish()
    }

    #[test]
    fn test_compare_runs() {
        let base = report(&[
            ("a.js", Outcome::Pass),
            ("b.js", Outcome::ExpectedFail),
            ("c.js", Outcome::Fail),
            ("d.js", Outcome::Pass),
            ("old.js", Outcome::Pass),
        ]);
        let new = report(&[
            ("a.js", Outcome::Pass),
            ("b.js", Outcome::UnexpectedPass),
            ("c.js", Outcome::Pass),
            ("d.js", Outcome::Fail),
            ("new.js", Outcome::Skip),
        ]);

        let cmp = RunComparison::compare(&base, &new);
        assert_eq!(cmp.fixed, vec!["b.js", "c.js"]);
        assert_eq!(cmp.broken, vec!["d.js"]);
        assert_eq!(cmp.new_stale_denials, vec!["b.js"]);
        assert_eq!(cmp.added, vec!["new.js"]);
        assert_eq!(cmp.removed, vec!["old.js"]);
        assert_eq!(cmp.pass_delta, -1);
        assert_eq!(cmp.fail_delta, 0);
        assert!(cmp.has_regressions());
    }

    #[test]
    fn test_identical_runs() {
        let run = report(&[("a.js", Outcome::Pass), ("b.js", Outcome::ExpectedFail)]);
        let cmp = RunComparison::compare(&run, &run);
        assert!(!cmp.has_regressions());
        assert!(cmp.fixed.is_empty());
        assert!(cmp.added.is_empty() && cmp.removed.is_empty());
    }
}
