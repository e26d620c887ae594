//! Allow/deny filtering
//!
//! `allow` narrows what runs; `deny` records tracked defects. Denied tests
//! still execute so that a fixed defect surfaces as an unexpected pass.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::warn;

use crate::error::{HarnessError, HarnessResult};

/// Where a discovered test stands before anything runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    Run,
    /// Runs, but is expected to fail
    Denied,
    /// Left out by the allow list
    Skip,
}

/// Which discovered tests run and which are expected to fail
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    allow: BTreeSet<String>,
    deny: BTreeMap<String, String>,
}

impl FilterSet {
    /// Build from an allow list and a `path -> reason` deny map.
    ///
    /// A path listed in both keeps its denial.
    pub fn new<A, D>(allow: A, deny: D) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        D: IntoIterator<Item = (String, String)>,
    {
        let allow: BTreeSet<String> = allow.into_iter().map(Into::into).collect();
        let deny: BTreeMap<String, String> = deny.into_iter().collect();

        for path in allow.iter().filter(|p| deny.contains_key(p.as_str())) {
            warn!("{} is both allowed and denied; treating it as denied", path);
        }

        Self { allow, deny }
    }

    /// True unless a non-empty allow list leaves this path out
    pub fn should_run(&self, path: &str) -> bool {
        self.allow.is_empty() || self.allow.contains(path)
    }

    pub fn is_expected_failure(&self, path: &str) -> bool {
        self.deny.contains_key(path)
    }

    /// Recorded reason for a denial
    pub fn deny_reason(&self, path: &str) -> Option<&str> {
        self.deny.get(path).map(String::as_str)
    }

    pub fn plan_status(&self, path: &str) -> PlanStatus {
        if !self.should_run(path) {
            PlanStatus::Skip
        } else if self.is_expected_failure(path) {
            PlanStatus::Denied
        } else {
            PlanStatus::Run
        }
    }

    pub fn allow(&self) -> &BTreeSet<String> {
        &self.allow
    }

    pub fn deny(&self) -> &BTreeMap<String, String> {
        &self.deny
    }

    /// Reject allow/deny entries that name nothing in the corpus
    pub fn validate<'a>(&self, known: impl IntoIterator<Item = &'a str>) -> HarnessResult<()> {
        let known: HashSet<&str> = known.into_iter().collect();

        let unknown_allow: Vec<&str> = self
            .allow
            .iter()
            .map(String::as_str)
            .filter(|p| !known.contains(p))
            .collect();
        let unknown_deny: Vec<&str> = self
            .deny
            .keys()
            .map(String::as_str)
            .filter(|p| !known.contains(p))
            .collect();

        if unknown_allow.is_empty() && unknown_deny.is_empty() {
            return Ok(());
        }

        let mut parts = Vec::new();
        if !unknown_allow.is_empty() {
            parts.push(format!("allow lists unknown tests: {}", unknown_allow.join(", ")));
        }
        if !unknown_deny.is_empty() {
            parts.push(format!("deny lists unknown tests: {}", unknown_deny.join(", ")));
        }
        Err(HarnessError::config(parts.join("; ")))
    }
}
