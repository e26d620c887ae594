//! # Conformance Harness
//!
//! Runs a directory of conformance test scripts (for example the test262
//! `intl402` tree) against an engine under test and triages the results
//! against a curated list of known failures.
//!
//! The pipeline is one-directional: [`corpus`] discovers tests, [`filter`]
//! decides what runs and what is expected to fail, [`engine`] executes,
//! [`classify`] maps raw results to outcomes, and [`report`] aggregates them.

#![warn(clippy::all)]

pub mod classify;
pub mod compare;
pub mod config;
pub mod corpus;
pub mod engine;
pub mod error;
pub mod filter;
pub mod harness;
pub mod metadata;
pub mod parallel;
pub mod process;
pub mod report;
pub mod runner;

pub use classify::{Outcome, Verdict};
pub use config::HarnessConfig;
pub use corpus::{Corpus, TestCase, TestEntry};
pub use engine::{Engine, ExecutionRequest, ExecutionResult, ExitSignal, ThrownError};
pub use error::{HarnessError, HarnessResult};
pub use filter::{FilterSet, PlanStatus};
pub use process::ProcessEngine;
pub use report::{RunAggregator, RunReport, TestRecord};
pub use runner::{CancelToken, ConformanceRunner};
