//! TOML configuration for the conformance runner

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::corpus::DEFAULT_EXTENSION;
use crate::error::{HarnessError, HarnessResult};
use crate::filter::FilterSet;

/// Looked up in the working directory when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "conformance.toml";

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Runner configuration loaded from a TOML file
///
/// ```toml
/// corpus = "test262/test/intl402/Number/prototype/toLocaleString"
/// harness_dir = "test262/harness"
/// timeout_secs = 10
/// allow = []
///
/// [engine]
/// command = "hermes"
/// args = ["-Xintl", "{file}"]
///
/// [deny]
/// "throws-same-exceptions-as-NumberFormat.js" = "TypeError expected, RangeError thrown"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Corpus root directory
    pub corpus: Option<PathBuf>,

    /// Directory holding harness includes (`assert.js`, `sta.js`, ...)
    pub harness_dir: Option<PathBuf>,

    /// Test file extension
    pub extension: String,

    /// Per-test timeout in seconds
    pub timeout_secs: u64,

    /// Worker count; 0 or absent means one per CPU
    pub jobs: Option<usize>,

    /// Directory for saved reports
    pub results_dir: PathBuf,

    /// Engine under test
    pub engine: EngineConfig,

    /// If non-empty, only these tests run
    pub allow: Vec<String>,

    /// Known failures: test path -> reason
    pub deny: BTreeMap<String, String>,
}

/// How to invoke the engine under test
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Executable to run
    pub command: Option<PathBuf>,

    /// Arguments; `{file}` is replaced by a temp file holding the test source
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            corpus: None,
            harness_dir: None,
            extension: DEFAULT_EXTENSION.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            jobs: None,
            results_dir: PathBuf::from("results"),
            engine: EngineConfig::default(),
            allow: Vec::new(),
            deny: BTreeMap::new(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::config(format!("failed to read '{}': {}", path.display(), e))
        })?;
        Self::parse(&content)
            .map_err(|e| HarnessError::config(format!("in '{}': {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> HarnessResult<Self> {
        toml::from_str(content).map_err(|e| HarnessError::config(e.to_string()))
    }

    /// Load an explicit file, else `conformance.toml` if present, else defaults.
    ///
    /// An explicitly requested file that cannot be loaded is an error.
    pub fn load_or_default(path: Option<&Path>) -> HarnessResult<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            Self::load(default_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Effective worker count
    pub fn jobs(&self) -> usize {
        match self.jobs {
            Some(n) if n > 0 => n,
            _ => num_cpus::get().max(1),
        }
    }

    pub fn filter_set(&self) -> FilterSet {
        FilterSet::new(self.allow.iter().cloned(), self.deny.clone())
    }

    pub fn corpus_path(&self) -> HarnessResult<&Path> {
        self.corpus
            .as_deref()
            .ok_or_else(|| HarnessError::config("no corpus path given"))
    }

    pub fn engine_command(&self) -> HarnessResult<&Path> {
        self.engine
            .command
            .as_deref()
            .ok_or_else(|| HarnessError::config("no engine command given"))
    }
}
