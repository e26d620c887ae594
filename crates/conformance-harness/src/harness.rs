//! Harness prelude assembly
//!
//! Conformance tests lean on shared helper scripts (`assert.js`, `sta.js`,
//! `testIntl.js`, ...). When a harness directory is configured, those are
//! concatenated ahead of the test body before it is handed to the engine.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::corpus::TestCase;
use crate::metadata::{TestMetadata, strip_frontmatter};

/// Included ahead of every non-raw test
pub const DEFAULT_INCLUDES: &[&str] = &["assert.js", "sta.js"];

/// Provides `$DONE` for async tests
pub const ASYNC_INCLUDE: &str = "doneprintHandle.js";

const STRICT_PREFIX: &str = "\"use strict\";\n";

/// Builds the source actually sent to the engine
#[derive(Debug, Default)]
pub struct Harness {
    dir: Option<PathBuf>,
    cache: Mutex<HashMap<String, Option<Arc<str>>>>,
}

impl Harness {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Prelude + test body, honoring `raw` and `onlyStrict`
    pub fn prepare(&self, case: &TestCase, metadata: &TestMetadata) -> String {
        if metadata.is_raw() {
            return case.source.clone();
        }

        let mut source = String::new();
        if metadata.is_strict() {
            source.push_str(STRICT_PREFIX);
        }

        if self.dir.is_some() {
            let mut includes: Vec<&str> = DEFAULT_INCLUDES.to_vec();
            if metadata.is_async() {
                includes.push(ASYNC_INCLUDE);
            }
            for include in &metadata.includes {
                if !includes.contains(&include.as_str()) {
                    includes.push(include);
                }
            }

            for include in includes {
                match self.load(include) {
                    Some(content) => {
                        source.push_str(&content);
                        source.push('\n');
                    }
                    None => {
                        // A missing default include is fine; a requested one is not.
                        if metadata.includes.iter().any(|i| i == include) {
                            warn!("{}: harness file {} not found", case.path, include);
                        }
                    }
                }
            }
        }

        source.push_str(strip_frontmatter(&case.source));
        source
    }

    fn load(&self, name: &str) -> Option<Arc<str>> {
        let dir = self.dir.as_ref()?;
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache
            .entry(name.to_string())
            .or_insert_with(|| fs::read_to_string(dir.join(name)).ok().map(Arc::from))
            .clone()
    }
}
