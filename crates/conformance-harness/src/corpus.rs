//! Corpus discovery
//!
//! Walks a corpus root and yields every test file in a stable order. Test
//! identity is the path relative to the root, always `/`-separated, so the
//! same ids work in allow/deny lists on every platform.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use crate::error::{HarnessError, HarnessResult};
use crate::metadata::TestMetadata;

/// Default test file extension
pub const DEFAULT_EXTENSION: &str = "js";

/// Marker for helper files that live next to tests but are not tests
const FIXTURE_MARKER: &str = "_FIXTURE";

/// A directory tree of conformance tests
#[derive(Debug, Clone)]
pub struct Corpus {
    root: PathBuf,
    extension: String,
}

/// A discovered test file that has not been read yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestEntry {
    /// Path relative to the corpus root
    pub path: String,
    /// Absolute (or root-joined) location on disk
    pub location: PathBuf,
}

/// One loaded conformance test
#[derive(Debug, Clone)]
pub struct TestCase {
    /// Path relative to the corpus root
    pub path: String,
    /// Raw script content, frontmatter included
    pub source: String,
}

impl Corpus {
    /// Open a corpus rooted at `root`, matching files with `extension`.
    ///
    /// Fails with [`HarnessError::CorpusNotFound`] when the root is missing,
    /// is not a directory, or holds no matching test files.
    pub fn open(root: impl AsRef<Path>, extension: &str) -> HarnessResult<Self> {
        let root = root.as_ref();
        if !root.exists() {
            return Err(HarnessError::corpus_not_found(root, "path does not exist"));
        }
        if !root.is_dir() {
            return Err(HarnessError::corpus_not_found(root, "not a directory"));
        }

        let corpus = Self {
            root: root.to_path_buf(),
            extension: extension.trim_start_matches('.').to_string(),
        };
        if corpus.entries().next().is_none() {
            return Err(HarnessError::corpus_not_found(
                root,
                format!("no .{} test files", corpus.extension),
            ));
        }
        Ok(corpus)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Lazily walk the corpus. Every call starts a fresh walk.
    ///
    /// Siblings are visited so that the resulting relative paths come out in
    /// plain lexicographic order (a directory `a` sorts as `a/`).
    pub fn entries(&self) -> impl Iterator<Item = TestEntry> + '_ {
        WalkDir::new(&self.root)
            .sort_by(|a, b| compare_entries(a, b))
            .into_iter()
            .filter_map(|e| match e {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!("skipping unreadable corpus entry: {}", err);
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .filter(|e| self.is_test_file(e.path()))
            .map(|e| TestEntry {
                path: relative_id(&self.root, e.path()),
                location: e.into_path(),
            })
    }

    /// Relative ids of every test in the corpus, in walk order
    pub fn paths(&self) -> Vec<String> {
        self.entries().map(|e| e.path).collect()
    }

    fn is_test_file(&self, path: &Path) -> bool {
        let matches_ext = path
            .extension()
            .map(|s| s == self.extension.as_str())
            .unwrap_or(false);
        let is_fixture = path
            .file_name()
            .map(|n| n.to_string_lossy().contains(FIXTURE_MARKER))
            .unwrap_or(false);
        matches_ext && !is_fixture
    }
}

impl TestEntry {
    /// Read the test source from disk
    pub fn load(&self) -> std::io::Result<TestCase> {
        let source = fs::read_to_string(&self.location)?;
        Ok(TestCase {
            path: self.path.clone(),
            source,
        })
    }
}

impl TestCase {
    pub fn new(path: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
        }
    }

    /// Frontmatter metadata, or defaults if the block is absent or malformed
    pub fn metadata(&self) -> TestMetadata {
        TestMetadata::parse(&self.source).unwrap_or_default()
    }
}

fn sort_key(entry: &DirEntry) -> String {
    let mut key = entry.file_name().to_string_lossy().into_owned();
    if entry.file_type().is_dir() {
        key.push('/');
    }
    key
}

fn compare_entries(a: &DirEntry, b: &DirEntry) -> Ordering {
    sort_key(a).cmp(&sort_key(b))
}

fn relative_id(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    fn write(dir: &Path, rel: &str, body: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_walk_is_lexicographic_and_skips_fixtures() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "b.js", "");
        write(tmp.path(), "a/z.js", "");
        write(tmp.path(), "a.js", "");
        write(tmp.path(), "a/helper_FIXTURE.js", "");
        write(tmp.path(), "notes.txt", "");

        let corpus = Corpus::open(tmp.path(), "js").unwrap();
        assert_eq!(corpus.paths(), vec!["a.js", "a/z.js", "b.js"]);
    }

    #[test]
    fn test_walk_is_restartable() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "x/one.js", "1;");
        write(tmp.path(), "x/two.js", "2;");

        let corpus = Corpus::open(tmp.path(), ".js").unwrap();
        let first: Vec<_> = corpus.entries().collect();
        let second: Vec<_> = corpus.entries().collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_missing_root() {
        let tmp = TempDir::new().unwrap();
        let err = Corpus::open(tmp.path().join("nope"), "js").unwrap_err();
        assert!(matches!(err, HarnessError::CorpusNotFound { .. }));
    }

    #[test]
    fn test_empty_corpus() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "README.md", "");
        let err = Corpus::open(tmp.path(), "js").unwrap_err();
        assert!(matches!(err, HarnessError::CorpusNotFound { .. }));
    }

    #[test]
    fn test_entry_load() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "dir/case.js", "assert(true);");
        let corpus = Corpus::open(tmp.path(), "js").unwrap();
        let case = corpus.entries().next().unwrap().load().unwrap();
        assert_eq!(case.path, "dir/case.js");
        assert_eq!(case.source, "assert(true);");
    }

    /// Collects the level of every event it sees
    struct LevelRecorder(Arc<Mutex<Vec<Level>>>);

    impl<S: Subscriber> Layer<S> for LevelRecorder {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            self.0.lock().unwrap().push(*event.metadata().level());
        }
    }

    #[test]
    fn test_walk_errors_are_warned() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("corpus");
        write(&root, "a.js", "");
        let corpus = Corpus::open(&root, "js").unwrap();
        fs::remove_dir_all(&root).unwrap();

        let levels = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(LevelRecorder(Arc::clone(&levels)));
        let paths = tracing::subscriber::with_default(subscriber, || corpus.paths());

        assert!(paths.is_empty());
        assert!(levels.lock().unwrap().contains(&Level::WARN));
    }
}
