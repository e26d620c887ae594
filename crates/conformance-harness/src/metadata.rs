//! Test frontmatter parsing

use serde::{Deserialize, Serialize};

/// Metadata from the YAML block between `/*---` and `---*/`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TestMetadata {
    /// Test description
    #[serde(default)]
    pub description: String,

    /// Spec section id
    #[serde(default)]
    pub esid: Option<String>,

    /// Features required by this test
    #[serde(default)]
    pub features: Vec<String>,

    /// Test flags (`onlyStrict`, `raw`, `async`, ...)
    #[serde(default)]
    pub flags: Vec<String>,

    /// Negative test expectation
    #[serde(default)]
    pub negative: Option<NegativeExpectation>,

    /// Harness files this test needs
    #[serde(default)]
    pub includes: Vec<String>,

    /// Locales exercised by Intl tests
    #[serde(default)]
    pub locale: Vec<String>,
}

/// Negative test expectation
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NegativeExpectation {
    /// Phase when the error should occur
    pub phase: ErrorPhase,
    /// Expected error type name, e.g. `TypeError`
    #[serde(rename = "type")]
    pub error_type: String,
}

/// Phase when an error is expected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPhase {
    Parse,
    Early,
    Resolution,
    Runtime,
}

impl std::fmt::Display for ErrorPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorPhase::Parse => write!(f, "parse"),
            ErrorPhase::Early => write!(f, "early"),
            ErrorPhase::Resolution => write!(f, "resolution"),
            ErrorPhase::Runtime => write!(f, "runtime"),
        }
    }
}

impl TestMetadata {
    /// Parse metadata from test file content
    pub fn parse(content: &str) -> Option<Self> {
        let (start, end) = frontmatter_bounds(content)?;
        serde_yaml::from_str(&content[start..end]).ok()
    }

    fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    pub fn is_strict(&self) -> bool {
        self.has_flag("onlyStrict")
    }

    /// Raw tests run exactly as written, without any harness prelude
    pub fn is_raw(&self) -> bool {
        self.has_flag("raw")
    }

    /// Async tests report completion through `$DONE`
    pub fn is_async(&self) -> bool {
        self.has_flag("async")
    }

    /// Expected thrown error type, if this is a negative test
    pub fn expected_error(&self) -> Option<&str> {
        self.negative.as_ref().map(|n| n.error_type.as_str())
    }
}

const OPENER: &str = "/*---";
const TERMINATOR: &str = "---*/";

/// Byte range of the YAML between `/*---` and the next `---*/`
fn frontmatter_bounds(content: &str) -> Option<(usize, usize)> {
    let start = content.find(OPENER)? + OPENER.len();
    let end = start + content[start..].find(TERMINATOR)?;
    Some((start, end))
}

/// Strip the frontmatter block, keeping only the test body
pub fn strip_frontmatter(content: &str) -> &str {
    match frontmatter_bounds(content) {
        Some((_, end)) => &content[end + TERMINATOR.len()..],
        None => content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metadata() {
        let content = r#"
/*---
description: Number.prototype.toLocaleString with options
includes: [testIntl.js]
features: [Intl.NumberFormat-unified]
locale: [en-US, de]
flags: [onlyStrict]
---*/
(1).toLocaleString();
"#;

        let meta = TestMetadata::parse(content).unwrap();
        assert_eq!(meta.description, "Number.prototype.toLocaleString with options");
        assert_eq!(meta.includes, vec!["testIntl.js"]);
        assert_eq!(meta.locale, vec!["en-US", "de"]);
        assert!(meta.is_strict());
        assert!(!meta.is_async());
        assert_eq!(meta.expected_error(), None);
    }

    #[test]
    fn test_negative_expectation() {
        let content = r#"
/*---
description: throws on bad currency
negative:
  phase: runtime
  type: TypeError
---*/
new Intl.NumberFormat("en", {style: "currency"});
"#;

        let meta = TestMetadata::parse(content).unwrap();
        assert_eq!(meta.expected_error(), Some("TypeError"));
        assert_eq!(meta.negative.unwrap().phase, ErrorPhase::Runtime);
    }

    #[test]
    fn test_missing_or_malformed_frontmatter() {
        assert!(TestMetadata::parse("1 + 1;").is_none());
        assert!(TestMetadata::parse("/*--- flags: [unterminated ---*/").is_none());
    }

    #[test]
    fn test_strip_frontmatter() {
        let content = "/*---\ndescription: x\n---*/\nbody();";
        assert_eq!(strip_frontmatter(content), "\nbody();");
        assert_eq!(strip_frontmatter("plain();"), "plain();");
    }

    #[test]
    fn test_decorative_comments_are_not_frontmatter() {
        for content in ["/*---*/\nx();", "/*-----*/\nthrow new Error();", "---*/ /*---"] {
            assert!(TestMetadata::parse(content).is_none(), "{content:?}");
            assert_eq!(strip_frontmatter(content), content);
        }
    }

    #[test]
    fn test_terminator_is_searched_after_opener() {
        let content = "// ---*/ in a comment\n/*---\nflags: [raw]\n---*/\nbody();";
        let meta = TestMetadata::parse(content).unwrap();
        assert!(meta.is_raw());
        assert_eq!(strip_frontmatter(content), "\nbody();");
    }
}
