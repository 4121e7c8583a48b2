//! SF-002: Diagnostics: non-fatal errors and warnings accumulated while
//! loading a stack configuration tree.
//!
//! Diagnostics are collected bottom-up through the recursive load and merged at
//! every level. Nothing here deduplicates: callers check `has_errors()` before
//! trusting a result as complete.

use serde::Serialize;
use std::fmt;

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "Error"),
            Self::Warning => write!(f, "Warning"),
        }
    }
}

/// Where in a stack file a diagnostic points.
///
/// YAML decoding does not give spans for every value, so declarations are
/// located by file name plus the dotted key path of the offending field.
/// Syntax errors carry the line and column reported by the YAML parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRange {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
}

impl SourceRange {
    pub fn file(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            path: None,
            line: None,
            column: None,
        }
    }

    pub fn at_path(filename: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::file(filename)
        }
    }

    pub fn at_position(filename: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            line: Some(line),
            column: Some(column),
            ..Self::file(filename)
        }
    }

    /// A range for a nested field of this declaration.
    pub fn child(&self, key: &str) -> Self {
        let path = match &self.path {
            Some(p) => format!("{}.{}", p, key),
            None => key.to_string(),
        };
        Self {
            path: Some(path),
            ..self.clone()
        }
    }
}

impl fmt::Display for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.filename)?;
        if let Some(line) = self.line {
            write!(f, ":{}", line)?;
            if let Some(col) = self.column {
                write!(f, ":{}", col)?;
            }
        }
        if let Some(ref path) = self.path {
            write!(f, " ({})", path)?;
        }
        Ok(())
    }
}

/// A single diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<SourceRange>,
}

impl Diagnostic {
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            summary: summary.into(),
            detail: String::new(),
            subject: None,
        }
    }

    pub fn warning(summary: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(summary)
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn with_subject(mut self, subject: SourceRange) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.summary)?;
        if let Some(ref subject) = self.subject {
            write!(f, "\n  on {}", subject)?;
        }
        if !self.detail.is_empty() {
            write!(f, "\n\n{}", self.detail)?;
        }
        Ok(())
    }
}

/// An ordered, growable collection of diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diag: Diagnostic) {
        self.0.push(diag);
    }

    /// Append every diagnostic from `other`, preserving order.
    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.is_error())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Count diagnostics whose summary matches exactly.
    pub fn count_summary(&self, summary: &str) -> usize {
        self.0.iter().filter(|d| d.summary == summary).count()
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(diag: Diagnostic) -> Self {
        Self(vec![diag])
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sf002_has_errors_ignores_warnings() {
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::warning("just a warning"));
        assert!(!diags.has_errors());
        diags.push(Diagnostic::error("broken"));
        assert!(diags.has_errors());
        assert_eq!(diags.errors().count(), 1);
    }

    #[test]
    fn test_sf002_extend_preserves_order() {
        let mut a = Diagnostics::from(Diagnostic::error("first"));
        let mut b = Diagnostics::new();
        b.push(Diagnostic::error("second"));
        b.push(Diagnostic::error("third"));
        a.extend(b);
        let summaries: Vec<_> = a.iter().map(|d| d.summary.as_str()).collect();
        assert_eq!(summaries, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_sf002_display_includes_subject_and_detail() {
        let diag = Diagnostic::error("Invalid source address")
            .with_detail("Cannot use \"../x\" as a source address here.")
            .with_subject(SourceRange::at_path("main.stack.yaml", "stacks.net.source"));
        let text = diag.to_string();
        assert!(text.starts_with("Error: Invalid source address"));
        assert!(text.contains("on main.stack.yaml (stacks.net.source)"));
        assert!(text.contains("Cannot use"));
    }

    #[test]
    fn test_sf002_source_range_child() {
        let r = SourceRange::at_path("a.stack.yaml", "components.db");
        assert_eq!(r.child("source").path.as_deref(), Some("components.db.source"));
        let pos = SourceRange::at_position("a.stack.yaml", 3, 7);
        assert_eq!(pos.to_string(), "a.stack.yaml:3:7");
    }

    #[test]
    fn test_sf002_count_summary() {
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::error("A"));
        diags.push(Diagnostic::error("B"));
        diags.push(Diagnostic::error("A"));
        assert_eq!(diags.count_summary("A"), 2);
        assert_eq!(diags.count_summary("C"), 0);
    }
}
