//! Per-compilation diagnostics.
//!
//! The original tool logged through a process-wide singleton; every pass
//! here instead threads a [`Diagnostics`] value through explicitly and
//! appends to it, so running the compiler as a library (one call per
//! compilation) never leaks state between runs.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub line: u32,
    /// Which pipeline stage raised this, e.g. `"symtab"`, `"typecheck"`.
    /// Left empty at construction time; [`Diagnostics::tag_phase`] fills it
    /// in after each pass returns, since the passes themselves don't know
    /// their own stage name.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub phase: String,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, line: u32) -> Self {
        Diagnostic {
            severity: Severity::Error,
            message: message.into(),
            line,
            phase: String::new(),
        }
    }

    pub fn warning(message: impl Into<String>, line: u32) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
            line,
            phase: String::new(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: line {}: {}", self.severity, self.line, self.message)
    }
}

/// Collects the diagnostics of one compilation job.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    pub fn push(&mut self, diag: Diagnostic) {
        self.items.push(diag);
    }

    pub fn error(&mut self, message: impl Into<String>, line: u32) {
        self.push(Diagnostic::error(message, line));
    }

    pub fn warning(&mut self, message: impl Into<String>, line: u32) {
        self.push(Diagnostic::warning(message, line));
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Diagnostics in source-line order, the order a human reads a listing.
    pub fn sorted(&self) -> Vec<&Diagnostic> {
        let mut v: Vec<&Diagnostic> = self.items.iter().collect();
        v.sort_by_key(|d| d.line);
        v
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    /// Stamps every diagnostic from `from_index` onward with `phase`. A
    /// pipeline stage doesn't know its own name, so the orchestrator records
    /// `diags.len()` before running a pass and tags the new tail after.
    pub fn tag_phase(&mut self, from_index: usize, phase: &str) {
        for d in &mut self.items[from_index..] {
            if d.phase.is_empty() {
                d.phase = phase.to_string();
            }
        }
    }

    /// Renders every diagnostic as one line, sorted by source line.
    pub fn render(&self) -> String {
        self.sorted()
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_errors_distinguishes_warnings_from_errors() {
        let mut diags = Diagnostics::new();
        diags.warning("shadowed member", 3);
        assert!(!diags.has_errors());
        diags.error("undefined type 'Bogus'", 10);
        assert!(diags.has_errors());
    }

    #[test]
    fn sorted_orders_by_line() {
        let mut diags = Diagnostics::new();
        diags.error("b", 20);
        diags.error("a", 5);
        let sorted = diags.sorted();
        assert_eq!(sorted[0].line, 5);
        assert_eq!(sorted[1].line, 20);
    }

    #[test]
    fn render_matches_display_format() {
        let mut diags = Diagnostics::new();
        diags.error("bad", 7);
        assert_eq!(diags.render(), "error: line 7: bad");
    }
}
