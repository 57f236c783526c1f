//! Pretty multi-line output for function results and stderr.

use std::fmt::Write;

/// Indentation of detail lines under a `[FAIL]` / `[PASS]` header.
const LINE_INDENT: usize = 4;
pub const DEFAULT_TRUNCATE_LINES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Truncation {
    pub enabled: bool,
    pub max_lines: usize,
}

impl Default for Truncation {
    fn default() -> Self {
        Self { enabled: true, max_lines: DEFAULT_TRUNCATE_LINES }
    }
}

impl Truncation {
    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::default() }
    }
}

/// Indent `lines`, optionally quoting each, and cap them per `truncation`.
pub fn format_lines<S: AsRef<str>>(lines: &[S], quote: bool, truncation: Truncation) -> String {
    let indent = " ".repeat(LINE_INDENT);
    let limit = if truncation.enabled { truncation.max_lines } else { usize::MAX };
    let mut b = String::new();
    for line in lines.iter().take(limit) {
        let line = line.as_ref().replace('\n', " ");
        if quote {
            let _ = writeln!(b, "{}{:?}", indent, line);
        } else {
            let _ = writeln!(b, "{}{}", indent, line);
        }
    }
    let elided = lines.len().saturating_sub(limit);
    if elided > 0 {
        let _ = writeln!(
            b,
            "{}...({} line(s) truncated, use '--truncate-output=false' to disable)",
            indent, elided
        );
    }
    b
}
