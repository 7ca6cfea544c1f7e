//! Source fragments: slices of source text carrying enough positional
//! information to build precise diagnostics.
//!
//! This plays the role that [`grill::location::Location`] and
//! [`grill::scope::Scope`] play in the JSON Schema evaluator: a small,
//! cheaply cloned value threaded through every parse and render call so
//! errors can always point at the exact row, column, and source line that
//! produced them.

use std::fmt;
use std::rc::Rc;

/// A named source, shared by every [`Fragment`] that originates from it.
///
/// `name` is `None` for in-memory strings passed to [`crate::parse`] and
/// `Some(path)` for anything reached through [`crate::parse_file`] or
/// `#include`.
#[derive(Debug, PartialEq, Eq)]
pub struct Origin {
    pub name: Option<String>,
}

/// A substring view of one logical line of Tyco source.
///
/// `(row, column)` are both 1-based. `line_text` is the full line the
/// fragment was taken from, with any trailing newline stripped, and is
/// retained purely for diagnostics -- it is not reparsed.
#[derive(Debug, Clone)]
pub struct Fragment {
    text: String,
    row: usize,
    column: usize,
    origin: Rc<Origin>,
    line_text: String,
}

impl Fragment {
    #[must_use]
    pub fn new(text: impl Into<String>, row: usize, column: usize, origin: Rc<Origin>) -> Self {
        let text = text.into();
        let line_text = text.clone();
        Self {
            text,
            row,
            column,
            origin,
            line_text,
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn row(&self) -> usize {
        self.row
    }

    #[must_use]
    pub fn column(&self) -> usize {
        self.column
    }

    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.origin.name.as_deref()
    }

    #[must_use]
    pub fn line_text(&self) -> &str {
        &self.line_text
    }

    /// Returns a new fragment for the substring `text[start..]`, with
    /// `(row, column)` advanced to account for any consumed newlines.
    ///
    /// Invariant: the returned fragment's `(row, column)` equals this
    /// fragment's position advanced by the characters in `text[..start]`.
    #[must_use]
    pub fn slice(&self, start: usize) -> Self {
        self.slice_range(start, self.text.len())
    }

    /// Returns a fragment for `text[start..end]`, advancing position the
    /// same way [`Fragment::slice`] does.
    #[must_use]
    pub fn slice_range(&self, start: usize, end: usize) -> Self {
        let consumed = &self.text[..start];
        let mut row = self.row;
        let mut column = self.column;
        for ch in consumed.chars() {
            if ch == '\n' {
                row += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        Self {
            text: self.text[start..end].to_string(),
            row,
            column,
            origin: Rc::clone(&self.origin),
            line_text: self.line_text.clone(),
        }
    }

    /// Strips leading ASCII whitespace, returning a fragment whose position
    /// is advanced past the stripped characters.
    #[must_use]
    pub fn trim_leading_ws(&self) -> Self {
        let stripped = self.text.len() - self.text.trim_start().len();
        self.slice(stripped)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source() {
            Some(source) => write!(f, "{source}:{}:{}", self.row, self.column),
            None => write!(f, "{}:{}", self.row, self.column),
        }
    }
}

/// Normalizes CRLF to LF and splits `text` into one [`Fragment`] per logical
/// line, each starting at column 1 of its row and keeping the trailing
/// newline as part of its `text` (but not its `line_text`).
///
/// Empty input yields no fragments.
#[must_use]
pub fn coerce_content_to_fragments(text: &str, source: Option<String>) -> Vec<Fragment> {
    if text.is_empty() {
        return Vec::new();
    }
    let normalized = text.replace("\r\n", "\n");
    let origin = Rc::new(Origin { name: source });
    let mut fragments = Vec::new();
    let mut row = 1;
    let mut rest = normalized.as_str();
    loop {
        match rest.find('\n') {
            Some(idx) => {
                let line_text = rest[..idx].to_string();
                let mut text = line_text.clone();
                text.push('\n');
                fragments.push(Fragment {
                    text,
                    row,
                    column: 1,
                    origin: Rc::clone(&origin),
                    line_text,
                });
                rest = &rest[idx + 1..];
                row += 1;
            }
            None => {
                if !rest.is_empty() {
                    fragments.push(Fragment {
                        text: rest.to_string(),
                        row,
                        column: 1,
                        origin: Rc::clone(&origin),
                        line_text: rest.to_string(),
                    });
                }
                break;
            }
        }
    }
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_newline_and_normalizes_crlf() {
        let fragments = coerce_content_to_fragments("a\r\nb\nc", None);
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].line_text(), "a");
        assert_eq!(fragments[1].row(), 2);
        assert_eq!(fragments[2].line_text(), "c");
    }

    #[test]
    fn empty_input_yields_no_fragments() {
        assert!(coerce_content_to_fragments("", None).is_empty());
    }

    #[test]
    fn slice_advances_row_on_embedded_newline() {
        let origin = Rc::new(Origin { name: None });
        let fragment = Fragment::new("ab\ncd", 1, 1, origin);
        let sliced = fragment.slice(3);
        assert_eq!(sliced.row(), 2);
        assert_eq!(sliced.column(), 1);
        assert_eq!(sliced.text(), "cd");
    }

    #[test]
    fn trim_leading_ws_advances_column() {
        let origin = Rc::new(Origin { name: None });
        let fragment = Fragment::new("   x", 3, 1, origin);
        let trimmed = fragment.trim_leading_ws();
        assert_eq!(trimmed.column(), 4);
        assert_eq!(trimmed.text(), "x");
    }
}
