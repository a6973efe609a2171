//! Text formatting helpers shared by the IR printer and the DOT writer.

use std::fmt;

/// Line-oriented writer with a configurable indent unit.
#[derive(Debug)]
pub struct CodeFormatter {
    lines: Vec<String>,
    depth: usize,
    unit: String,
}

impl CodeFormatter {
    pub fn new(unit: &str) -> Self {
        Self { lines: Vec::new(), depth: 0, unit: unit.to_string() }
    }

    pub fn indent(&mut self) {
        self.depth += 1;
    }

    pub fn dedent(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Append one line at the current depth. Empty lines carry no indent.
    pub fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if text.is_empty() {
            self.lines.push(String::new());
        } else {
            self.lines.push(format!("{}{}", self.unit.repeat(self.depth), text));
        }
    }

    /// `header {` followed by one more level of indent.
    pub fn open(&mut self, header: impl AsRef<str>) {
        self.line(format!("{} {{", header.as_ref()));
        self.indent();
    }

    pub fn close(&mut self) {
        self.dedent();
        self.line("}");
    }

    /// Joined output, newline-terminated.
    pub fn finish(self) -> String {
        let mut out = self.lines.join("\n");
        if !self.lines.is_empty() {
            out.push('\n');
        }
        out
    }
}

pub fn format_list<T: fmt::Display>(items: &[T], sep: &str) -> String {
    items.iter().map(|x| x.to_string()).collect::<Vec<_>>().join(sep)
}

/// Escape a string for a double-quoted DOT label. Newlines become
/// left-justified breaks.
pub fn escape_label(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\l"),
            _ => out.push(c),
        }
    }
    out
}
