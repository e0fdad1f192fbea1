// File: src/script/source_map.rs
// Purpose: Map positions in executed script text back to the authored file

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Lines of context shown on each side of the failing line
const CONTEXT_LINES: usize = 2;

/// A column shift introduced by rewriting one line
#[derive(Debug, Clone, PartialEq, Eq)]
struct Shift {
    /// One-based line of the executed text (prelude excluded)
    line: usize,
    /// One-based executed column after which the shift applies
    column: usize,
    delta: isize,
}

/// Executed text = prelude + rewritten script; the script starts at
/// `file_line` of the authored file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMap {
    prelude_lines: usize,
    file_line: usize,
    shifts: Vec<Shift>,
}

impl SourceMap {
    /// `file_line` is the zero-based line of the authored file the script starts on
    pub fn new(prelude_lines: usize, file_line: usize) -> Self {
        Self {
            prelude_lines,
            file_line,
            shifts: Vec::new(),
        }
    }

    /// Records that text after `column` on script `line` moved by `delta`
    pub fn record_shift(&mut self, line: usize, column: usize, delta: isize) {
        if delta != 0 {
            self.shifts.push(Shift { line, column, delta });
        }
    }

    pub fn prelude_lines(&self) -> usize {
        self.prelude_lines
    }

    /// One-based script line of an executed line (prelude lines map to 1)
    pub fn script_line(&self, executed_line: usize) -> usize {
        executed_line.saturating_sub(self.prelude_lines).max(1)
    }

    /// Translates an executed (line, column) into the authored file (both one-based)
    pub fn to_authored(&self, executed_line: usize, executed_column: usize) -> (usize, usize) {
        let line = self.script_line(executed_line);
        let shifted: isize = self
            .shifts
            .iter()
            .filter(|shift| shift.line == line && executed_column > shift.column)
            .map(|shift| shift.delta)
            .sum();
        let column = (executed_column as isize - shifted).max(1) as usize;
        (line + self.file_line, column)
    }

    /// Builds a diagnostic against the authored script text
    pub fn diagnostic(
        &self,
        file: impl Into<PathBuf>,
        script: &str,
        executed: Option<(usize, usize)>,
        message: impl Into<String>,
    ) -> Diagnostic {
        let (line, column) = executed
            .map(|(line, column)| self.to_authored(line, column))
            .unwrap_or((self.file_line + 1, 1));

        let script_lines: Vec<&str> = script.lines().collect();
        let failing = line.saturating_sub(self.file_line);
        let first = failing.saturating_sub(CONTEXT_LINES).max(1);
        let last = (failing + CONTEXT_LINES).min(script_lines.len());

        let context = (first..=last)
            .filter_map(|script_line| {
                script_lines
                    .get(script_line - 1)
                    .map(|text| (script_line + self.file_line, text.to_string()))
            })
            .collect();

        Diagnostic {
            file: file.into(),
            line,
            column,
            message: message.into(),
            context,
        }
    }
}

/// A located script error with surrounding source lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub file: PathBuf,
    /// One-based line in the authored file
    pub line: usize,
    pub column: usize,
    pub message: String,
    /// (file line, text) around the failing line
    pub context: Vec<(usize, String)>,
}

impl Diagnostic {
    /// Header plus the context lines, the failing one marked with `>` and a caret
    ///
    /// ```text
    /// site/index.page:4:9: Variable not found: missing
    ///     3 | let a = 1;
    /// >   4 | let b = missing;
    ///       |         ^
    ///     5 | b
    /// ```
    pub fn render(&self) -> String {
        let width = self
            .context
            .iter()
            .map(|(line, _)| line.to_string().len())
            .max()
            .unwrap_or(1);

        let mut out = format!("{self}\n");
        for (line, text) in &self.context {
            let marker = if *line == self.line { '>' } else { ' ' };
            out.push_str(&format!("{marker} {line:>width$} | {text}\n"));
            if *line == self.line {
                out.push_str(&format!(
                    "  {:>width$} | {}^\n",
                    "",
                    " ".repeat(self.column.saturating_sub(1))
                ));
            }
        }
        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}",
            self.file.display(),
            self.line,
            self.column,
            self.message
        )
    }
}
