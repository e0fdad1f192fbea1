// File: src/error.rs
// Purpose: Compile errors with source locations

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A markup compile error pointing into the authored file
///
/// `line` and `column` are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{}:{line}:{column}: {message}", file.display())]
pub struct CompileError {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl CompileError {
    /// Builds an error at a byte offset of `source`
    pub fn at_offset(
        file: impl AsRef<Path>,
        source: &str,
        offset: usize,
        message: impl Into<String>,
    ) -> Self {
        let (line, column) = line_column(source, offset);
        Self {
            file: file.as_ref().to_path_buf(),
            line,
            column,
            message: message.into(),
        }
    }
}

/// 1-based line and column of a byte offset
pub fn line_column(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let column = match before.rfind('\n') {
        Some(newline) => before[newline + 1..].chars().count() + 1,
        None => before.chars().count() + 1,
    };
    (line, column)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_column() {
        let source = "ab\ncd\nef";
        assert_eq!(line_column(source, 0), (1, 1));
        assert_eq!(line_column(source, 4), (2, 2));
        assert_eq!(line_column(source, 6), (3, 1));
        assert_eq!(line_column(source, 100), (3, 3));
    }

    #[test]
    fn test_display() {
        let error = CompileError::at_offset("site/index.page", "x\n{", 2, "unclosed `{`");
        assert_eq!(error.to_string(), "site/index.page:2:1: unclosed `{`");
    }
}
