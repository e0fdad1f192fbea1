// File: src/data_block.rs
// Purpose: Split the server-side data script out of a page source

use once_cell::sync::Lazy;
use regex::Regex;

static DATA_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<data>(.*?)</data>").expect("data block pattern is valid"));

/// A page source with its data script separated out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    /// Source with the data block removed; line numbers are preserved
    pub markup: String,
    /// Contents of the first `<data>` block, if any
    pub script: Option<String>,
    /// Zero-based line on which the script text starts in the original source
    pub script_line: usize,
}

/// Extracts the first `<data>…</data>` block (pure function)
///
/// Only the first block is treated as the data script; later blocks stay in
/// the markup. The removed block is replaced by as many newlines as it
/// spanned, so positions reported against the markup still point at the
/// authored file.
///
/// ```
/// use routekit_parser::extract_data_block;
///
/// let block = extract_data_block("<data>#{ id: 1 }</data>\n<h1>Hi</h1>");
/// assert_eq!(block.script.as_deref(), Some("#{ id: 1 }"));
/// assert_eq!(block.markup, "\n<h1>Hi</h1>");
/// ```
pub fn extract_data_block(source: &str) -> DataBlock {
    let Some(captures) = DATA_BLOCK.captures(source) else {
        return DataBlock {
            markup: source.to_string(),
            script: None,
            script_line: 0,
        };
    };

    let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
        return DataBlock {
            markup: source.to_string(),
            script: None,
            script_line: 0,
        };
    };

    let removed_newlines = "\n".repeat(whole.as_str().matches('\n').count());
    let markup = format!(
        "{}{}{}",
        &source[..whole.start()],
        removed_newlines,
        &source[whole.end()..]
    );

    DataBlock {
        markup,
        script: Some(inner.as_str().to_string()),
        script_line: source[..inner.start()].matches('\n').count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_data_block() {
        let block = extract_data_block("<h1>Hello</h1>");
        assert_eq!(block.markup, "<h1>Hello</h1>");
        assert_eq!(block.script, None);
    }

    #[test]
    fn test_first_block_only() {
        let block = extract_data_block("<data>a</data><p>x</p><data>b</data>");
        assert_eq!(block.script.as_deref(), Some("a"));
        assert_eq!(block.markup, "<p>x</p><data>b</data>");
    }

    #[test]
    fn test_multiline_block_keeps_line_numbers() {
        let source = "<script></script>\n<data>\nlet x = 1;\nx\n</data>\n<h1>{data.x}</h1>";
        let block = extract_data_block(source);
        assert_eq!(block.script.as_deref(), Some("\nlet x = 1;\nx\n"));
        assert_eq!(block.script_line, 1);
        assert_eq!(block.markup.lines().count(), source.lines().count());
        assert_eq!(block.markup.lines().last(), Some("<h1>{data.x}</h1>"));
    }
}
