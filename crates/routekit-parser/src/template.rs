// File: src/template.rs
// Purpose: Parse page/component sources into script, markup nodes and style

use crate::error::CompileError;
use crate::imports::{parse_imports, strip_imports, Import};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;

static EXPORT_DATA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*export\s+let\s+data\s*;?[ \t]*$").expect("export pattern is valid")
});

static PATH_EXPRESSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_$][\w$]*(\.[\w$]+)*$").expect("path pattern is valid")
});

/// One piece of markup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "camelCase")]
pub enum Node {
    /// Literal markup, emitted as-is
    Text { text: String },
    /// `{data.path}`, HTML-escaped
    Expr { path: Vec<String> },
    /// `{@html data.path}`, emitted raw
    Html { path: Vec<String> },
    /// `<Name />` for an imported component
    ///
    /// `module` is filled in when the importing module is linked.
    Component {
        name: String,
        module: Option<String>,
    },
}

/// Parsed markup of one page or component
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub nodes: Vec<Node>,
}

/// A parsed page or component source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    /// Script block statements other than imports and `export let data`
    pub script: String,
    /// Import statements of the script block (spans relative to the block)
    pub imports: Vec<Import>,
    /// Raw text of the script block, used to slice `imports`
    pub script_source: String,
    pub template: Template,
    pub style: Option<String>,
}

impl Component {
    /// Bindings that can be used as `<Name />` tags
    pub fn component_bindings(&self) -> impl Iterator<Item = &str> {
        self.imports.iter().filter_map(|import| import.default_binding())
    }
}

/// Parses a component source (pure function)
///
/// The first `<script>` and `<style>` blocks are taken out; everything else
/// is markup.
///
/// ```
/// use routekit_parser::{parse_component, Node};
/// use std::path::Path;
///
/// let component = parse_component("<h1>{data.title}</h1>", Path::new("a.page")).unwrap();
/// assert_eq!(component.template.nodes[1], Node::Expr { path: vec!["title".to_string()] });
/// ```
pub fn parse_component(source: &str, file: &Path) -> Result<Component, CompileError> {
    let script_block = find_block(source, file, "script")?;
    let style_block = find_block(source, file, "style")?;

    let script_source = script_block
        .as_ref()
        .map(|block| source[block.inner.clone()].to_string())
        .unwrap_or_default();
    let imports = parse_imports(&script_source);
    let script = EXPORT_DATA
        .replace_all(&strip_imports(&script_source, &imports), "")
        .trim()
        .to_string();

    let style = style_block
        .as_ref()
        .map(|block| source[block.inner.clone()].trim().to_string())
        .filter(|style| !style.is_empty());

    let mut excluded: Vec<Range<usize>> = [script_block, style_block]
        .into_iter()
        .flatten()
        .map(|block| block.outer)
        .collect();
    excluded.sort_by_key(|range| range.start);
    excluded.push(source.len()..source.len());

    let known: Vec<&str> = imports.iter().filter_map(|i| i.default_binding()).collect();
    let mut nodes = Vec::new();
    let mut cursor = 0;
    for range in &excluded {
        if range.start > cursor {
            parse_markup(source, cursor..range.start, file, &known, &mut nodes)?;
        }
        cursor = cursor.max(range.end);
    }

    Ok(Component {
        script,
        imports,
        script_source,
        template: Template {
            nodes: trim_edges(nodes),
        },
        style,
    })
}

struct Block {
    outer: Range<usize>,
    inner: Range<usize>,
}

fn find_block(source: &str, file: &Path, tag: &str) -> Result<Option<Block>, CompileError> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");

    let mut search_from = 0;
    let start = loop {
        let Some(offset) = source[search_from..].find(&open) else {
            return Ok(None);
        };
        let start = search_from + offset;
        let next = source[start + open.len()..].chars().next();
        if matches!(next, Some('>') | Some(' ') | Some('\t') | Some('\n') | Some('\r')) {
            break start;
        }
        search_from = start + open.len();
    };

    let open_end = source[start..]
        .find('>')
        .map(|offset| start + offset + 1)
        .ok_or_else(|| CompileError::at_offset(file, source, start, format!("unclosed <{tag}> tag")))?;

    let close_start = source[open_end..]
        .find(&close)
        .map(|offset| open_end + offset)
        .ok_or_else(|| {
            CompileError::at_offset(file, source, start, format!("unclosed <{tag}> block"))
        })?;

    Ok(Some(Block {
        outer: start..close_start + close.len(),
        inner: open_end..close_start,
    }))
}

fn parse_markup(
    source: &str,
    range: Range<usize>,
    file: &Path,
    known: &[&str],
    nodes: &mut Vec<Node>,
) -> Result<(), CompileError> {
    let mut text = String::new();
    let mut pos = range.start;

    while pos < range.end {
        let rest = &source[pos..range.end];
        let Some(next) = rest.find(['{', '<']) else {
            text.push_str(rest);
            break;
        };

        text.push_str(&rest[..next]);
        let at = pos + next;
        let tail = &source[at..range.end];

        if tail.starts_with('{') {
            let close = tail
                .find('}')
                .ok_or_else(|| CompileError::at_offset(file, source, at, "unclosed `{` expression"))?;
            flush_text(&mut text, nodes);
            nodes.push(parse_expression(&tail[1..close], file, source, at)?);
            pos = at + close + 1;
        } else if tail[1..].starts_with(|c: char| c.is_ascii_uppercase()) {
            let close = tail
                .find('>')
                .ok_or_else(|| CompileError::at_offset(file, source, at, "unclosed component tag"))?;
            let tag = &tail[..=close];
            if !tag.ends_with("/>") {
                return Err(CompileError::at_offset(
                    file,
                    source,
                    at,
                    "component tags must be self-closing (`<Name />`)",
                ));
            }
            let name: String = tag[1..]
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '$')
                .collect();
            if !known.contains(&name.as_str()) {
                return Err(CompileError::at_offset(
                    file,
                    source,
                    at,
                    format!("unknown component `{name}`; import it in the <script> block"),
                ));
            }
            flush_text(&mut text, nodes);
            nodes.push(Node::Component { name, module: None });
            pos = at + close + 1;
        } else {
            text.push('<');
            pos = at + 1;
        }
    }

    flush_text(&mut text, nodes);
    Ok(())
}

fn parse_expression(
    inner: &str,
    file: &Path,
    source: &str,
    offset: usize,
) -> Result<Node, CompileError> {
    let expression = inner.trim();
    let (raw, expression) = match expression.strip_prefix("@html") {
        Some(rest) => (true, rest.trim()),
        None => (false, expression),
    };

    if !PATH_EXPRESSION.is_match(expression) {
        return Err(CompileError::at_offset(
            file,
            source,
            offset,
            format!("unsupported expression `{expression}`; use a path such as `data.title`"),
        ));
    }

    let mut segments = expression.split('.');
    if segments.next() != Some("data") {
        return Err(CompileError::at_offset(
            file,
            source,
            offset,
            format!("`{expression}` is not in scope; markup can only read `data`"),
        ));
    }

    let path = segments.map(str::to_string).collect();
    Ok(if raw {
        Node::Html { path }
    } else {
        Node::Expr { path }
    })
}

fn flush_text(text: &mut String, nodes: &mut Vec<Node>) {
    if text.is_empty() {
        return;
    }
    match nodes.last_mut() {
        Some(Node::Text { text: previous }) => previous.push_str(text),
        _ => nodes.push(Node::Text { text: text.clone() }),
    }
    text.clear();
}

/// Drops leading/trailing whitespace of the whole template
fn trim_edges(mut nodes: Vec<Node>) -> Vec<Node> {
    if let Some(Node::Text { text }) = nodes.first_mut() {
        *text = text.trim_start().to_string();
    }
    if let Some(Node::Text { text }) = nodes.last_mut() {
        *text = text.trim_end().to_string();
    }
    nodes.retain(|node| !matches!(node, Node::Text { text } if text.is_empty()));
    nodes
}

impl Template {
    /// Assigns module ids to component nodes
    pub fn link(&mut self, resolve: impl Fn(&str) -> Option<String>) {
        for node in &mut self.nodes {
            if let Node::Component { name, module } = node {
                *module = resolve(name);
            }
        }
    }
}
