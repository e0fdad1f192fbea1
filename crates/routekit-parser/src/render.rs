// File: src/render.rs
// Purpose: Server-side rendering of parsed templates against JSON data

use crate::template::{Node, Template};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Nested components deeper than this render as nothing (import cycles)
const MAX_COMPONENT_DEPTH: usize = 64;

/// A linked server-render module: a page template plus every component it
/// reaches, keyed by module id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerModule {
    pub template: Template,
    pub components: BTreeMap<String, Template>,
    /// Generated render function, kept for inspection and change detection
    pub source: String,
}

impl ServerModule {
    /// Renders the page markup with `data` bound
    pub fn render(&self, data: &Value) -> String {
        let mut out = String::new();
        render_nodes(&self.template.nodes, data, &self.components, 0, &mut out);
        out
    }
}

impl Template {
    /// Renders this template alone; component nodes resolve through `components`
    pub fn render(&self, data: &Value, components: &BTreeMap<String, Template>) -> String {
        let mut out = String::new();
        render_nodes(&self.nodes, data, components, 0, &mut out);
        out
    }
}

fn render_nodes(
    nodes: &[Node],
    data: &Value,
    components: &BTreeMap<String, Template>,
    depth: usize,
    out: &mut String,
) {
    for node in nodes {
        match node {
            Node::Text { text } => out.push_str(text),
            Node::Expr { path } => {
                if let Some(value) = lookup(data, path) {
                    out.push_str(&escape_html(&stringify(value)));
                }
            }
            Node::Html { path } => {
                if let Some(value) = lookup(data, path) {
                    out.push_str(&stringify(value));
                }
            }
            Node::Component { module, .. } => {
                let template = module.as_ref().and_then(|id| components.get(id));
                if let (Some(template), true) = (template, depth < MAX_COMPONENT_DEPTH) {
                    render_nodes(&template.nodes, data, components, depth + 1, out);
                }
            }
        }
    }
}

/// Follows a property path through objects and arrays
///
/// ```
/// use routekit_parser::lookup;
/// use serde_json::json;
///
/// let data = json!({ "user": { "tags": ["a", "b"] } });
/// let path = ["user", "tags", "1"].map(String::from);
/// assert_eq!(lookup(&data, &path), Some(&json!("b")));
/// ```
pub fn lookup<'a>(data: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(data, |value, segment| match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Text form of a value: strings as-is, null as nothing, everything else as JSON
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Escapes text for HTML element and attribute content
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template(nodes: Vec<Node>) -> Template {
        Template { nodes }
    }

    fn text(value: &str) -> Node {
        Node::Text {
            text: value.to_string(),
        }
    }

    #[test]
    fn test_escaped_and_raw() {
        let page = template(vec![
            Node::Expr {
                path: vec!["x".to_string()],
            },
            Node::Html {
                path: vec!["x".to_string()],
            },
        ]);
        let html = page.render(&json!({ "x": "<b>" }), &BTreeMap::new());
        assert_eq!(html, "&lt;b&gt;<b>");
    }

    #[test]
    fn test_missing_values_render_empty() {
        let page = template(vec![
            text("["),
            Node::Expr {
                path: vec!["missing".to_string(), "deep".to_string()],
            },
            text("]"),
        ]);
        assert_eq!(page.render(&json!({}), &BTreeMap::new()), "[]");
    }

    #[test]
    fn test_whole_data_renders_as_json() {
        let page = template(vec![Node::Expr { path: vec![] }]);
        assert_eq!(
            page.render(&json!({ "id": "42" }), &BTreeMap::new()),
            "{&quot;id&quot;:&quot;42&quot;}"
        );
    }

    #[test]
    fn test_components_render_with_same_data() {
        let mut components = BTreeMap::new();
        components.insert(
            "lib/Badge.component".to_string(),
            template(vec![
                text("<b>"),
                Node::Expr {
                    path: vec!["id".to_string()],
                },
                text("</b>"),
            ]),
        );
        let module = ServerModule {
            template: template(vec![Node::Component {
                name: "Badge".to_string(),
                module: Some("lib/Badge.component".to_string()),
            }]),
            components,
            source: String::new(),
        };
        assert_eq!(module.render(&json!({ "id": 7 })), "<b>7</b>");
    }

    #[test]
    fn test_component_cycles_terminate() {
        let mut components = BTreeMap::new();
        components.insert(
            "a".to_string(),
            template(vec![
                text("a"),
                Node::Component {
                    name: "A".to_string(),
                    module: Some("a".to_string()),
                },
            ]),
        );
        let module = ServerModule {
            template: template(vec![Node::Component {
                name: "A".to_string(),
                module: Some("a".to_string()),
            }]),
            components,
            source: String::new(),
        };
        assert_eq!(module.render(&json!({})).len(), MAX_COMPONENT_DEPTH);
    }
}
