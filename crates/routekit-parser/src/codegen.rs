// File: src/codegen.rs
// Purpose: Generate JavaScript render code from parsed templates

use crate::template::{Component, Node, Template};

/// Module of the runtime package that provides the client helpers
pub const RUNTIME_INTERNAL: &str = "internal";

/// JS string literal, safe to embed inside a `<script>` element
pub fn js_string(text: &str) -> String {
    serde_json::to_string(text)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace("</", "<\\/")
}

fn js_path(path: &[String]) -> String {
    let items: Vec<String> = path.iter().map(|segment| js_string(segment)).collect();
    format!("[{}]", items.join(", "))
}

/// Statements that append the template's markup to `html`
fn render_statements(template: &Template, indent: &str) -> String {
    template
        .nodes
        .iter()
        .map(|node| {
            let statement = match node {
                Node::Text { text } => format!("html += {};", js_string(text)),
                Node::Expr { path } => format!("html += escape(lookup(data, {}));", js_path(path)),
                Node::Html { path } => format!("html += stringify(lookup(data, {}));", js_path(path)),
                Node::Component { name, .. } => format!("html += {name}.render(data);"),
            };
            format!("{indent}{statement}\n")
        })
        .collect()
}

/// Server-mode source: a standalone render function
pub fn server_source(template: &Template, name: &str) -> String {
    let mut code = String::new();
    code.push_str(&format!("// {name} (server)\n"));
    code.push_str("export default function render(data) {\n");
    code.push_str("  let html = \"\";\n");
    code.push_str(&render_statements(template, "  "));
    code.push_str("  return html;\n");
    code.push_str("}\n");
    code
}

/// Client-mode module: imports, script statements and the component class
pub fn client_module(component: &Component, name: &str, runtime: &str) -> String {
    let mut code = String::new();

    code.push_str(&format!(
        "import {{ escape, lookup, stringify, mount }} from {};\n",
        js_string(&format!("{runtime}/{RUNTIME_INTERNAL}"))
    ));
    for import in &component.imports {
        code.push_str(component.script_source[import.span.clone()].trim());
        code.push('\n');
    }
    if !component.script.is_empty() {
        code.push_str(&component.script);
        code.push('\n');
    }

    code.push_str(&format!("export default class {name} {{\n"));
    code.push_str("  static render(data) {\n");
    code.push_str("    let html = \"\";\n");
    code.push_str(&render_statements(&component.template, "    "));
    code.push_str("    return html;\n");
    code.push_str("  }\n");
    code.push_str("  constructor(options) {\n");
    code.push_str(&format!("    Object.assign(this, mount({name}, options));\n"));
    code.push_str("  }\n");
    code.push_str("}\n");
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_escapes_script_close() {
        assert_eq!(js_string("</script>"), "\"<\\/script>\"");
        assert_eq!(js_string("a\"b\n"), "\"a\\\"b\\n\"");
    }

    #[test]
    fn test_server_source() {
        let template = Template {
            nodes: vec![
                Node::Text {
                    text: "<h1>".to_string(),
                },
                Node::Expr {
                    path: vec!["id".to_string()],
                },
            ],
        };
        let source = server_source(&template, "AboutPage");
        assert!(source.contains("export default function render(data)"));
        assert!(source.contains("html += escape(lookup(data, [\"id\"]));"));
    }
}
