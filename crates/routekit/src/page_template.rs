// File: src/page_template.rs
// Purpose: HTML document shell around a rendered page

use crate::registry::CompiledRoute;
use maud::{html, Markup, PreEscaped, DOCTYPE};
use serde_json::Value;

/// Browser half of the development socket
pub const DEV_CLIENT: &str = include_str!("../client/dev.js");

/// Id of the element the client bundle hydrates
pub const APPLICATION_ID: &str = "application";

/// Id of the style element swapped by CSS-only updates
pub const STYLE_ID: &str = "__style__";

/// Renders the full document for a compiled page
///
/// `body` is the server-rendered markup; `data` is handed to the hydrating
/// component as its `data` prop.
pub fn render_page(route: &CompiledRoute, body: &str, data: &Value, dev: bool) -> String {
    page(&route.class_name, &route.style_source, body, &hydration_script(route, data), dev).into_string()
}

fn page(title: &str, style: &str, body: &str, script: &str, dev: bool) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                title { (title) }
                style id=(STYLE_ID) { (PreEscaped(escape_closing(style, "</style"))) }
                @if dev {
                    script { (PreEscaped(escape_closing(DEV_CLIENT, "</script"))) }
                }
            }
            body {
                div id=(APPLICATION_ID) { (PreEscaped(body)) }
                script type="module" { (PreEscaped(script)) }
            }
        }
    }
}

fn hydration_script(route: &CompiledRoute, data: &Value) -> String {
    let props = serde_json::to_string(data)
        .unwrap_or_else(|_| "null".to_string())
        .replace("</", "<\\/");

    let script = format!(
        "{bundle}\nnew {class}({{ target: document.getElementById({target:?}), hydrate: true, props: {{ data: {props} }} }});\n",
        bundle = route.client_hydration_bundle,
        class = route.class_name,
        target = APPLICATION_ID,
    );
    escape_closing(&script, "</script")
}

/// Breaks `closing` (ASCII, case-insensitive) so embedded text cannot end its element
fn escape_closing(text: &str, closing: &str) -> String {
    let lower = text.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (index, _) in lower.match_indices(closing) {
        out.push_str(&text[last..index]);
        out.push_str("<\\/");
        last = index + 2;
    }
    out.push_str(&text[last..]);
    out
}
