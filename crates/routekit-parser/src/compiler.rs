// File: src/compiler.rs
// Purpose: The markup compiler seam and the built-in template compiler

use crate::codegen::{client_module, server_source};
use crate::error::CompileError;
use crate::imports::Import;
use crate::template::{parse_component, Template};
use std::path::{Path, PathBuf};

/// Which side the compiled code runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompileMode {
    /// Server render module
    Server,
    /// Browser hydration module
    Client,
}

#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Authored file, used for error locations
    pub filename: PathBuf,
    /// Class name of the generated component
    pub name: String,
    pub mode: CompileMode,
    /// Package name of the client runtime (`svelte` by default)
    pub runtime: String,
}

/// Result of compiling one page or component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledOutput {
    pub code: String,
    pub css: Option<String>,
    pub imports: Vec<Import>,
    /// Parsed markup, rendered on the server
    pub template: Template,
}

/// Compiles page and component sources
///
/// Implementations must be deterministic: the same source and options
/// produce byte-identical output.
pub trait MarkupCompiler: Send + Sync {
    fn compile(&self, source: &str, options: &CompileOptions) -> Result<CompiledOutput, CompileError>;
}

/// Built-in compiler for the `<script>` / markup / `<style>` component format
///
/// Markup supports `{data.path}` (escaped), `{@html data.path}` (raw) and
/// self-closing tags for imported components.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateCompiler;

impl MarkupCompiler for TemplateCompiler {
    fn compile(&self, source: &str, options: &CompileOptions) -> Result<CompiledOutput, CompileError> {
        let component = parse_component(source, &options.filename)?;

        let code = match options.mode {
            CompileMode::Server => server_source(&component.template, &options.name),
            CompileMode::Client => client_module(&component, &options.name, &options.runtime),
        };

        Ok(CompiledOutput {
            code,
            css: component.style.clone(),
            imports: component.imports,
            template: component.template,
        })
    }
}

/// Class name for a component file: its stem, title-cased per `-`/`_`/`.` fragment
///
/// ```
/// use routekit_parser::component_name_from_path;
/// use std::path::Path;
///
/// assert_eq!(component_name_from_path(Path::new("lib/Counter.component")), "Counter");
/// assert_eq!(component_name_from_path(Path::new("lib/date-picker.svelte")), "DatePicker");
/// ```
pub fn component_name_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("Component");

    let name: String = stem
        .split(['-', '_', '.'])
        .filter(|fragment| !fragment.is_empty())
        .map(|fragment| {
            let mut chars = fragment.chars().filter(|c| c.is_ascii_alphanumeric());
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + &chars.collect::<String>(),
                None => String::new(),
            }
        })
        .collect();

    match name.chars().next() {
        None => "Component".to_string(),
        Some(first) if first.is_ascii_digit() => format!("_{name}"),
        Some(_) => name,
    }
}
