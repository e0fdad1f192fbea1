// routekit-parser - page sources to server-render and hydration code
//
// A page file is a component with an optional `<data>` block:
//
//   <data> ...data script... </data>
//   <script> import Counter from './Counter.component'; </script>
//   <h1>{data.title}</h1> <Counter />
//   <style> h1 { color: teal } </style>

pub mod codegen;
pub mod compiler;
pub mod data_block;
pub mod error;
pub mod imports;
pub mod render;
pub mod template;

pub use compiler::{
    component_name_from_path, CompileMode, CompileOptions, CompiledOutput, MarkupCompiler,
    TemplateCompiler,
};
pub use data_block::{extract_data_block, DataBlock};
pub use error::{line_column, CompileError};
pub use imports::{parse_imports, strip_imports, Import, ImportClause, NamedImport};
pub use render::{escape_html, lookup, stringify, ServerModule};
pub use template::{parse_component, Component, Node, Template};
