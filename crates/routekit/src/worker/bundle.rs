// File: src/worker/bundle.rs
// Purpose: Walk a page's import graph into a server module and a hydration bundle

use super::resolve::{ResolveError, Resolver, Target};
use once_cell::sync::Lazy;
use regex::Regex;
use routekit_parser::codegen::js_string;
use routekit_parser::{
    component_name_from_path, parse_imports, CompileError, CompileMode, CompileOptions,
    CompiledOutput, Import, ImportClause, MarkupCompiler, ServerModule, Template,
};
use routekit_router::{extension_of, PAGE_EXTENSION};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

static EXPORT_DEFAULT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([ \t]*)export\s+default\s+").expect("export default pattern is valid"));

static EXPORT_DECLARATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^([ \t]*)export\s+((?:async\s+)?function\*?|class|const|let|var)\s+([\w$]+)")
        .expect("export declaration pattern is valid")
});

static EXPORT_LIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*export\s*\{([^}]*)\}[ \t]*;?").expect("export list pattern is valid")
});

const BUNDLE_PRELUDE: &str = "const __rk_registry = Object.create(null);
function __rk_define(id, factory) {
  const exports = {};
  __rk_registry[id] = exports;
  factory(exports, (dependency) => __rk_registry[dependency] || {});
}
";

/// One module of a hydration bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleUnit {
    pub id: String,
    pub code: String,
}

/// Rewrites an ES module into a `__rk_define` registration
///
/// `imports` pairs each import statement of `code` with the id it resolved to.
pub fn to_registry_module(id: &str, code: &str, imports: &[(Import, String)]) -> String {
    let mut body = code.to_string();

    let mut ordered: Vec<&(Import, String)> = imports.iter().collect();
    ordered.sort_by_key(|(import, _)| std::cmp::Reverse(import.span.start));
    for (import, dependency) in ordered {
        body.replace_range(import.span.clone(), &import_binding(&import.clause, dependency));
    }

    let mut exported: Vec<(String, String)> = Vec::new();

    body = EXPORT_LIST
        .replace_all(&body, |captures: &regex::Captures| {
            for item in captures[1].split(',').map(str::trim).filter(|item| !item.is_empty()) {
                let (local, name) = match item.split_once(" as ") {
                    Some((local, name)) => (local.trim(), name.trim()),
                    None => (item, item),
                };
                exported.push((name.to_string(), local.to_string()));
            }
            String::new()
        })
        .into_owned();

    body = EXPORT_DECLARATION
        .replace_all(&body, |captures: &regex::Captures| {
            exported.push((captures[3].to_string(), captures[3].to_string()));
            format!("{}{} {}", &captures[1], &captures[2], &captures[3])
        })
        .into_owned();

    body = EXPORT_DEFAULT.replace_all(&body, "${1}exports.default = ").into_owned();

    let mut module = format!("__rk_define({}, function (exports, __rk_import) {{\n", js_string(id));
    module.push_str(body.trim_end());
    module.push('\n');
    for (name, local) in exported {
        module.push_str(&format!("exports.{name} = {local};\n"));
    }
    module.push_str("});\n");
    module
}

fn import_binding(clause: &ImportClause, dependency: &str) -> String {
    let module = format!("__rk_import({})", js_string(dependency));
    let named = |names: &[routekit_parser::NamedImport]| {
        let items: Vec<String> = names
            .iter()
            .map(|name| {
                if name.imported == name.local {
                    name.local.clone()
                } else {
                    format!("{}: {}", name.imported, name.local)
                }
            })
            .collect();
        format!("const {{ {} }} = {module};", items.join(", "))
    };

    match clause {
        ImportClause::SideEffect => format!("{module};"),
        ImportClause::Default(local) => format!("const {local} = {module}.default;"),
        ImportClause::Named(names) => named(names.as_slice()),
        ImportClause::DefaultAndNamed(local, names) => {
            format!("const {local} = {module}.default; {}", named(names.as_slice()))
        }
        ImportClause::Namespace(local) => format!("const {local} = {module};"),
    }
}

/// Concatenates modules (dependencies first) and exposes the entry class
pub fn assemble_bundle(modules: &[ModuleUnit], entry_id: &str, class_name: &str) -> String {
    let mut bundle = String::from(BUNDLE_PRELUDE);
    for module in modules {
        bundle.push_str(&module.code);
    }
    bundle.push_str(&format!(
        "const {class_name} = __rk_registry[{}].default;\n",
        js_string(entry_id)
    ));
    bundle
}

/// Why a page build stopped
#[derive(Debug)]
pub enum BuildError {
    /// Reported to the registry; the worker keeps running
    Compile(CompileError),
    /// Fatal for the worker
    Resolve(ResolveError),
}

impl From<CompileError> for BuildError {
    fn from(error: CompileError) -> Self {
        BuildError::Compile(error)
    }
}

impl From<ResolveError> for BuildError {
    fn from(error: ResolveError) -> Self {
        BuildError::Resolve(error)
    }
}

/// Server and client compilations of one component source
#[derive(Debug, Clone)]
pub struct CompiledPair {
    server: CompiledOutput,
    client: CompiledOutput,
}

/// Compiled components reused across pages (production only)
pub type ModuleCache = HashMap<PathBuf, CompiledPair>;

#[derive(Debug, Clone)]
pub struct PageOutput {
    pub server_module: ServerModule,
    pub bundle: String,
    pub style: String,
}

/// One page build: a post-order walk over the page's imports
pub struct PageBuild<'a> {
    resolver: &'a mut Resolver,
    compiler: &'a dyn MarkupCompiler,
    cache: Option<&'a mut ModuleCache>,
    visited: HashSet<PathBuf>,
    modules: Vec<ModuleUnit>,
    components: BTreeMap<String, Template>,
    styles: Vec<String>,
}

impl<'a> PageBuild<'a> {
    pub fn new(
        resolver: &'a mut Resolver,
        compiler: &'a dyn MarkupCompiler,
        cache: Option<&'a mut ModuleCache>,
    ) -> Self {
        Self {
            resolver,
            compiler,
            cache,
            visited: HashSet::new(),
            modules: Vec::new(),
            components: BTreeMap::new(),
            styles: Vec::new(),
        }
    }

    /// Builds `page` from its markup (the source with the data block removed)
    pub fn run(mut self, page: &Path, markup: &str, class_name: &str) -> Result<PageOutput, BuildError> {
        self.visited.insert(page.to_path_buf());
        let compiled = self.compile(page, markup, class_name, false)?;
        let (entry_id, template) = self.emit_component(page, compiled.clone())?;

        Ok(PageOutput {
            server_module: ServerModule {
                template,
                components: self.components,
                source: compiled.server.code,
            },
            bundle: assemble_bundle(&self.modules, &entry_id, class_name),
            style: self.styles.join("\n"),
        })
    }

    fn compile(
        &mut self,
        path: &Path,
        source: &str,
        name: &str,
        cacheable: bool,
    ) -> Result<CompiledPair, CompileError> {
        if cacheable {
            if let Some(hit) = self.cache.as_deref().and_then(|cache| cache.get(path)) {
                return Ok(hit.clone());
            }
        }

        let runtime = self.resolver.runtime().name().to_string();
        let options = |mode| CompileOptions {
            filename: path.to_path_buf(),
            name: name.to_string(),
            mode,
            runtime: runtime.clone(),
        };
        let pair = CompiledPair {
            server: self.compiler.compile(source, &options(CompileMode::Server))?,
            client: self.compiler.compile(source, &options(CompileMode::Client))?,
        };

        if cacheable {
            if let Some(cache) = self.cache.as_deref_mut() {
                cache.insert(path.to_path_buf(), pair.clone());
            }
        }
        Ok(pair)
    }

    fn visit(&mut self, path: &Path) -> Result<String, BuildError> {
        let id = self.resolver.module_id(path);
        if !self.visited.insert(path.to_path_buf()) {
            return Ok(id);
        }

        if is_component(path) {
            let name = component_name_from_path(path);
            let source = read_source(path)?;
            let compiled = self.compile(path, &source, &name, true)?;
            let (id, template) = self.emit_component(path, compiled)?;
            self.components.insert(id.clone(), template);
            return Ok(id);
        }

        let source = if self.resolver.runtime().contains(path) {
            self.resolver
                .runtime()
                .read(path)
                .map_err(|e| unreadable(path, &e))?
        } else {
            read_source(path)?
        };
        let imports = self.visit_imports(path, &source)?;
        self.modules.push(ModuleUnit {
            code: to_registry_module(&id, &source, &imports),
            id: id.clone(),
        });
        Ok(id)
    }

    fn visit_imports(&mut self, path: &Path, code: &str) -> Result<Vec<(Import, String)>, BuildError> {
        let mut resolved = Vec::new();
        for import in parse_imports(code) {
            let target = self.resolver.resolve(&import.specifier, path, Target::Browser)?;
            let dependency = self.visit(&target.path)?;
            resolved.push((import, dependency));
        }
        Ok(resolved)
    }

    /// Links the server template and registers the client module
    fn emit_component(&mut self, path: &Path, compiled: CompiledPair) -> Result<(String, Template), BuildError> {
        let id = self.resolver.module_id(path);

        let mut bindings = HashMap::new();
        for import in &compiled.server.imports {
            let Some(binding) = import.default_binding() else {
                continue;
            };
            let target = self.resolver.resolve(&import.specifier, path, Target::Server)?;
            if is_component(&target.path) {
                bindings.insert(binding.to_string(), self.resolver.module_id(&target.path));
            }
        }
        let mut template = compiled.server.template.clone();
        template.link(|name| bindings.get(name).cloned());

        let imports = self.visit_imports(path, &compiled.client.code)?;
        self.modules.push(ModuleUnit {
            code: to_registry_module(&id, &compiled.client.code, &imports),
            id: id.clone(),
        });
        if let Some(css) = compiled.server.css.filter(|css| !css.trim().is_empty()) {
            self.styles.push(css.trim().to_string());
        }

        Ok((id, template))
    }
}

fn is_component(path: &Path) -> bool {
    matches!(extension_of(path).as_str(), "component" | "svelte" | PAGE_EXTENSION)
}

fn read_source(path: &Path) -> Result<String, CompileError> {
    std::fs::read_to_string(path).map_err(|e| unreadable(path, &e))
}

fn unreadable(path: &Path, error: &std::io::Error) -> CompileError {
    CompileError {
        file: path.to_path_buf(),
        line: 1,
        column: 1,
        message: format!("cannot read module: {error}"),
    }
}
