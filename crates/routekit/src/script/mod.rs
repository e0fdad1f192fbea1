// File: src/script/mod.rs
// Purpose: Sandboxed data-script runner (Rhai)

mod bindings;
mod bundle;
mod source_map;

pub use bindings::{KeyValueStore, MemoryStore, ScriptBindings};
pub use bundle::{import_specifiers, module_id, resolve_import, MODULE_EXTENSION};
pub use source_map::{Diagnostic, SourceMap};

use crate::config::ScriptConfig;
use bundle::rewrite_imports;
use rhai::module_resolvers::StaticModuleResolver;
use rhai::{Dynamic, Engine, EvalAltResult, Module, ParseError, Scope, AST};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Helpers available to every data script
const PRELUDE: &str = r#"fn respond(status, body) { #{ "__response": true, status: status, body: body, headers: #{} } }
fn respond(status, body, headers) { #{ "__response": true, status: status, body: body, headers: headers } }
fn redirect(location) { #{ "__response": true, status: 303, body: "", headers: #{ location: location } } }
"#;

/// Marker key of maps built by `respond` / `redirect`
pub const RESPONSE_MARKER: &str = "__response";

#[derive(Debug, Clone, thiserror::Error)]
pub enum ScriptError {
    #[error("{0}")]
    Build(Diagnostic),
    #[error("{0}")]
    Runtime(Diagnostic),
}

impl ScriptError {
    pub fn diagnostic(&self) -> &Diagnostic {
        match self {
            ScriptError::Build(diagnostic) | ScriptError::Runtime(diagnostic) => diagnostic,
        }
    }
}

/// A data script as authored
#[derive(Debug, Clone)]
pub struct ScriptSource {
    /// The file the script lives in (a page, HTTP-method or socket file)
    pub file: PathBuf,
    pub code: String,
    /// Zero-based line of `file` on which `code` starts
    pub line: usize,
}

impl ScriptSource {
    /// A whole file used as a script
    pub fn whole_file(file: impl Into<PathBuf>, code: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            code: code.into(),
            line: 0,
        }
    }
}

/// What a script sees as `request`
#[derive(Debug, Clone, Default)]
pub struct ScriptRequest {
    pub method: String,
    pub path: String,
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub body: String,
}

impl ScriptRequest {
    fn register(engine: &mut Engine) {
        fn text(value: Option<&String>) -> Dynamic {
            value.map(|value| Dynamic::from(value.clone())).unwrap_or(Dynamic::UNIT)
        }

        engine
            .register_type_with_name::<ScriptRequest>("Request")
            .register_get("method", |request: &mut ScriptRequest| request.method.clone())
            .register_get("path", |request: &mut ScriptRequest| request.path.clone())
            .register_get("body", |request: &mut ScriptRequest| request.body.clone())
            .register_fn("param", |request: &mut ScriptRequest, name: &str| text(request.params.get(name)))
            .register_fn("query", |request: &mut ScriptRequest, name: &str| text(request.query.get(name)))
            .register_fn("header", |request: &mut ScriptRequest, name: &str| {
                text(request.headers.get(&name.to_ascii_lowercase()))
            })
            .register_fn("cookie", |request: &mut ScriptRequest, name: &str| text(request.cookies.get(name)))
            .register_fn("json", |request: &mut ScriptRequest| -> Result<Dynamic, Box<EvalAltResult>> {
                match serde_json::from_str::<Value>(&request.body) {
                    Ok(value) => rhai::serde::to_dynamic(value),
                    Err(_) => Ok(Dynamic::UNIT),
                }
            });
    }
}

/// Outcome of one socket message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocketReply {
    /// Sent back to the sender
    pub reply: Option<String>,
    /// Sent to every other connection of the route
    pub broadcast: Option<String>,
}

impl SocketReply {
    fn from_value(value: Value) -> Self {
        fn text(value: Value) -> Option<String> {
            match value {
                Value::Null => None,
                Value::String(text) => Some(text),
                other => Some(other.to_string()),
            }
        }

        match value {
            Value::Object(mut map) => Self {
                reply: map.remove("reply").and_then(text),
                broadcast: map.remove("broadcast").and_then(text),
            },
            other => Self {
                reply: text(other),
                broadcast: None,
            },
        }
    }
}

/// Builds script handlers with a fixed binding set and sandbox limits
#[derive(Clone)]
pub struct ScriptRunner {
    base: PathBuf,
    limits: ScriptConfig,
    bindings: ScriptBindings,
}

impl ScriptRunner {
    pub fn new(base: impl Into<PathBuf>, limits: ScriptConfig, bindings: ScriptBindings) -> Self {
        Self {
            base: base.into(),
            limits,
            bindings,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn engine(&self) -> Engine {
        let mut engine = Engine::new();
        engine.set_max_operations(self.limits.max_operations);
        engine.set_max_call_levels(self.limits.max_call_levels);
        engine.set_max_expr_depths(self.limits.max_expr_depth, self.limits.max_expr_depth);
        engine.set_max_string_size(self.limits.max_string_size);
        engine.disable_symbol("eval");

        self.bindings.register(&mut engine);
        ScriptRequest::register(&mut engine);
        engine
    }

    /// Bundles and compiles a script into a callable handler
    ///
    /// Imported modules are read from the project base, compiled once and
    /// linked through a static resolver keyed by their base-relative id.
    pub async fn build(&self, source: &ScriptSource) -> Result<ScriptHandler, ScriptError> {
        let mut engine = self.engine();
        let mut map = SourceMap::new(PRELUDE.lines().count(), source.line);

        let rewritten = rewrite_imports(&source.code, &self.base, Some(&mut map)).map_err(|e| {
            let executed = (e.line + map.prelude_lines(), e.column);
            ScriptError::Build(map.diagnostic(&source.file, &source.code, Some(executed), e.message))
        })?;

        let sources = self.read_modules(&rewritten.imports, &source.file).await?;
        let mut linked: Vec<PathBuf> = sources.keys().cloned().collect();
        linked.sort();
        let mut modules = StaticModuleResolver::new();
        let mut loading = Vec::new();
        for import in &rewritten.imports {
            compile_module(&mut engine, &mut modules, &mut loading, &sources, &self.base, &import.path)?;
        }
        engine.set_module_resolver(modules);

        let executed = format!("{PRELUDE}{}", rewritten.text);
        let ast = engine
            .compile(&executed)
            .map_err(|e| ScriptError::Build(parse_diagnostic(&map, &source.file, &source.code, e)))?;

        debug!("Built script for {}", source.file.display());
        Ok(ScriptHandler {
            engine: Arc::new(engine),
            ast,
            map,
            source: source.clone(),
            modules: linked,
        })
    }

    /// Reads every module reachable from `imports`
    async fn read_modules(
        &self,
        imports: &[bundle::ResolvedImport],
        script_file: &Path,
    ) -> Result<HashMap<PathBuf, ModuleSource>, ScriptError> {
        let mut sources = HashMap::new();
        // Symlinks may point anywhere; compare real paths
        let real_base = tokio::fs::canonicalize(&self.base)
            .await
            .unwrap_or_else(|_| self.base.clone());
        let mut pending: Vec<(PathBuf, PathBuf)> = imports
            .iter()
            .map(|import| (import.path.clone(), script_file.to_path_buf()))
            .collect();

        while let Some((path, referrer)) = pending.pop() {
            if sources.contains_key(&path) {
                continue;
            }
            let id = module_id(&self.base, &path);
            let unreadable = |e: std::io::Error| {
                ScriptError::Build(SourceMap::new(0, 0).diagnostic(
                    &referrer,
                    "",
                    None,
                    format!("cannot read module \"{id}\": {e}"),
                ))
            };
            let real = tokio::fs::canonicalize(&path).await.map_err(unreadable)?;
            if !real.starts_with(&real_base) {
                return Err(ScriptError::Build(SourceMap::new(0, 0).diagnostic(
                    &referrer,
                    "",
                    None,
                    format!("module \"{id}\" escapes the project directory"),
                )));
            }
            let text = tokio::fs::read_to_string(&real).await.map_err(unreadable)?;

            let map = SourceMap::new(0, 0);
            let rewritten = rewrite_imports(&text, &self.base, None).map_err(|e| {
                ScriptError::Build(map.diagnostic(&path, &text, Some((e.line, e.column)), e.message))
            })?;
            pending.extend(
                rewritten
                    .imports
                    .iter()
                    .map(|import| (import.path.clone(), path.clone())),
            );
            sources.insert(path, ModuleSource { text, rewritten });
        }
        Ok(sources)
    }
}

/// A module file and its rewritten text
struct ModuleSource {
    text: String,
    rewritten: bundle::Rewritten,
}

/// Compiles `path` after its own imports and registers it under its id
fn compile_module(
    engine: &mut Engine,
    modules: &mut StaticModuleResolver,
    loading: &mut Vec<PathBuf>,
    sources: &HashMap<PathBuf, ModuleSource>,
    base: &Path,
    path: &Path,
) -> Result<(), ScriptError> {
    let id = module_id(base, path);
    if modules.contains_path(&id) {
        return Ok(());
    }

    let map = SourceMap::new(0, 0);
    let Some(source) = sources.get(path) else {
        return Err(ScriptError::Build(map.diagnostic(path, "", None, format!("module \"{id}\" was not loaded"))));
    };
    if loading.iter().any(|pending| pending == path) {
        return Err(ScriptError::Build(map.diagnostic(
            path,
            &source.text,
            None,
            format!("circular import of \"{id}\""),
        )));
    }

    loading.push(path.to_path_buf());
    for import in &source.rewritten.imports {
        compile_module(engine, modules, loading, sources, base, &import.path)?;
    }
    loading.pop();

    engine.set_module_resolver(modules.clone());
    let ast = engine
        .compile(&source.rewritten.text)
        .map_err(|e| ScriptError::Build(parse_diagnostic(&map, path, &source.text, e)))?;
    let module = Module::eval_ast_as_new(Scope::new(), &ast, engine)
        .map_err(|e| ScriptError::Build(eval_diagnostic(&map, path, &source.text, *e)))?;

    modules.insert(id, module);
    Ok(())
}

/// A compiled script, shared by every request of one route version
pub struct ScriptHandler {
    engine: Arc<Engine>,
    ast: AST,
    map: SourceMap,
    source: ScriptSource,
    /// Every module file linked in, directly or transitively
    modules: Vec<PathBuf>,
}

impl std::fmt::Debug for ScriptHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptHandler")
            .field("file", &self.source.file)
            .finish_non_exhaustive()
    }
}

impl ScriptHandler {
    pub fn file(&self) -> &Path {
        &self.source.file
    }

    pub fn modules(&self) -> &[PathBuf] {
        &self.modules
    }

    /// Whether a change to `module` makes this handler stale
    pub fn imports(&self, module: &Path) -> bool {
        self.modules.iter().any(|linked| linked == module)
    }

    /// Runs the script with `request` in scope (blocking)
    pub fn call(&self, request: ScriptRequest) -> Result<Value, ScriptError> {
        let mut scope = Scope::new();
        scope.push("request", request);
        self.eval(scope)
    }

    /// Runs a socket script for one incoming `message` (blocking)
    pub fn on_message(&self, request: ScriptRequest, message: &str) -> Result<SocketReply, ScriptError> {
        let mut scope = Scope::new();
        scope.push("request", request);
        scope.push("message", message.to_string());
        self.eval(scope).map(SocketReply::from_value)
    }

    fn eval(&self, mut scope: Scope) -> Result<Value, ScriptError> {
        let runtime = |error: EvalAltResult| {
            ScriptError::Runtime(eval_diagnostic(&self.map, &self.source.file, &self.source.code, error))
        };

        let result = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &self.ast)
            .map_err(|e| runtime(*e))?;
        rhai::serde::from_dynamic::<Value>(&result).map_err(|e| runtime(*e))
    }
}

fn position_of(position: rhai::Position) -> Option<(usize, usize)> {
    position
        .line()
        .map(|line| (line, position.position().unwrap_or(1)))
}

fn parse_diagnostic(map: &SourceMap, file: &Path, script: &str, error: ParseError) -> Diagnostic {
    map.diagnostic(file, script, position_of(error.1), error.0.to_string())
}

fn eval_diagnostic(map: &SourceMap, file: &Path, script: &str, mut error: EvalAltResult) -> Diagnostic {
    let position = error.take_position();
    map.diagnostic(file, script, position_of(position), error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn runner(base: &Path) -> ScriptRunner {
        ScriptRunner::new(base, ScriptConfig::default(), ScriptBindings::default())
    }

    fn request_for(params: &[(&str, &str)]) -> ScriptRequest {
        ScriptRequest {
            method: "GET".to_string(),
            path: "/about/42".to_string(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_call_returns_json() {
        let dir = TempDir::new().unwrap();
        let source = ScriptSource::whole_file(dir.path().join("about_[id].page"), r#"#{ id: request.param("id") }"#);
        let handler = runner(dir.path()).build(&source).await.unwrap();

        let data = handler.call(request_for(&[("id", "42")])).unwrap();
        assert_eq!(data, json!({ "id": "42" }));
    }

    #[tokio::test]
    async fn test_imports_resolve_against_base() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib/util.rhai"), "fn double(x) { x * 2 }").unwrap();
        fs::write(
            dir.path().join("lib/math.rhai"),
            "import \"lib/util\" as util;\nfn quadruple(x) { util::double(util::double(x)) }",
        )
        .unwrap();

        let source = ScriptSource::whole_file(
            dir.path().join("api/stats.get"),
            "import \"./lib/math\" as math;\n#{ value: math::quadruple(3) }",
        );
        let handler = runner(dir.path()).build(&source).await.unwrap();
        assert_eq!(handler.call(ScriptRequest::default()).unwrap(), json!({ "value": 12 }));
        assert_eq!(
            handler.modules(),
            [dir.path().join("lib/math.rhai"), dir.path().join("lib/util.rhai")]
        );
        assert!(handler.imports(&dir.path().join("lib/util.rhai")));
        assert!(!handler.imports(&dir.path().join("lib/other.rhai")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_module_outside_base_is_rejected() {
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.rhai"), "fn value() { 42 }").unwrap();
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("lib")).unwrap();

        let source = ScriptSource::whole_file(
            dir.path().join("api.get"),
            "import \"lib/secret\" as secret;\n#{ v: secret::value() }",
        );
        let error = runner(dir.path()).build(&source).await.unwrap_err();

        let ScriptError::Build(diagnostic) = error else {
            panic!("expected a build error");
        };
        assert!(diagnostic.message.contains("escapes"));
    }

    #[tokio::test]
    async fn test_cookie_accessor() {
        let dir = TempDir::new().unwrap();
        let source = ScriptSource::whole_file(
            dir.path().join("me.get"),
            r#"#{ theme: request.cookie("theme"), missing: request.cookie("nope") }"#,
        );
        let handler = runner(dir.path()).build(&source).await.unwrap();
        let request = ScriptRequest {
            cookies: HashMap::from([("theme".to_string(), "dark".to_string())]),
            ..Default::default()
        };
        assert_eq!(handler.call(request).unwrap(), json!({ "theme": "dark", "missing": null }));
    }

    #[tokio::test]
    async fn test_escaping_import_is_a_build_error() {
        let dir = TempDir::new().unwrap();
        let source = ScriptSource {
            file: dir.path().join("index.page"),
            code: "\nimport \"../outside\" as x;\n#{}".to_string(),
            line: 3,
        };
        let error = runner(dir.path()).build(&source).await.unwrap_err();

        let ScriptError::Build(diagnostic) = error else {
            panic!("expected a build error");
        };
        assert_eq!((diagnostic.line, diagnostic.column), (5, 1));
        assert!(diagnostic.message.contains("escapes"));
    }

    #[tokio::test]
    async fn test_runtime_error_is_source_mapped() {
        let dir = TempDir::new().unwrap();
        let source = ScriptSource {
            file: dir.path().join("index.page"),
            code: "\nlet a = 1;\nlet b = missing_value;\n#{ a: a }".to_string(),
            line: 0,
        };
        let handler = runner(dir.path()).build(&source).await.unwrap();
        let error = handler.call(ScriptRequest::default()).unwrap_err();

        let ScriptError::Runtime(diagnostic) = error else {
            panic!("expected a runtime error");
        };
        assert_eq!(diagnostic.line, 3);
        assert_eq!(diagnostic.column, 9);
        assert!(diagnostic.render().contains("> 3 | let b = missing_value;"));
    }

    #[tokio::test]
    async fn test_operation_limit() {
        let dir = TempDir::new().unwrap();
        let limits = ScriptConfig {
            max_operations: 1_000,
            ..ScriptConfig::default()
        };
        let runner = ScriptRunner::new(dir.path(), limits, ScriptBindings::default());
        let source = ScriptSource::whole_file(dir.path().join("loop.get"), "loop { }");
        let handler = runner.build(&source).await.unwrap();

        assert!(matches!(handler.call(ScriptRequest::default()), Err(ScriptError::Runtime(_))));
    }

    #[tokio::test]
    async fn test_respond_helper_and_socket_reply() {
        let dir = TempDir::new().unwrap();
        let runner = runner(dir.path());

        let api = ScriptSource::whole_file(dir.path().join("x.post"), r#"respond(201, request.json().name)"#);
        let handler = runner.build(&api).await.unwrap();
        let request = ScriptRequest {
            body: r#"{"name":"ada"}"#.to_string(),
            ..Default::default()
        };
        assert_eq!(
            handler.call(request).unwrap(),
            json!({ "__response": true, "status": 201, "body": "ada", "headers": {} })
        );

        let chat = ScriptSource::whole_file(
            dir.path().join("chat.socket"),
            r#"#{ reply: "ack", broadcast: message }"#,
        );
        let handler = runner.build(&chat).await.unwrap();
        assert_eq!(
            handler.on_message(ScriptRequest::default(), "hello").unwrap(),
            SocketReply {
                reply: Some("ack".to_string()),
                broadcast: Some("hello".to_string()),
            }
        );
    }
}
