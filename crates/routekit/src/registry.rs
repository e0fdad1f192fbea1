// File: src/registry.rs
// Purpose: Route registry, one lazily built entry per route file

use crate::channel::{CompileOutcome, RoutePayload};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::files::{Change, FileEvent, Item};
use crate::script::{ScriptError, ScriptHandler, ScriptRunner, ScriptSource};
use routekit_parser::{CompileError, ServerModule};
use routekit_router::{Category, Method, Route, RouteKind, RouteMatch, Router};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{watch, OnceCell};
use tracing::{debug, info, warn};

/// Compiled contents of a page route, as served
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRoute {
    pub pattern: String,
    pub version: u64,
    pub source_path: PathBuf,
    pub server_module: ServerModule,
    pub client_hydration_bundle: String,
    pub data_script_source: Option<String>,
    pub data_script_line: usize,
    pub style_source: String,
    pub class_name: String,
    /// Hash of the style alone
    pub style_hash: String,
    /// Hash of everything except the style
    pub script_signature: String,
}

impl CompiledRoute {
    pub fn from_payload(
        pattern: String,
        version: u64,
        source_path: PathBuf,
        contents: crate::channel::RouteContents,
    ) -> Self {
        let style_hash = digest(&[&contents.style_source]);
        let script_signature = digest(&[
            &contents.server_module.source,
            &contents.client_hydration_bundle,
            contents.data_script_source.as_deref().unwrap_or(""),
            &contents.class_name,
        ]);

        Self {
            pattern,
            version,
            source_path,
            server_module: contents.server_module,
            client_hydration_bundle: contents.client_hydration_bundle,
            data_script_source: contents.data_script_source,
            data_script_line: contents.data_script_line,
            style_source: contents.style_source,
            class_name: contents.class_name,
            style_hash,
            script_signature,
        }
    }
}

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Compile state of a page route
#[derive(Debug, Clone)]
pub enum PageState {
    /// No payload has arrived yet
    Pending,
    Compiled(Arc<CompiledRoute>),
    Failed { version: u64, error: CompileError },
}

impl PageState {
    fn version(&self) -> u64 {
        match self {
            PageState::Pending => 0,
            PageState::Compiled(route) => route.version,
            PageState::Failed { version, .. } => *version,
        }
    }
}

/// Lifecycle of a memoized script handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

type HandlerResult = std::result::Result<Arc<ScriptHandler>, ScriptError>;

/// At most one build in flight; the result (success or failure) is kept
/// until the cell is replaced.
///
/// `version` is the page version whose data script the cell holds; script
/// routes stay at 0.
#[derive(Debug, Default)]
pub struct HandlerCell {
    version: u64,
    cell: OnceCell<HandlerResult>,
    loading: AtomicBool,
}

impl HandlerCell {
    fn new(version: u64) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    pub fn state(&self) -> HandlerState {
        match self.cell.get() {
            Some(Ok(_)) => HandlerState::Ready,
            Some(Err(_)) => HandlerState::Failed,
            None if self.loading.load(Ordering::SeqCst) => HandlerState::Loading,
            None => HandlerState::Unloaded,
        }
    }

    pub async fn get_or_build<F, Fut>(&self, build: F) -> HandlerResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = HandlerResult>,
    {
        self.cell
            .get_or_init(|| async {
                self.loading.store(true, Ordering::SeqCst);
                let result = build().await;
                self.loading.store(false, Ordering::SeqCst);
                result
            })
            .await
            .clone()
    }

    /// Whether a change to `module` makes the cell stale
    ///
    /// Failed and in-flight builds count, since they may have read it.
    fn depends_on(&self, module: &Path) -> bool {
        match self.cell.get() {
            Some(Ok(handler)) => handler.imports(module),
            Some(Err(_)) => true,
            None => self.loading.load(Ordering::SeqCst),
        }
    }
}

/// One route file
#[derive(Debug)]
pub struct RouteEntry {
    route: Route,
    page: watch::Sender<PageState>,
    previous: Mutex<Option<Arc<CompiledRoute>>>,
    handler: Mutex<Arc<HandlerCell>>,
}

impl RouteEntry {
    fn new(route: Route) -> Self {
        let (page, _) = watch::channel(PageState::Pending);
        Self {
            route,
            page,
            previous: Mutex::new(None),
            handler: Mutex::new(Arc::new(HandlerCell::default())),
        }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn page_state(&self) -> PageState {
        self.page.borrow().clone()
    }

    /// The compiled route replaced by the latest merge
    pub fn previous(&self) -> Option<Arc<CompiledRoute>> {
        self.previous
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn handler_state(&self) -> HandlerState {
        self.handler_cell().state()
    }

    fn handler_cell(&self) -> Arc<HandlerCell> {
        self.handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drops the memoized handler; the next request builds a fresh one
    fn invalidate_handler(&self) {
        let mut cell = self.handler.lock().unwrap_or_else(PoisonError::into_inner);
        *cell = Arc::new(HandlerCell::new(cell.version));
    }

    /// The cell for `version`
    ///
    /// A newer version takes over the shared cell. An older one (a request
    /// that read the page just before a merge) gets a private cell, so it
    /// never fills the shared one with a stale script.
    fn handler_cell_for(&self, version: u64) -> Arc<HandlerCell> {
        let mut cell = self.handler.lock().unwrap_or_else(PoisonError::into_inner);
        if cell.version == version {
            cell.clone()
        } else if version > cell.version {
            *cell = Arc::new(HandlerCell::new(version));
            cell.clone()
        } else {
            Arc::new(HandlerCell::new(version))
        }
    }
}

/// Result of merging a payload that was newer than the stored state
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub previous: Option<Arc<CompiledRoute>>,
    pub current: PageState,
}

/// What the supervisor must do about a file event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeAction {
    None,
    /// Ask the worker to compile this page
    Compile(PathBuf),
    /// A dependency changed; recompile the pages that import it
    Dependency(PathBuf),
    /// A static asset changed
    Static,
    /// Production does not reload; the process must restart
    Restart,
}

/// Route files by path, plus the router that matches requests to them
pub struct Registry {
    production: bool,
    ready_timeout: Duration,
    runner: ScriptRunner,
    static_marker: String,
    router: RwLock<Router>,
    entries: RwLock<HashMap<PathBuf, Arc<RouteEntry>>>,
    builds: AtomicUsize,
}

impl Registry {
    pub fn new(config: &Config, runner: ScriptRunner) -> Self {
        Self {
            production: config.production,
            ready_timeout: Duration::from_millis(config.dev.route_ready_timeout_ms),
            runner,
            static_marker: config.routing.static_dir.clone(),
            router: RwLock::new(Router::with_case_insensitive(config.routing.case_insensitive)),
            entries: RwLock::new(HashMap::new()),
            builds: AtomicUsize::new(0),
        }
    }

    pub fn base(&self) -> &Path {
        self.runner.base()
    }

    /// Number of script builds started so far
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Creates the entry for a route file; non-route files are ignored
    ///
    /// Two files claiming the same pattern and method is a configuration error.
    pub fn add_file(&self, path: &Path) -> Result<Option<Arc<RouteEntry>>> {
        let Some(route) = Route::from_file_with_marker(path, self.base(), &self.static_marker) else {
            return Ok(None);
        };

        self.router
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_route(route.clone())
            .map_err(|conflict| Error::Configuration(conflict.to_string()))?;

        let entry = Arc::new(RouteEntry::new(route));
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), entry.clone());
        debug!("Registered {} {}", entry.route.kind.label(), entry.route.pattern);
        Ok(Some(entry))
    }

    pub fn remove_file(&self, path: &Path) -> Option<Route> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
        self.router
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove_file(path)
    }

    pub fn entry(&self, path: &Path) -> Option<Arc<RouteEntry>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    /// Every route, highest priority first
    pub fn routes(&self) -> Vec<Route> {
        self.router
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .routes()
            .to_vec()
    }

    pub fn page_files(&self) -> Vec<PathBuf> {
        self.routes()
            .into_iter()
            .filter(|route| route.kind == RouteKind::Page)
            .map(|route| route.file_path)
            .collect()
    }

    /// Finds the entry for a request path and method
    pub fn match_request(&self, path: &str, method: Method) -> Option<(Arc<RouteEntry>, HashMap<String, String>)> {
        let matched = self
            .router
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .match_route(path, method)?;
        self.with_entry(matched)
    }

    pub fn match_socket(&self, path: &str) -> Option<(Arc<RouteEntry>, HashMap<String, String>)> {
        let matched = self
            .router
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .match_socket(path)?;
        self.with_entry(matched)
    }

    fn with_entry(&self, matched: RouteMatch) -> Option<(Arc<RouteEntry>, HashMap<String, String>)> {
        let entry = self.entry(&matched.route.file_path)?;
        Some((entry, matched.params))
    }

    /// Applies a file event and says what else must happen
    pub fn on_change(&self, event: &FileEvent) -> ChangeAction {
        if self.production {
            return ChangeAction::Restart;
        }

        match (event.item, event.change, event.category) {
            (Item::Directory, _, _) | (_, _, Category::Irrelevant) => ChangeAction::None,
            (_, _, Category::Static) => ChangeAction::Static,
            (_, _, Category::Dependency) => ChangeAction::Dependency(event.path.clone()),
            (_, Change::Unlinked, _) => {
                if let Some(route) = self.remove_file(&event.path) {
                    info!("Removed route {} {}", route.kind.label(), route.pattern);
                }
                ChangeAction::None
            }
            (_, Change::Added, category) => match self.add_file(&event.path) {
                Ok(Some(_)) if category == Category::PageRoute => ChangeAction::Compile(event.path.clone()),
                Ok(_) => ChangeAction::None,
                Err(e) => {
                    warn!("{}", e);
                    ChangeAction::None
                }
            },
            (_, Change::Changed, Category::PageRoute) => ChangeAction::Compile(event.path.clone()),
            (_, Change::Changed, _) => {
                if let Some(entry) = self.entry(&event.path) {
                    entry.invalidate_handler();
                    debug!("Invalidated handler for {}", entry.route.pattern);
                }
                ChangeAction::None
            }
        }
    }

    /// Drops every memoized handler that linked in `module`
    ///
    /// Returns the route files whose handlers were dropped.
    pub fn invalidate_importers(&self, module: &Path) -> Vec<PathBuf> {
        let entries: Vec<Arc<RouteEntry>> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut invalidated = Vec::new();
        for entry in entries {
            if entry.handler_cell().depends_on(module) {
                entry.invalidate_handler();
                debug!("Invalidated handler for {} ({} changed)", entry.route.pattern, module.display());
                invalidated.push(entry.route.file_path.clone());
            }
        }
        invalidated.sort();
        invalidated
    }

    /// Replace-if-newer merge of a worker payload
    ///
    /// Returns `None` when the payload is stale or its route is gone.
    pub fn merge(&self, payload: RoutePayload) -> Option<MergeOutcome> {
        let entry = self.entry(&payload.source_path)?;
        let current = entry.page_state();
        if payload.version <= current.version() {
            debug!(
                "Ignoring stale payload for {} (version {} <= {})",
                payload.route,
                payload.version,
                current.version()
            );
            return None;
        }

        let next = match payload.outcome {
            CompileOutcome::Contents(contents) => PageState::Compiled(Arc::new(CompiledRoute::from_payload(
                payload.route,
                payload.version,
                payload.source_path,
                contents,
            ))),
            CompileOutcome::Error(error) => PageState::Failed {
                version: payload.version,
                error,
            },
        };

        let previous = match current {
            PageState::Compiled(route) => Some(route),
            _ => entry.previous(),
        };
        *entry.previous.lock().unwrap_or_else(PoisonError::into_inner) = previous.clone();
        *entry.handler.lock().unwrap_or_else(PoisonError::into_inner) = Arc::new(HandlerCell::new(payload.version));
        entry.page.send_replace(next.clone());

        Some(MergeOutcome {
            previous,
            current: next,
        })
    }

    /// Waits (bounded) for the page's first payload
    pub async fn compiled(&self, entry: &RouteEntry) -> Result<Arc<CompiledRoute>> {
        let mut rx = entry.page.subscribe();
        let waited = tokio::time::timeout(self.ready_timeout, async {
            rx.wait_for(|state| !matches!(state, PageState::Pending))
                .await
                .map(|state| state.clone())
        })
        .await;

        match waited {
            Ok(Ok(PageState::Compiled(route))) => Ok(route),
            Ok(Ok(PageState::Failed { error, .. })) => Err(Error::Compile(error)),
            _ => Err(Error::RouteNotReady {
                pattern: entry.route.pattern.clone(),
            }),
        }
    }

    /// The memoized data-script handler of an entry
    ///
    /// Pages use the data script of `compiled`; HTTP-method and socket
    /// routes use their whole file.
    pub async fn handler(&self, entry: &RouteEntry, compiled: Option<&CompiledRoute>) -> Result<Arc<ScriptHandler>> {
        let cell = entry.handler_cell_for(compiled.map_or(0, |route| route.version));
        let file = entry.route.file_path.clone();
        let page_script = compiled.map(|route| ScriptSource {
            file: route.source_path.clone(),
            code: route.data_script_source.clone().unwrap_or_default(),
            line: route.data_script_line,
        });

        let handler = cell
            .get_or_build(|| async {
                self.builds.fetch_add(1, Ordering::SeqCst);
                let source = match page_script {
                    Some(source) => source,
                    None => {
                        let code = tokio::fs::read_to_string(&file).await.map_err(|e| {
                            ScriptError::Build(crate::script::SourceMap::new(0, 0).diagnostic(
                                &file,
                                "",
                                None,
                                format!("cannot read script: {e}"),
                            ))
                        })?;
                        ScriptSource::whole_file(&file, code)
                    }
                };
                debug!("Building handler for {}", entry.route.pattern);
                self.runner.build(&source).await.map(Arc::new)
            })
            .await?;
        Ok(handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RouteContents;
    use crate::script::{ScriptBindings, ScriptRequest};
    use std::fs;
    use tempfile::TempDir;

    fn registry(base: &Path, production: bool) -> Registry {
        let mut config = Config::default();
        config.production = production;
        config.dev.route_ready_timeout_ms = 50;
        let runner = ScriptRunner::new(base, config.script.clone(), ScriptBindings::default());
        Registry::new(&config, runner)
    }

    fn payload(base: &Path, version: u64, style: &str) -> RoutePayload {
        RoutePayload {
            route: "/".to_string(),
            source_path: base.join("index.page"),
            version,
            outcome: CompileOutcome::Contents(RouteContents {
                server_module: ServerModule::default(),
                client_hydration_bundle: "bundle".to_string(),
                data_script_source: None,
                data_script_line: 0,
                style_source: style.to_string(),
                class_name: "IndexPage".to_string(),
            }),
        }
    }

    #[test]
    fn test_merge_replaces_only_when_newer() {
        let dir = TempDir::new().unwrap();
        let registry = registry(dir.path(), false);
        registry.add_file(&dir.path().join("index.page")).unwrap();

        let first = registry.merge(payload(dir.path(), 2, "a")).unwrap();
        assert!(first.previous.is_none());

        assert!(registry.merge(payload(dir.path(), 1, "old")).is_none());
        assert!(registry.merge(payload(dir.path(), 2, "same")).is_none());

        let third = registry.merge(payload(dir.path(), 3, "b")).unwrap();
        assert_eq!(third.previous.unwrap().style_source, "a");
        let PageState::Compiled(current) = third.current else {
            panic!("expected compiled state");
        };
        assert_eq!(current.version, 3);
        assert_ne!(current.style_hash, digest(&["a"]));
    }

    fn compiled(payload: RoutePayload) -> CompiledRoute {
        match payload.outcome {
            CompileOutcome::Contents(contents) => {
                CompiledRoute::from_payload(payload.route, payload.version, payload.source_path, contents)
            }
            CompileOutcome::Error(e) => panic!("unexpected compile error: {e}"),
        }
    }

    #[test]
    fn test_style_does_not_change_signature() {
        let dir = TempDir::new().unwrap();
        let red = compiled(payload(dir.path(), 1, "h1 { color: red }"));
        let blue = compiled(payload(dir.path(), 2, "h1 { color: blue }"));

        assert_eq!(red.script_signature, blue.script_signature);
        assert_ne!(red.style_hash, blue.style_hash);
    }

    #[test]
    fn test_conflicting_routes_are_a_configuration_error() {
        let dir = TempDir::new().unwrap();
        let registry = registry(dir.path(), false);
        registry.add_file(&dir.path().join("about.page")).unwrap();

        let error = registry.add_file(&dir.path().join("about/index.page")).unwrap_err();
        assert!(matches!(error, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_page_not_ready_times_out() {
        let dir = TempDir::new().unwrap();
        let registry = registry(dir.path(), false);
        let entry = registry.add_file(&dir.path().join("index.page")).unwrap().unwrap();

        let error = registry.compiled(&entry).await.unwrap_err();
        assert!(matches!(error, Error::RouteNotReady { .. }));
    }

    #[tokio::test]
    async fn test_failed_compile_surfaces_error() {
        let dir = TempDir::new().unwrap();
        let registry = registry(dir.path(), false);
        let entry = registry.add_file(&dir.path().join("index.page")).unwrap().unwrap();

        registry.merge(RoutePayload {
            route: "/".to_string(),
            source_path: dir.path().join("index.page"),
            version: 1,
            outcome: CompileOutcome::Error(CompileError {
                file: dir.path().join("index.page"),
                line: 1,
                column: 5,
                message: "unclosed `{` expression".to_string(),
            }),
        });

        assert!(matches!(registry.compiled(&entry).await, Err(Error::Compile(_))));
    }

    #[tokio::test]
    async fn test_handler_invalidated_on_change() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("api.get");
        fs::write(&file, "1").unwrap();

        let registry = registry(dir.path(), false);
        let entry = registry.add_file(&file).unwrap().unwrap();
        assert_eq!(entry.handler_state(), HandlerState::Unloaded);

        let first = registry.handler(&entry, None).await.unwrap();
        assert_eq!(entry.handler_state(), HandlerState::Ready);

        let event = FileEvent {
            item: Item::File,
            change: Change::Changed,
            category: Category::HttpMethodRoute(Method::Get),
            path: file.clone(),
        };
        assert_eq!(registry.on_change(&event), ChangeAction::None);
        assert_eq!(entry.handler_state(), HandlerState::Unloaded);

        let second = registry.handler(&entry, None).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(registry.builds(), 2);
    }

    fn page_with_script(base: &Path, version: u64, script: &str) -> RoutePayload {
        let mut payload = payload(base, version, "");
        if let CompileOutcome::Contents(contents) = &mut payload.outcome {
            contents.data_script_source = Some(script.to_string());
        }
        payload
    }

    fn current(entry: &RouteEntry) -> Arc<CompiledRoute> {
        match entry.page_state() {
            PageState::Compiled(route) => route,
            other => panic!("expected compiled state, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stale_page_version_does_not_claim_the_handler() {
        let dir = TempDir::new().unwrap();
        let registry = registry(dir.path(), false);
        let entry = registry.add_file(&dir.path().join("index.page")).unwrap().unwrap();

        registry.merge(page_with_script(dir.path(), 1, "#{ v: 1 }"));
        let v1 = current(&entry);
        // A request read v1, then v2 was merged before it built its handler
        registry.merge(page_with_script(dir.path(), 2, "#{ v: 2 }"));
        let v2 = current(&entry);

        let stale = registry.handler(&entry, Some(&v1)).await.unwrap();
        assert_eq!(stale.call(ScriptRequest::default()).unwrap(), serde_json::json!({ "v": 1 }));
        assert_eq!(entry.handler_state(), HandlerState::Unloaded);

        let fresh = registry.handler(&entry, Some(&v2)).await.unwrap();
        assert_eq!(fresh.call(ScriptRequest::default()).unwrap(), serde_json::json!({ "v": 2 }));
        let again = registry.handler(&entry, Some(&v2)).await.unwrap();
        assert!(Arc::ptr_eq(&fresh, &again));
        assert_eq!(registry.builds(), 2);
    }

    #[test]
    fn test_production_change_restarts() {
        let dir = TempDir::new().unwrap();
        let registry = registry(dir.path(), true);
        let event = FileEvent {
            item: Item::File,
            change: Change::Changed,
            category: Category::PageRoute,
            path: dir.path().join("index.page"),
        };
        assert_eq!(registry.on_change(&event), ChangeAction::Restart);
    }

    #[test]
    fn test_change_actions() {
        let dir = TempDir::new().unwrap();
        let registry = registry(dir.path(), false);
        let page = dir.path().join("blog.page");
        let event = |change, category, path: &Path| FileEvent {
            item: Item::File,
            change,
            category,
            path: path.to_path_buf(),
        };

        assert_eq!(
            registry.on_change(&event(Change::Added, Category::PageRoute, &page)),
            ChangeAction::Compile(page.clone())
        );
        assert_eq!(registry.routes().len(), 1);

        let badge = dir.path().join("Badge.component");
        assert_eq!(
            registry.on_change(&event(Change::Changed, Category::Dependency, &badge)),
            ChangeAction::Dependency(badge)
        );
        assert_eq!(
            registry.on_change(&event(Change::Changed, Category::Static, &dir.path().join("#static/a.css"))),
            ChangeAction::Static
        );

        registry.on_change(&event(Change::Unlinked, Category::PageRoute, &page));
        assert!(registry.routes().is_empty());
    }
}
