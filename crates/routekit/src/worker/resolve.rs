// File: src/worker/resolve.rs
// Purpose: Module resolution for the compilation worker

use super::runtime::RuntimePackage;
use crate::channel::DependencyGraph;
use routekit_router::{extension_of, HTTP_METHOD_EXTENSIONS, PAGE_EXTENSION, SOCKET_EXTENSION};
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Extensions resolved as project sources and re-read on every compile
const ALIASED_EXTENSIONS: [&str; 5] = [PAGE_EXTENSION, "data", "component", "svelte", SOCKET_EXTENSION];

/// A specifier that could not be resolved
///
/// Fatal for the worker: the build graph is unrecoverable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot resolve `{specifier}` from {}: {reason}", referrer.display())]
pub struct ResolveError {
    pub specifier: String,
    pub referrer: PathBuf,
    pub reason: String,
}

impl ResolveError {
    fn new(specifier: &str, referrer: &Path, reason: impl Into<String>) -> Self {
        Self {
            specifier: specifier.to_string(),
            referrer: referrer.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Which export condition applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Server,
    Browser,
}

impl Target {
    fn condition(&self) -> &'static str {
        match self {
            Target::Server => "node",
            Target::Browser => "browser",
        }
    }
}

/// Where a resolved module lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The client runtime package
    Runtime,
    /// A file of the served project
    Project,
    /// A third-party package under the dependency directory
    Package,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub path: PathBuf,
    pub origin: Origin,
    /// Unique per resolution in development; never part of the module id
    pub cache_token: Option<String>,
}

/// Resolves import specifiers and records the reverse dependency graph
pub struct Resolver {
    base: PathBuf,
    runtime: Arc<RuntimePackage>,
    dependency_dir: String,
    development: bool,
    graph: DependencyGraph,
    graph_changed: bool,
    token_counter: u64,
}

impl Resolver {
    pub fn new(
        base: impl Into<PathBuf>,
        runtime: Arc<RuntimePackage>,
        dependency_dir: impl Into<String>,
        development: bool,
    ) -> Self {
        Self {
            base: base.into(),
            runtime,
            dependency_dir: dependency_dir.into(),
            development,
            graph: DependencyGraph::new(),
            graph_changed: false,
            token_counter: 0,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn runtime(&self) -> &RuntimePackage {
        &self.runtime
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Returns whether edges were added since the last call
    pub fn take_graph_changed(&mut self) -> bool {
        std::mem::take(&mut self.graph_changed)
    }

    /// Records `dependency ← referrer` (development only)
    pub fn record_edge(&mut self, dependency: &Path, referrer: &Path) {
        if !self.development {
            return;
        }
        let inserted = self
            .graph
            .entry(dependency.to_path_buf())
            .or_default()
            .insert(referrer.to_path_buf());
        self.graph_changed |= inserted;
    }

    /// Resolves `specifier` as imported from `referrer`
    ///
    /// Checked in order: the runtime package name, a relative import from
    /// inside the runtime, a project source by extension, then plain file
    /// and package resolution.
    pub fn resolve(
        &mut self,
        specifier: &str,
        referrer: &Path,
        target: Target,
    ) -> Result<Resolved, ResolveError> {
        let resolved = if let Some(subpath) = self.runtime_subpath(specifier) {
            let relative = self
                .runtime
                .export(&subpath, target)
                .ok_or_else(|| ResolveError::new(specifier, referrer, format!("`{subpath}` is not exported by the runtime")))?;
            Resolved {
                path: self.runtime.root().join(relative),
                origin: Origin::Runtime,
                cache_token: None,
            }
        } else if self.runtime.contains(referrer) && is_relative(specifier) {
            Resolved {
                path: self.runtime_relative(specifier, referrer),
                origin: Origin::Runtime,
                cache_token: None,
            }
        } else if ALIASED_EXTENSIONS.contains(&extension_of(specifier).as_str())
            || HTTP_METHOD_EXTENSIONS.contains(&extension_of(specifier).as_str())
        {
            let path = self.project_path(specifier, referrer);
            if !path.is_file() {
                return Err(ResolveError::new(specifier, referrer, format!("{} does not exist", path.display())));
            }
            Resolved {
                path,
                origin: Origin::Project,
                cache_token: self.next_cache_token(),
            }
        } else if is_relative(specifier) || specifier.starts_with('/') {
            let path = self.project_path(specifier, referrer);
            let path = with_js_fallback(&path)
                .ok_or_else(|| ResolveError::new(specifier, referrer, format!("{} does not exist", path.display())))?;
            let origin = if self.in_dependency_dir(&path) {
                Origin::Package
            } else {
                Origin::Project
            };
            Resolved {
                path,
                origin,
                cache_token: None,
            }
        } else {
            Resolved {
                path: self.package_path(specifier, referrer, target)?,
                origin: Origin::Package,
                cache_token: None,
            }
        };

        let referrer_is_project = !self.runtime.contains(referrer) && !self.in_dependency_dir(referrer);
        if referrer_is_project && (is_relative(specifier) || specifier.starts_with('/')) {
            self.record_edge(&resolved.path, referrer);
        }

        debug!(
            "Resolved {} from {} -> {}{}",
            specifier,
            referrer.display(),
            resolved.path.display(),
            resolved
                .cache_token
                .as_deref()
                .map(|token| format!(" (token {token})"))
                .unwrap_or_default()
        );
        Ok(resolved)
    }

    /// Module id used inside bundles: stable and free of cache tokens
    pub fn module_id(&self, path: &Path) -> String {
        if let Ok(relative) = path.strip_prefix(self.runtime.root()) {
            return format!("{}/{}", self.runtime.name(), slash(relative));
        }
        if let Some(index) = path
            .components()
            .position(|component| component.as_os_str() == self.dependency_dir.as_str())
        {
            let relative: PathBuf = path.components().skip(index).collect();
            return slash(&relative);
        }
        match path.strip_prefix(&self.base) {
            Ok(relative) => slash(relative),
            Err(_) => slash(path),
        }
    }

    fn runtime_subpath(&self, specifier: &str) -> Option<String> {
        let name = self.runtime.name();
        if specifier == name {
            Some(".".to_string())
        } else {
            specifier
                .strip_prefix(name)
                .and_then(|rest| rest.strip_prefix('/'))
                .map(|rest| format!("./{rest}"))
        }
    }

    /// Relative import between runtime files, clamped to the runtime root
    fn runtime_relative(&self, specifier: &str, referrer: &Path) -> PathBuf {
        let root = self.runtime.root();
        let parent = referrer.parent().unwrap_or(root);
        let joined = normalize(&parent.join(specifier));
        if joined.starts_with(root) {
            joined
        } else {
            normalize(&root.join(specifier.replacen("..", ".", 1)))
        }
    }

    /// `/x` is project-rooted unless it names an existing absolute file
    fn project_path(&self, specifier: &str, referrer: &Path) -> PathBuf {
        if let Some(rooted) = specifier.strip_prefix('/') {
            let absolute = PathBuf::from(specifier);
            if absolute.exists() {
                return absolute;
            }
            return normalize(&self.base.join(rooted));
        }
        let parent = referrer.parent().unwrap_or(&self.base);
        normalize(&parent.join(specifier))
    }

    fn in_dependency_dir(&self, path: &Path) -> bool {
        path.components()
            .any(|component| component.as_os_str() == self.dependency_dir.as_str())
    }

    /// Bare specifier: searches the dependency directory upward from the referrer
    fn package_path(
        &self,
        specifier: &str,
        referrer: &Path,
        target: Target,
    ) -> Result<PathBuf, ResolveError> {
        let (package, subpath) = split_package(specifier);
        let mut directory = referrer.parent();

        while let Some(dir) = directory {
            let package_root = dir.join(&self.dependency_dir).join(package);
            if package_root.is_dir() {
                if let Some(subpath) = subpath {
                    return with_js_fallback(&package_root.join(subpath)).ok_or_else(|| {
                        ResolveError::new(specifier, referrer, format!("`{subpath}` not found in {package}"))
                    });
                }
                return package_entry(&package_root, target)
                    .ok_or_else(|| ResolveError::new(specifier, referrer, format!("{package} has no usable entry point")));
            }
            directory = dir.parent();
        }

        Err(ResolveError::new(
            specifier,
            referrer,
            format!("package not found in any {} directory", self.dependency_dir),
        ))
    }

    fn next_cache_token(&mut self) -> Option<String> {
        if !self.development {
            return None;
        }
        self.token_counter += 1;
        Some(format!("{}{}", chrono::Utc::now().timestamp_millis(), self.token_counter))
    }
}

fn is_relative(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../")
}

/// `@scope/name/sub` → (`@scope/name`, `sub`)
fn split_package(specifier: &str) -> (&str, Option<&str>) {
    let split_at = if specifier.starts_with('@') {
        specifier.match_indices('/').nth(1).map(|(index, _)| index)
    } else {
        specifier.find('/')
    };
    match split_at {
        Some(index) => (&specifier[..index], Some(&specifier[index + 1..])),
        None => (specifier, None),
    }
}

fn with_js_fallback(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    let mut with_extension = path.as_os_str().to_owned();
    with_extension.push(".js");
    let with_extension = PathBuf::from(with_extension);
    with_extension.is_file().then_some(with_extension)
}

/// Entry point from `package.json`: exports condition, then `module`, then `main`
fn package_entry(package_root: &Path, target: Target) -> Option<PathBuf> {
    let manifest: Value = std::fs::read_to_string(package_root.join("package.json"))
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())?;

    let entry = manifest
        .get("exports")
        .and_then(|exports| export_target(exports, ".", target))
        .or_else(|| manifest.get("module").and_then(Value::as_str).map(str::to_string))
        .or_else(|| manifest.get("main").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "index.js".to_string());

    with_js_fallback(&normalize(&package_root.join(entry)))
}

/// Looks up `subpath` in a package `exports` map for the target's conditions
pub(crate) fn export_target(exports: &Value, subpath: &str, target: Target) -> Option<String> {
    let entry = match exports {
        Value::String(path) if subpath == "." => return Some(path.clone()),
        Value::Object(map) if map.keys().any(|key| key.starts_with('.')) => map.get(subpath)?,
        Value::Object(_) if subpath == "." => exports,
        _ => return None,
    };
    pick_condition(entry, target)
}

fn pick_condition(entry: &Value, target: Target) -> Option<String> {
    match entry {
        Value::String(path) => Some(path.clone()),
        Value::Object(map) => [target.condition(), "import", "default"]
            .iter()
            .find_map(|condition| map.get(*condition))
            .and_then(|nested| pick_condition(nested, target)),
        _ => None,
    }
}

/// Lexical normalization of `.` and `..` components
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

fn slash(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn site() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("src");
        fs::create_dir_all(base.join("lib")).unwrap();
        fs::write(base.join("index.page"), "<h1>hi</h1>").unwrap();
        fs::write(base.join("lib/Badge.component"), "<b>badge</b>").unwrap();
        fs::write(base.join("lib/format.js"), "export const x = 1;").unwrap();
        (dir, base)
    }

    fn resolver(base: &Path, development: bool) -> Resolver {
        Resolver::new(base, Arc::new(RuntimePackage::builtin("svelte")), "node_modules", development)
    }

    #[test]
    fn test_runtime_name_uses_target_condition() {
        let (_dir, base) = site();
        let mut resolver = resolver(&base, true);
        let page = base.join("index.page");

        let browser = resolver.resolve("svelte", &page, Target::Browser).unwrap();
        let server = resolver.resolve("svelte", &page, Target::Server).unwrap();
        let internal = resolver.resolve("svelte/internal", &page, Target::Browser).unwrap();

        assert_eq!(browser.origin, Origin::Runtime);
        assert_eq!(resolver.module_id(&browser.path), "svelte/index.js");
        assert_eq!(resolver.module_id(&server.path), "svelte/index.js");
        assert_eq!(resolver.module_id(&internal.path), "svelte/internal.js");
        assert!(resolver.graph().is_empty());
    }

    #[test]
    fn test_unknown_runtime_export_fails() {
        let (_dir, base) = site();
        let mut resolver = resolver(&base, true);
        let error = resolver
            .resolve("svelte/store", &base.join("index.page"), Target::Browser)
            .unwrap_err();
        assert!(error.reason.contains("./store"));
    }

    #[test]
    fn test_relative_import_inside_runtime() {
        let (_dir, base) = site();
        let mut resolver = resolver(&base, true);
        let index = resolver.runtime().root().join("index.js");

        let resolved = resolver.resolve("./internal.js", &index, Target::Browser).unwrap();
        assert_eq!(resolved.path, resolver.runtime().root().join("internal.js"));

        let escaped = resolver.resolve("../internal.js", &index, Target::Browser).unwrap();
        assert_eq!(escaped.path, resolver.runtime().root().join("internal.js"));
    }

    #[test]
    fn test_component_gets_cache_token_in_development() {
        let (_dir, base) = site();
        let page = base.join("index.page");

        let mut dev = resolver(&base, true);
        let first = dev.resolve("./lib/Badge.component", &page, Target::Browser).unwrap();
        let second = dev.resolve("./lib/Badge.component", &page, Target::Browser).unwrap();
        assert!(first.cache_token.is_some());
        assert_ne!(first.cache_token, second.cache_token);
        assert_eq!(dev.module_id(&first.path), "lib/Badge.component");

        let mut prod = resolver(&base, false);
        let resolved = prod.resolve("./lib/Badge.component", &page, Target::Browser).unwrap();
        assert_eq!(resolved.cache_token, None);
        assert!(prod.graph().is_empty());
    }

    #[test]
    fn test_records_reverse_edges() {
        let (_dir, base) = site();
        let page = base.join("index.page");
        let mut resolver = resolver(&base, true);

        resolver.resolve("./lib/Badge.component", &page, Target::Browser).unwrap();
        resolver.resolve("./lib/format", &page, Target::Browser).unwrap();

        assert!(resolver.take_graph_changed());
        assert!(!resolver.take_graph_changed());
        assert_eq!(resolver.graph()[&base.join("lib/Badge.component")].len(), 1);
        assert!(resolver.graph()[&base.join("lib/format.js")].contains(&page));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let (_dir, base) = site();
        let mut resolver = resolver(&base, true);
        let page = base.join("index.page");

        assert!(resolver.resolve("./lib/Missing.component", &page, Target::Browser).is_err());
        assert!(resolver.resolve("./nope.js", &page, Target::Browser).is_err());
        assert!(resolver.resolve("left-pad", &page, Target::Browser).is_err());
    }

    #[test]
    fn test_bare_package_from_dependency_dir() {
        let (dir, base) = site();
        let package = dir.path().join("node_modules/tiny");
        fs::create_dir_all(&package).unwrap();
        fs::write(package.join("package.json"), r#"{ "module": "./esm.js", "main": "./cjs.js" }"#).unwrap();
        fs::write(package.join("esm.js"), "export default 1;").unwrap();

        let mut resolver = resolver(&base, true);
        let resolved = resolver.resolve("tiny", &base.join("index.page"), Target::Browser).unwrap();

        assert_eq!(resolved.origin, Origin::Package);
        assert_eq!(resolved.path, package.join("esm.js"));
        assert_eq!(resolver.module_id(&resolved.path), "node_modules/tiny/esm.js");
        assert!(resolver.graph().is_empty());
    }

    #[test]
    fn test_export_conditions() {
        let exports = json!({
            ".": { "node": { "import": "./server.js" }, "browser": { "import": "./client.js" } },
            "./internal": { "import": "./internal.js" }
        });
        assert_eq!(export_target(&exports, ".", Target::Server).as_deref(), Some("./server.js"));
        assert_eq!(export_target(&exports, ".", Target::Browser).as_deref(), Some("./client.js"));
        assert_eq!(export_target(&exports, "./internal", Target::Server).as_deref(), Some("./internal.js"));
        assert_eq!(export_target(&json!("./main.js"), ".", Target::Browser).as_deref(), Some("./main.js"));
    }

    #[test]
    fn test_split_package() {
        assert_eq!(split_package("tiny"), ("tiny", None));
        assert_eq!(split_package("tiny/sub/x.js"), ("tiny", Some("sub/x.js")));
        assert_eq!(split_package("@scope/pkg/x"), ("@scope/pkg", Some("x")));
    }
}
