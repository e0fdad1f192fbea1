// File: src/worker/runtime.rs
// Purpose: The client runtime package that compiled components import

use super::resolve::{export_target, Target};
use crate::config::RuntimeConfig;
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};

/// Runtime shipped inside the binary
const BUILTIN_FILES: [(&str, &str); 3] = [
    ("package.json", include_str!("../../runtime/package.json")),
    ("index.js", include_str!("../../runtime/index.js")),
    ("internal.js", include_str!("../../runtime/internal.js")),
];

/// Virtual root of the built-in runtime
const BUILTIN_ROOT: &str = "/@routekit/runtime";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    Builtin,
    Directory,
}

/// The package behind the configured runtime name
#[derive(Debug, Clone)]
pub struct RuntimePackage {
    name: String,
    root: PathBuf,
    exports: Value,
    source: Source,
}

impl RuntimePackage {
    /// The built-in runtime, importable as `name`
    pub fn builtin(name: &str) -> Self {
        let exports = serde_json::from_str::<Value>(BUILTIN_FILES[0].1)
            .ok()
            .and_then(|manifest| manifest.get("exports").cloned())
            .unwrap_or(Value::Null);

        Self {
            name: name.to_string(),
            root: Path::new(BUILTIN_ROOT).join(name),
            exports,
            source: Source::Builtin,
        }
    }

    /// A runtime package on disk, described by its `package.json`
    pub fn from_dir(name: &str, root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        let manifest = std::fs::read_to_string(root.join("package.json"))?;
        let manifest: Value = serde_json::from_str(&manifest)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        Ok(Self {
            name: name.to_string(),
            exports: manifest.get("exports").cloned().unwrap_or(Value::Null),
            root,
            source: Source::Directory,
        })
    }

    /// `[runtime] root` is relative to the project root
    pub fn from_config(config: &RuntimeConfig, project_root: &Path) -> io::Result<Self> {
        match &config.root {
            Some(root) => Self::from_dir(&config.package, project_root.join(root)),
            None => Ok(Self::builtin(&config.package)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_builtin(&self) -> bool {
        self.source == Source::Builtin
    }

    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }

    /// Relative file for an export subpath (`.` or `./x`)
    pub fn export(&self, subpath: &str, target: Target) -> Option<String> {
        export_target(&self.exports, subpath, target)
    }

    /// Reads a runtime module
    pub fn read(&self, path: &Path) -> io::Result<String> {
        match self.source {
            Source::Directory => std::fs::read_to_string(path),
            Source::Builtin => {
                let relative = path
                    .strip_prefix(&self.root)
                    .map_err(|_| io::Error::new(io::ErrorKind::NotFound, format!("{} is outside the runtime", path.display())))?;
                BUILTIN_FILES
                    .iter()
                    .find(|(file, _)| Path::new(file) == relative)
                    .map(|(_, contents)| contents.to_string())
                    .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("runtime has no {}", relative.display())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_exports() {
        let runtime = RuntimePackage::builtin("svelte");
        assert!(runtime.is_builtin());
        assert_eq!(runtime.export(".", Target::Browser).as_deref(), Some("./index.js"));
        assert_eq!(runtime.export("./internal", Target::Browser).as_deref(), Some("./internal.js"));
        assert_eq!(runtime.export("./store", Target::Browser), None);
    }

    #[test]
    fn test_builtin_read() {
        let runtime = RuntimePackage::builtin("svelte");
        let internal = runtime.read(&runtime.root().join("internal.js")).unwrap();
        assert!(internal.contains("export function mount"));
        assert!(runtime.read(&runtime.root().join("missing.js")).is_err());
        assert!(runtime.read(Path::new("/elsewhere/index.js")).is_err());
    }

    #[test]
    fn test_runtime_from_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{ "exports": { ".": { "browser": { "import": "./client.js" } } } }"#,
        )
        .unwrap();

        let runtime = RuntimePackage::from_dir("ui", dir.path()).unwrap();
        assert_eq!(runtime.name(), "ui");
        assert!(!runtime.is_builtin());
        assert_eq!(runtime.export(".", Target::Browser).as_deref(), Some("./client.js"));
        assert!(runtime.contains(&dir.path().join("client.js")));
    }
}
