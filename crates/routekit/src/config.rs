// File: src/config.rs
// Purpose: Configuration parsing from routekit.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Name of the configuration file at the project root
pub const CONFIG_FILE: &str = "routekit.toml";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Production mode: no hot reload, no dev socket, file changes are fatal
    #[serde(default)]
    pub production: bool,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub dev: DevConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub script: ScriptConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Preferred source subdirectory (default: "src")
    #[serde(default = "default_src_dir")]
    pub src_dir: String,

    /// Static assets directory name (default: "#static")
    #[serde(default = "default_static_dir")]
    pub static_dir: String,

    /// Third-party package directory, never scanned or watched (default: "node_modules")
    #[serde(default = "default_dependency_dir")]
    pub dependency_dir: String,

    /// Whether static route segments match case-insensitively (default: false)
    #[serde(default)]
    pub case_insensitive: bool,
}

/// Development configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevConfig {
    #[serde(default = "default_true")]
    pub hot_reload: bool,

    /// How long a page request waits for its first compile (milliseconds)
    #[serde(default = "default_route_ready_timeout_ms")]
    pub route_ready_timeout_ms: u64,
}

/// Client runtime package configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Bare specifier that resolves to the bundled runtime (default: "svelte")
    #[serde(default = "default_runtime_package")]
    pub package: String,

    /// Directory of the runtime package; the built-in runtime when unset
    #[serde(default)]
    pub root: Option<String>,
}

/// Data-script sandbox limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptConfig {
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,

    #[serde(default = "default_max_call_levels")]
    pub max_call_levels: usize,

    #[serde(default = "default_max_expr_depth")]
    pub max_expr_depth: usize,

    #[serde(default = "default_max_string_size")]
    pub max_string_size: usize,
}

// Default values
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_src_dir() -> String {
    "src".to_string()
}

fn default_static_dir() -> String {
    routekit_router::STATIC_MARKER.to_string()
}

fn default_dependency_dir() -> String {
    "node_modules".to_string()
}

fn default_route_ready_timeout_ms() -> u64 {
    5_000
}

fn default_runtime_package() -> String {
    "svelte".to_string()
}

fn default_max_operations() -> u64 {
    1_000_000
}

fn default_max_call_levels() -> usize {
    64
}

fn default_max_expr_depth() -> usize {
    64
}

fn default_max_string_size() -> usize {
    10 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

// Default implementations
impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            src_dir: default_src_dir(),
            static_dir: default_static_dir(),
            dependency_dir: default_dependency_dir(),
            case_insensitive: false,
        }
    }
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            hot_reload: true,
            route_ready_timeout_ms: default_route_ready_timeout_ms(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            package: default_runtime_package(),
            root: None,
        }
    }
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            max_operations: default_max_operations(),
            max_call_levels: default_max_call_levels(),
            max_expr_depth: default_max_expr_depth(),
            max_string_size: default_max_string_size(),
        }
    }
}

impl Config {
    /// Load configuration from a routekit.toml file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // If file doesn't exist or is empty, return default config
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Load `routekit.toml` from a project root, then apply environment overrides
    pub fn load_for_project(project_root: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::load(project_root.as_ref().join(CONFIG_FILE))?;
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Applies `PRODUCTION`, `HOT_RELOAD` and `PORT` overrides
    ///
    /// Production mode always disables hot reload.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(production) = lookup("PRODUCTION") {
            self.production = is_truthy(&production);
        }

        if let Some(hot_reload) = lookup("HOT_RELOAD") {
            self.dev.hot_reload = is_truthy(&hot_reload);
        }

        if let Some(port) = lookup("PORT").and_then(|port| port.trim().parse::<u16>().ok()) {
            self.server.port = port;
        }

        if self.production {
            self.dev.hot_reload = false;
        }
    }

    /// Whether the development socket and live recompilation are active
    pub fn hot_reload_enabled(&self) -> bool {
        !self.production && self.dev.hot_reload
    }
}

fn is_truthy(value: &str) -> bool {
    !matches!(value.trim().to_ascii_lowercase().as_str(), "" | "0" | "false" | "no" | "off")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.routing.src_dir, "src");
        assert_eq!(config.routing.static_dir, "#static");
        assert_eq!(config.routing.dependency_dir, "node_modules");
        assert_eq!(config.runtime.package, "svelte");
        assert!(!config.production);
        assert!(config.hot_reload_enabled());
    }

    #[test]
    fn test_empty_config() {
        let config = toml::from_str::<Config>("").unwrap_or_default();
        assert_eq!(config.dev.route_ready_timeout_ms, 5_000);
        assert_eq!(config.script.max_call_levels, 64);
    }

    #[test]
    fn test_partial_sections() {
        let toml = r#"
            [server]
            port = 8443

            [routing]
            case_insensitive = true

            [runtime]
            root = "vendor/svelte"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 8443);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.routing.case_insensitive);
        assert_eq!(config.runtime.root.as_deref(), Some("vendor/svelte"));
        assert_eq!(config.runtime.package, "svelte");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [("PRODUCTION", "1"), ("PORT", "8080"), ("HOT_RELOAD", "true")]
            .into_iter()
            .collect();

        let mut config = Config::default();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert!(config.production);
        assert_eq!(config.server.port, 8080);
        assert!(!config.dev.hot_reload);
        assert!(!config.hot_reload_enabled());
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = Config::load("definitely/not/here/routekit.toml").unwrap();
        assert_eq!(config.server.port, 3000);
    }
}
