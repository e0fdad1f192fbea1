//! # Routekit Router
//!
//! A zero-dependency file-name based routing library:
//! - File classification by extension (`.page`, `.socket`, `.get`, `.post`, ...)
//! - Route pattern derivation (`about_[id].page` → `/about/:id`)
//! - Hydration class names (`/about/:id` → `AboutPage`)
//! - Request-path matching with required parameters
//!
//! ## Path Normalization
//!
//! Handles common user mistakes before matching:
//! - Trailing slashes: `/path/` → `/path`
//! - Double slashes: `/path//to` → `/path/to`
//! - Backslashes: `\path\to` → `/path/to`
//!
//! ## Example
//!
//! ```
//! use routekit_router::{Method, Route, Router};
//!
//! let mut router = Router::new();
//! router.add_route(Route::from_file("site/index.page", "site").unwrap()).unwrap();
//! router.add_route(Route::from_file("site/about_[id].page", "site").unwrap()).unwrap();
//!
//! let route_match = router.match_route("/about/42", Method::Get).unwrap();
//! assert_eq!(route_match.params.get("id"), Some(&"42".to_string()));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

mod classify;
pub mod path;
pub mod route;

pub use classify::{
    category_for_extension, classify, classify_with_marker, extension_of, is_route_extension,
    Category, Method, DEPENDENCY_EXTENSIONS, HTTP_METHOD_EXTENSIONS, PAGE_EXTENSION,
    SOCKET_EXTENSION, STATIC_MARKER,
};
pub use path::{is_valid_path, normalize_path};
pub use route::pattern::{class_name_from_pattern, pattern_from_file_path};
pub use route::{Route, RouteKind};

// ============================================================================
// Core Types
// ============================================================================

/// Result of matching a request path against the router
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Route,
    pub params: HashMap<String, String>,
}

/// Two distinct route files that answer the same request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteConflict {
    pub pattern: String,
    pub kind: RouteKind,
    pub existing: PathBuf,
    pub incoming: PathBuf,
}

impl fmt::Display for RouteConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} is defined by both {} and {}",
            self.kind.label(),
            self.pattern,
            self.existing.display(),
            self.incoming.display()
        )
    }
}

impl std::error::Error for RouteConflict {}

/// Main router
///
/// Routes are kept in a single `Vec` ordered by priority, so matching is a
/// short-circuiting scan: static patterns win over parameterised ones.
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
    case_insensitive: bool,
}

impl Router {
    /// Creates a new router with default settings (case-sensitive)
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a router with the given case sensitivity
    ///
    /// ```
    /// use routekit_router::{Method, Route, Router};
    ///
    /// let mut router = Router::with_case_insensitive(true);
    /// router.add_route(Route::page("/About", "site/About.page")).unwrap();
    /// assert!(router.match_route("/about", Method::Get).is_some());
    /// ```
    pub fn with_case_insensitive(case_insensitive: bool) -> Self {
        Self {
            routes: Vec::new(),
            case_insensitive,
        }
    }

    /// Adds a route, rejecting a second file for the same pattern and method
    ///
    /// Re-adding a route for the same file replaces it.
    ///
    /// ```
    /// use routekit_router::{Route, Router};
    ///
    /// let mut router = Router::new();
    /// router.add_route(Route::from_file("site/hello.get", "site").unwrap()).unwrap();
    /// let conflict = router.add_route(Route::from_file("site/hello.page", "site").unwrap());
    /// assert!(conflict.is_err());
    /// ```
    pub fn add_route(&mut self, route: Route) -> Result<(), RouteConflict> {
        let existing = self.routes.iter().find(|existing| {
            existing.file_path != route.file_path
                && existing.pattern == route.pattern
                && existing.kind.conflicts_with(&route.kind)
        });

        if let Some(existing) = existing {
            return Err(RouteConflict {
                pattern: route.pattern.clone(),
                kind: route.kind,
                existing: existing.file_path.clone(),
                incoming: route.file_path.clone(),
            });
        }

        self.routes.retain(|existing| existing.file_path != route.file_path);
        self.routes.push(route);
        self.routes.sort_by_key(|r| r.priority);
        Ok(())
    }

    /// Removes the route defined by a file, returning it
    pub fn remove_file(&mut self, file_path: &Path) -> Option<Route> {
        let pos = self.routes.iter().position(|r| r.file_path == file_path)?;
        Some(self.routes.remove(pos))
    }

    /// Matches a path against HTTP and page routes for a method
    ///
    /// A `HEAD` request falls back to the `GET` route when no `.head` file exists.
    pub fn match_route(&self, path: &str, method: Method) -> Option<RouteMatch> {
        let normalized = normalize_path(path);

        self.find_match(&normalized, |kind| {
            !matches!(kind, RouteKind::Socket) && kind.method() == method
        })
        .or_else(|| match method {
            Method::Head => self.match_route(&normalized, Method::Get),
            _ => None,
        })
    }

    /// Matches a path against socket routes
    pub fn match_socket(&self, path: &str) -> Option<RouteMatch> {
        let normalized = normalize_path(path);
        self.find_match(&normalized, |kind| matches!(kind, RouteKind::Socket))
    }

    fn find_match(&self, path: &str, accepts: impl Fn(&RouteKind) -> bool) -> Option<RouteMatch> {
        self.routes
            .iter()
            .filter(|route| accepts(&route.kind))
            .find_map(|route| {
                route
                    .matches_with_options(path, self.case_insensitive)
                    .map(|params| RouteMatch {
                        route: route.clone(),
                        params,
                    })
            })
    }

    /// Finds the route defined by a file
    pub fn route_for_file(&self, file_path: &Path) -> Option<&Route> {
        self.routes.iter().find(|r| r.file_path == file_path)
    }

    /// All routes in priority order
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
