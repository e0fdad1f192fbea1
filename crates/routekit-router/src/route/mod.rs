/// Route module for file-based routing
///
/// Contains pure components for route derivation and matching:
/// - [`pattern`] turns file names into URL patterns and class names
/// - [`Route`] carries one route file's pattern, kind and parameters

pub mod pattern;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::classify::{classify_with_marker, Category, Method, STATIC_MARKER};
use pattern::{param_names, pattern_from_file_path};

/// How a route file handles requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteKind {
    /// Data script answering one HTTP method
    Http(Method),
    /// Server-rendered page with a hydration bundle
    Page,
    /// WebSocket endpoint driven by a data script
    Socket,
}

impl RouteKind {
    /// The HTTP method this kind answers; sockets upgrade a `GET`
    pub fn method(&self) -> Method {
        match self {
            RouteKind::Http(method) => *method,
            RouteKind::Page | RouteKind::Socket => Method::Get,
        }
    }

    /// Route kind for a file category, if the category is routable
    pub fn from_category(category: Category) -> Option<Self> {
        match category {
            Category::HttpMethodRoute(method) => Some(RouteKind::Http(method)),
            Category::PageRoute => Some(RouteKind::Page),
            Category::SocketRoute => Some(RouteKind::Socket),
            Category::Dependency | Category::Static | Category::Irrelevant => None,
        }
    }

    /// Two kinds collide when they would answer the same request
    pub fn conflicts_with(&self, other: &RouteKind) -> bool {
        match (self, other) {
            (RouteKind::Socket, RouteKind::Socket) => true,
            (RouteKind::Socket, _) | (_, RouteKind::Socket) => false,
            (a, b) => a.method() == b.method(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RouteKind::Http(method) => method.as_str(),
            RouteKind::Page => "PAGE",
            RouteKind::Socket => "SOCKET",
        }
    }
}

/// A single route derived from a route file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// URL pattern like "/about/:id"
    pub pattern: String,
    pub kind: RouteKind,
    /// Absolute path of the route file
    pub file_path: PathBuf,
    /// Parameter names in order of appearance
    pub params: Vec<String>,
    /// Priority for matching (lower = higher priority)
    pub priority: usize,
}

impl Route {
    /// Creates a route from a route file below `base_path`
    ///
    /// Returns `None` for files that are not routes (dependencies, static
    /// assets, anything else).
    ///
    /// # Examples
    ///
    /// ```
    /// use routekit_router::{Route, RouteKind};
    ///
    /// let route = Route::from_file("site/about_[id].page", "site").unwrap();
    /// assert_eq!(route.pattern, "/about/:id");
    /// assert_eq!(route.kind, RouteKind::Page);
    /// assert_eq!(route.params, vec!["id"]);
    ///
    /// assert!(Route::from_file("site/lib/Modal.component", "site").is_none());
    /// ```
    pub fn from_file(file_path: impl AsRef<Path>, base_path: impl AsRef<Path>) -> Option<Self> {
        Self::from_file_with_marker(file_path, base_path, STATIC_MARKER)
    }

    /// Like [`Route::from_file`] with a custom static-assets marker
    pub fn from_file_with_marker(
        file_path: impl AsRef<Path>,
        base_path: impl AsRef<Path>,
        static_marker: &str,
    ) -> Option<Self> {
        let file_path = file_path.as_ref();
        let kind = RouteKind::from_category(classify_with_marker(file_path, static_marker))?;
        let pattern = pattern_from_file_path(file_path, base_path);

        Some(match kind {
            RouteKind::Http(method) => Self::http(pattern, method, file_path),
            RouteKind::Page => Self::page(pattern, file_path),
            RouteKind::Socket => Self::socket(pattern, file_path),
        })
    }

    /// HTTP-method route answered by a data script
    pub fn http(pattern: impl Into<String>, method: Method, file_path: impl Into<PathBuf>) -> Self {
        Self::with_kind(pattern.into(), RouteKind::Http(method), file_path.into())
    }

    /// Page route
    pub fn page(pattern: impl Into<String>, file_path: impl Into<PathBuf>) -> Self {
        Self::with_kind(pattern.into(), RouteKind::Page, file_path.into())
    }

    /// WebSocket route
    pub fn socket(pattern: impl Into<String>, file_path: impl Into<PathBuf>) -> Self {
        Self::with_kind(pattern.into(), RouteKind::Socket, file_path.into())
    }

    fn with_kind(pattern: String, kind: RouteKind, file_path: PathBuf) -> Self {
        let params = param_names(&pattern);
        let depth = pattern.matches('/').count();
        let priority = calculate_priority(params.len(), depth);

        Route {
            pattern,
            kind,
            file_path,
            params,
            priority,
        }
    }

    /// Matches this route against a path (case-sensitive)
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        self.matches_with_options(path, false)
    }

    /// Matches this route against a path with options
    ///
    /// Walks pattern and path segments together; `:name` segments capture one
    /// path segment each, every other segment must match literally.
    pub fn matches_with_options(
        &self,
        path: &str,
        case_insensitive: bool,
    ) -> Option<HashMap<String, String>> {
        let pattern_segments: Vec<&str> =
            self.pattern.split('/').filter(|s| !s.is_empty()).collect();
        let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        fn match_segments(
            pattern_segments: &[&str],
            path_segments: &[&str],
            mut params: HashMap<String, String>,
            case_insensitive: bool,
        ) -> Option<HashMap<String, String>> {
            match (pattern_segments.split_first(), path_segments.split_first()) {
                (None, None) => Some(params),
                (None, Some(_)) | (Some(_), None) => None,
                (Some((pattern_seg, pattern_rest)), Some((path_seg, path_rest))) => {
                    if let Some(name) = pattern_seg.strip_prefix(':') {
                        params.insert(name.to_string(), (*path_seg).to_string());
                    } else {
                        let matches = if case_insensitive {
                            pattern_seg.eq_ignore_ascii_case(path_seg)
                        } else {
                            pattern_seg == path_seg
                        };
                        if !matches {
                            return None;
                        }
                    }
                    match_segments(pattern_rest, path_rest, params, case_insensitive)
                }
            }
        }

        match_segments(&pattern_segments, &path_segments, HashMap::new(), case_insensitive)
    }
}

/// Static routes first, then fewer parameters, then shallower patterns
fn calculate_priority(dynamic_count: usize, depth: usize) -> usize {
    if dynamic_count == 0 {
        0
    } else {
        dynamic_count * 100 + depth
    }
}
