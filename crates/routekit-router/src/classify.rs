/// File classification by extension
///
/// Every file in a served directory plays exactly one role. The role is a pure
/// function of the file's extension, except for files below the static-assets
/// marker directory, which are always static.

use std::fmt;
use std::path::Path;

/// Directory name that marks static assets (served as-is, never routed)
pub const STATIC_MARKER: &str = "#static";

/// HTTP methods that can be used as route file extensions
pub const HTTP_METHOD_EXTENSIONS: [&str; 9] = [
    "get", "head", "patch", "options", "connect", "delete", "trace", "post", "put",
];

/// Extension for page routes (server-rendered markup + hydration bundle)
pub const PAGE_EXTENSION: &str = "page";

/// Extension for WebSocket routes
pub const SOCKET_EXTENSION: &str = "socket";

/// Extensions of files that are imported by routes but never routed themselves
pub const DEPENDENCY_EXTENSIONS: [&str; 4] = ["component", "svelte", "js", "rhai"];

/// HTTP method encoded in a route file's extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
    Get,
    Head,
    Patch,
    Options,
    Connect,
    Delete,
    Trace,
    Post,
    Put,
}

impl Method {
    /// Maps a file extension (without the dot) to a method
    ///
    /// ```
    /// use routekit_router::Method;
    ///
    /// assert_eq!(Method::from_extension("post"), Some(Method::Post));
    /// assert_eq!(Method::from_extension("page"), None);
    /// ```
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "get" => Some(Method::Get),
            "head" => Some(Method::Head),
            "patch" => Some(Method::Patch),
            "options" => Some(Method::Options),
            "connect" => Some(Method::Connect),
            "delete" => Some(Method::Delete),
            "trace" => Some(Method::Trace),
            "post" => Some(Method::Post),
            "put" => Some(Method::Put),
            _ => None,
        }
    }

    /// Upper-case method name as it appears on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Patch => "PATCH",
            Method::Options => "OPTIONS",
            Method::Connect => "CONNECT",
            Method::Delete => "DELETE",
            Method::Trace => "TRACE",
            Method::Post => "POST",
            Method::Put => "PUT",
        }
    }

    /// Parses an upper- or lower-case wire method name
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::from_extension(&name.to_ascii_lowercase())
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The role a file plays in the served directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// `name.get`, `name.post`, ... handled by a data script
    HttpMethodRoute(Method),
    /// `name.page`
    PageRoute,
    /// `name.socket`
    SocketRoute,
    /// Imported by routes: components and script modules
    Dependency,
    /// Anything below the static marker directory
    Static,
    /// Not relevant to routing
    Irrelevant,
}

impl Category {
    /// Whether files of this category get a route registry entry
    pub fn is_route(&self) -> bool {
        matches!(
            self,
            Category::HttpMethodRoute(_) | Category::PageRoute | Category::SocketRoute
        )
    }

    /// Short lower-case label used in logs
    pub fn label(&self) -> &'static str {
        match self {
            Category::HttpMethodRoute(_) => "http",
            Category::PageRoute => "page",
            Category::SocketRoute => "socket",
            Category::Dependency => "dependency",
            Category::Static => "static",
            Category::Irrelevant => "irrelevant",
        }
    }
}

/// Returns the extension of a path without the leading dot
///
/// ```
/// use routekit_router::extension_of;
///
/// assert_eq!(extension_of("site/about_[id].page"), "page");
/// assert_eq!(extension_of("README"), "");
/// ```
pub fn extension_of(path: impl AsRef<Path>) -> String {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_string()
}

/// Classifies a file using the default static marker (`#static`)
///
/// ```
/// use routekit_router::{classify, Category, Method};
///
/// assert_eq!(classify("site/index.page"), Category::PageRoute);
/// assert_eq!(classify("site/hello.post"), Category::HttpMethodRoute(Method::Post));
/// assert_eq!(classify("site/#static/app.js"), Category::Static);
/// assert_eq!(classify("site/notes.txt"), Category::Irrelevant);
/// ```
pub fn classify(path: impl AsRef<Path>) -> Category {
    classify_with_marker(path, STATIC_MARKER)
}

/// Classifies a file, treating anything below `static_marker` as static
pub fn classify_with_marker(path: impl AsRef<Path>, static_marker: &str) -> Category {
    let path = path.as_ref();

    let in_static_dir = path
        .components()
        .any(|component| component.as_os_str() == static_marker);
    if in_static_dir {
        return Category::Static;
    }

    category_for_extension(&extension_of(path))
}

/// Classifies a bare extension (without the dot)
pub fn category_for_extension(extension: &str) -> Category {
    if let Some(method) = Method::from_extension(extension) {
        return Category::HttpMethodRoute(method);
    }

    match extension {
        PAGE_EXTENSION => Category::PageRoute,
        SOCKET_EXTENSION => Category::SocketRoute,
        ext if DEPENDENCY_EXTENSIONS.contains(&ext) => Category::Dependency,
        _ => Category::Irrelevant,
    }
}

/// Whether an extension names a route file (HTTP method, page or socket)
pub fn is_route_extension(extension: &str) -> bool {
    category_for_extension(extension).is_route()
}
