/// Route pattern derivation from file names
///
/// File names encode URL patterns: `_` separates path segments, `[name]`
/// declares a parameter and an `index` file maps to its directory.
/// All functions are **pure**: same input → same output, no side effects.

use std::path::Path;

use crate::classify::is_route_extension;
use crate::path::to_slash_string;

/// Derives the URL pattern for a route file (pure function)
///
/// With the base directory stripped, the steps run in this order:
///
/// 1. an `index_` segment carrying parameters collapses into its directory
/// 2. every `_` becomes a `/`
/// 3. every `[name]` becomes `:name`
/// 4. a trailing `index.<ext>` is stripped
/// 5. the remaining route extension is stripped
///
/// # Examples
///
/// ```
/// use routekit_router::pattern_from_file_path;
///
/// assert_eq!(pattern_from_file_path("site/index.page", "site"), "/");
/// assert_eq!(
///     pattern_from_file_path("site/admin/index_[password].socket", "site"),
///     "/admin/:password"
/// );
/// assert_eq!(
///     pattern_from_file_path("site/manage_[token]_[domain].socket", "site"),
///     "/manage/:token/:domain"
/// );
/// assert_eq!(pattern_from_file_path("site/about_[id].page", "site"), "/about/:id");
/// ```
pub fn pattern_from_file_path(file_path: impl AsRef<Path>, base_path: impl AsRef<Path>) -> String {
    let file_path = to_slash_string(file_path.as_ref());
    let base_path = to_slash_string(base_path.as_ref());

    let relative = file_path
        .strip_prefix(base_path.trim_end_matches('/'))
        .unwrap_or(&file_path)
        .trim_start_matches('/');

    let rooted = format!("/{relative}");
    let collapsed = collapse_index_segment(&rooted);
    let slashed = collapsed.replace('_', "/");
    let parameterised = brackets_to_params(&slashed);
    let without_index = strip_index_file(&parameterised);
    let without_extension = strip_route_extension(without_index);

    finish_pattern(without_extension)
}

/// Replaces the first `/index_` (not followed by `/`) with `/`
fn collapse_index_segment(path: &str) -> String {
    const MARKER: &str = "/index_";

    let mut search_from = 0;
    while let Some(offset) = path[search_from..].find(MARKER) {
        let start = search_from + offset;
        let end = start + MARKER.len();
        if !path[end..].starts_with('/') {
            return format!("{}/{}", &path[..start], &path[end..]);
        }
        search_from = end;
    }

    path.to_string()
}

/// Rewrites every `[name]` into `:name`
fn brackets_to_params(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut rest = path;

    while let Some(open) = rest.find('[') {
        let Some(close) = rest[open..].find(']') else {
            break;
        };
        out.push_str(&rest[..open]);
        out.push(':');
        out.push_str(&rest[open + 1..open + close]);
        rest = &rest[open + close + 1..];
    }

    out.push_str(rest);
    out
}

/// Strips a trailing `index.<ext>` file name, keeping the directory's slash
fn strip_index_file(path: &str) -> &str {
    let Some(slash) = path.rfind('/') else {
        return path;
    };

    let file_name = &path[slash + 1..];
    match file_name.strip_prefix("index.") {
        Some(extension) if is_route_extension(extension) => &path[..=slash],
        _ => path,
    }
}

fn strip_route_extension(path: &str) -> &str {
    let file_start = path.rfind('/').map(|slash| slash + 1).unwrap_or(0);

    match path[file_start..].rfind('.') {
        Some(dot) if is_route_extension(&path[file_start + dot + 1..]) => {
            &path[..file_start + dot]
        }
        _ => path,
    }
}

/// Root stays `/`, any other trailing slash is trimmed
fn finish_pattern(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Returns the parameter names of a pattern in order of appearance
///
/// ```
/// use routekit_router::route::pattern::param_names;
///
/// assert_eq!(param_names("/manage/:token/:domain"), vec!["token", "domain"]);
/// assert!(param_names("/").is_empty());
/// ```
pub fn param_names(pattern: &str) -> Vec<String> {
    pattern
        .split('/')
        .filter_map(|segment| segment.strip_prefix(':'))
        .map(str::to_string)
        .collect()
}

/// Derives the hydration class name of a page from its pattern (pure function)
///
/// Parameter segments are dropped, the rest is split on `/`, `-` and `_` and
/// each fragment is title-cased. The root pattern yields `IndexPage`.
///
/// ```
/// use routekit_router::class_name_from_pattern;
///
/// assert_eq!(class_name_from_pattern("/"), "IndexPage");
/// assert_eq!(class_name_from_pattern("/about/:id"), "AboutPage");
/// assert_eq!(class_name_from_pattern("/user-settings/profile"), "UserSettingsProfilePage");
/// ```
pub fn class_name_from_pattern(pattern: &str) -> String {
    let stem: String = pattern
        .split('/')
        .filter(|segment| !segment.starts_with(':'))
        .flat_map(|segment| segment.split(['-', '_']))
        .map(title_case)
        .collect();

    let stem = if stem.is_empty() {
        "Index".to_string()
    } else if stem.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{stem}")
    } else {
        stem
    };

    format!("{stem}Page")
}

fn title_case(fragment: &str) -> String {
    let mut chars = fragment.chars().filter(|c| c.is_ascii_alphanumeric());
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + &chars.collect::<String>(),
        None => String::new(),
    }
}
