//! Integration tests for routekit-router
//!
//! Tests are organized by feature area and cover:
//! - File classification
//! - Pattern derivation from file names
//! - Class names for hydration bundles
//! - Matching and conflicts

use pretty_assertions::assert_eq;
use routekit_router::*;
use rstest::rstest;
use std::path::Path;

// ============================================================================
// Classification
// ============================================================================

#[rstest]
#[case("site/index.page", Category::PageRoute)]
#[case("site/chat.socket", Category::SocketRoute)]
#[case("site/hello.get", Category::HttpMethodRoute(Method::Get))]
#[case("site/hello.head", Category::HttpMethodRoute(Method::Head))]
#[case("site/hello.patch", Category::HttpMethodRoute(Method::Patch))]
#[case("site/hello.options", Category::HttpMethodRoute(Method::Options))]
#[case("site/hello.connect", Category::HttpMethodRoute(Method::Connect))]
#[case("site/hello.delete", Category::HttpMethodRoute(Method::Delete))]
#[case("site/hello.trace", Category::HttpMethodRoute(Method::Trace))]
#[case("site/hello.post", Category::HttpMethodRoute(Method::Post))]
#[case("site/hello.put", Category::HttpMethodRoute(Method::Put))]
#[case("site/Counter.component", Category::Dependency)]
#[case("site/Modal.svelte", Category::Dependency)]
#[case("site/util.js", Category::Dependency)]
#[case("site/db.rhai", Category::Dependency)]
#[case("site/#static/logo.png", Category::Static)]
#[case("site/#static/index.page", Category::Static)]
#[case("site/README.md", Category::Irrelevant)]
#[case("site/Makefile", Category::Irrelevant)]
fn test_classification_table(#[case] path: &str, #[case] expected: Category) {
    assert_eq!(classify(path), expected);
}

#[test]
fn test_classification_is_total_and_stable() {
    // Every path gets exactly one category, and asking twice gives the same answer
    let paths = [
        "a.page", "b.socket", "c.get", "d.svelte", "#static/e.css", "f", ".hidden", "g.tar.gz",
    ];
    for path in paths {
        assert_eq!(classify(path), classify(path), "{path}");
    }
}

// ============================================================================
// Pattern derivation
// ============================================================================

#[rstest]
#[case("site/index.page", "/")]
#[case("site/admin/index_[password].socket", "/admin/:password")]
#[case("site/manage_[token]_[domain].socket", "/manage/:token/:domain")]
#[case("site/about_[id].page", "/about/:id")]
#[case("site/admin/index.page", "/admin")]
#[case("site/blog/posts_[slug].get", "/blog/posts/:slug")]
#[case("site/private/token.post", "/private/token")]
fn test_pattern_from_file_path(#[case] file: &str, #[case] expected: &str) {
    assert_eq!(pattern_from_file_path(file, "site"), expected);
}

#[test]
fn test_pattern_derivation_is_pure() {
    let first = pattern_from_file_path("/srv/app/src/manage_[token]_[domain].socket", "/srv/app/src");
    let second = pattern_from_file_path("/srv/app/src/manage_[token]_[domain].socket", "/srv/app/src");
    assert_eq!(first, second);
    assert_eq!(first, "/manage/:token/:domain");
}

#[test]
fn test_pattern_from_absolute_paths() {
    let base = Path::new("/srv/app/src");
    let file = base.join("admin").join("index_[password].socket");
    assert_eq!(pattern_from_file_path(&file, base), "/admin/:password");
}

// ============================================================================
// Class names
// ============================================================================

#[rstest]
#[case("/", "IndexPage")]
#[case("/about/:id", "AboutPage")]
#[case("/blog/posts/:slug", "BlogPostsPage")]
#[case("/user-settings", "UserSettingsPage")]
fn test_class_name_from_pattern(#[case] pattern: &str, #[case] expected: &str) {
    assert_eq!(class_name_from_pattern(pattern), expected);
}

// ============================================================================
// Router
// ============================================================================

fn site_router(files: &[&str]) -> Router {
    let mut router = Router::new();
    for file in files {
        let route = Route::from_file(format!("site/{file}"), "site").unwrap();
        router.add_route(route).unwrap();
    }
    router
}

#[test]
fn test_index_and_about_scenario() {
    let router = site_router(&["index.page", "about_[id].page"]);

    let root = router.match_route("/", Method::Get).unwrap();
    assert_eq!(root.route.pattern, "/");
    assert_eq!(class_name_from_pattern(&root.route.pattern), "IndexPage");

    let about = router.match_route("/about/42", Method::Get).unwrap();
    assert_eq!(about.route.kind, RouteKind::Page);
    assert_eq!(about.params.get("id"), Some(&"42".to_string()));
    assert_eq!(class_name_from_pattern(&about.route.pattern), "AboutPage");
}

#[test]
fn test_methods_share_a_pattern() {
    let router = site_router(&["hello.get", "hello.post", "hello.socket"]);

    let get = router.match_route("/hello", Method::Get).unwrap();
    assert_eq!(get.route.kind, RouteKind::Http(Method::Get));

    let post = router.match_route("/hello", Method::Post).unwrap();
    assert_eq!(post.route.kind, RouteKind::Http(Method::Post));

    assert!(router.match_route("/hello", Method::Delete).is_none());
    assert!(router.match_socket("/hello").is_some());
}

#[test]
fn test_head_falls_back_to_get() {
    let router = site_router(&["hello.get"]);
    let head = router.match_route("/hello", Method::Head).unwrap();
    assert_eq!(head.route.kind, RouteKind::Http(Method::Get));
}

#[test]
fn test_static_beats_dynamic() {
    let router = site_router(&["about_[id].page", "about_team.page"]);
    let matched = router.match_route("/about/team", Method::Get).unwrap();
    assert_eq!(matched.route.pattern, "/about/team");
    assert!(matched.params.is_empty());
}

#[test]
fn test_conflicting_files_are_rejected() {
    let mut router = site_router(&["admin/index.page"]);
    let conflict = router
        .add_route(Route::from_file("site/admin.page", "site").unwrap())
        .unwrap_err();

    assert_eq!(conflict.pattern, "/admin");
    assert_eq!(conflict.existing, Path::new("site/admin/index.page"));
    assert_eq!(conflict.incoming, Path::new("site/admin.page"));
}

#[test]
fn test_readding_same_file_replaces() {
    let mut router = site_router(&["hello.get"]);
    router
        .add_route(Route::from_file("site/hello.get", "site").unwrap())
        .unwrap();
    assert_eq!(router.routes().len(), 1);
}

#[test]
fn test_remove_file() {
    let mut router = site_router(&["hello.get", "index.page"]);
    let removed = router.remove_file(Path::new("site/hello.get")).unwrap();
    assert_eq!(removed.pattern, "/hello");
    assert!(router.match_route("/hello", Method::Get).is_none());
    assert!(router.match_route("/", Method::Get).is_some());
}

#[test]
fn test_match_normalizes_request_path() {
    let router = site_router(&["about_[id].page"]);
    assert!(router.match_route("/about/42/", Method::Get).is_some());
    assert!(router.match_route("//about//42", Method::Get).is_some());
}
