/// HTTP-level tests: a project on disk served through the axum router

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use pretty_assertions::assert_eq;
use routekit::routekit_router::Method;
use routekit::{App, Config, Registry};
use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

struct Served {
    _dir: TempDir,
    router: Router,
    registry: Arc<Registry>,
}

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    let files = [
        ("index.page", "<h1>Home</h1>"),
        (
            "about_[id].page",
            "<data>\n#{ id: request.param(\"id\") }\n</data>\n<p>About {data.id}</p>",
        ),
        ("api/count.get", "#{ ok: true }"),
        ("api/echo.post", "#{ got: request.json() }"),
        ("api/created.post", "respond(201, #{ id: 1 })"),
        ("broken.get", "let x = ;"),
        ("chat.socket", "#{ reply: \"echo: \" + message }"),
        ("#static/hello.txt", "hello static"),
    ];
    for (name, contents) in files {
        let path = dir.path().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }
    dir
}

fn serve(dir: TempDir) -> Served {
    let mut config = Config::default();
    config.dev.route_ready_timeout_ms = 10_000;

    let app = App::start(dir.path(), config).unwrap();
    let router = app.router();
    let registry = app.registry().clone();
    tokio::spawn(app.supervise());

    Served {
        _dir: dir,
        router,
        registry,
    }
}

async fn get(router: &Router, uri: &str) -> (StatusCode, String) {
    send(router, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn test_page_with_data_script() {
    let served = serve(project());

    let (status, html) = get(&served.router, "/about/42").await;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("<p>About 42</p>"));
    assert!(html.contains(r#"{"id":"42"}"#));
    assert!(html.contains("AboutPage"));

    let (status, html) = get(&served.router, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("<h1>Home</h1>"));
    assert!(html.contains("IndexPage"));
}

#[tokio::test]
async fn test_http_routes() {
    let served = serve(project());

    let (status, body) = get(&served.router, "/api/count").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({ "ok": true }));

    let request = Request::post("/api/echo")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"name":"ada"}"#))
        .unwrap();
    let (status, body) = send(&served.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({ "got": { "name": "ada" } }));

    let request = Request::post("/api/created").body(Body::empty()).unwrap();
    let (status, body) = send(&served.router, request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({ "id": 1 }));
}

#[tokio::test]
async fn test_concurrent_first_requests_build_once() {
    let served = serve(project());

    let requests = (0..8).map(|_| get(&served.router, "/api/count"));
    for (status, _) in futures::future::join_all(requests).await {
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(served.registry.builds(), 1);

    let (entry, _) = served.registry.match_request("/api/count", Method::Get).unwrap();
    let (first, second) = tokio::join!(
        served.registry.handler(&entry, None),
        served.registry.handler(&entry, None)
    );
    assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
    assert_eq!(served.registry.builds(), 1);
}

#[tokio::test]
async fn test_broken_route_does_not_affect_others() {
    let served = serve(project());

    let request = Request::get("/broken")
        .header(header::ACCEPT, "application/json")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&served.router, request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let error: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(error["status"], 500);
    assert!(error["stack"].as_str().unwrap().contains("broken.get"));

    let (status, html) = get(&served.router, "/broken").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(html.contains("/.well-known/dev"));

    let (status, _) = get(&served.router, "/api/count").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_static_files_and_not_found() {
    let served = serve(project());

    let (status, body) = get(&served.router, "/hello.txt").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "hello static");

    let (status, html) = get(&served.router, "/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(html.contains("404"));
}

#[tokio::test]
async fn test_well_known_endpoints() {
    let served = serve(project());

    let (status, _) = get(&served.router, "/.well-known/ping").await;
    assert_eq!(status, StatusCode::OK);

    // A socket route without an upgrade
    let (status, _) = get(&served.router, "/chat").await;
    assert_eq!(status, StatusCode::UPGRADE_REQUIRED);
}

#[tokio::test]
async fn test_route_conflict_fails_startup() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("about.page"), "<p>a</p>").unwrap();
    fs::create_dir_all(dir.path().join("about")).unwrap();
    fs::write(dir.path().join("about/index.page"), "<p>b</p>").unwrap();

    let error = App::start(dir.path(), Config::default()).err().unwrap();
    assert!(matches!(error, routekit::Error::Configuration(_)));
}

#[tokio::test]
async fn test_src_directory_is_preferred() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("src/index.page"), "<h1>from src</h1>").unwrap();
    fs::write(dir.path().join("index.page"), "<h1>from root</h1>").unwrap();

    let served = serve(dir);
    let (status, html) = get(&served.router, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("from src"));
}
