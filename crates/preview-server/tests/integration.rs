use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, StatusCode};
use axum::response::Redirect;
use axum::routing::{get, post};
use http_body_util::BodyExt;
use preview_core::config::{PortRange, PreviewProgram, ServerConfig};
use preview_core::fetch::SourceFetcher;
use preview_core::paths::new_deployment_id;
use preview_core::{Deployment, DeploymentStatus, PreviewError};
use preview_server::state::AppState;
use tempfile::TempDir;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const HOST: &str = "preview.test";

/// Fetcher for a remote whose `main` branch holds `docs/mint.json`.
struct FakeFetcher;

impl SourceFetcher for FakeFetcher {
    fn exists(&self, _repo_url: &str, branch: &str) -> preview_core::Result<()> {
        if branch == "main" {
            Ok(())
        } else {
            Err(PreviewError::Fetch(format!("branch {branch} not found")))
        }
    }

    fn fetch(&self, _repo_url: &str, _branch: &str, dest: &Path) -> preview_core::Result<()> {
        std::fs::create_dir_all(dest.join("docs"))?;
        std::fs::write(dest.join("docs/mint.json"), "{}")?;
        Ok(())
    }
}

fn app_state(dir: &TempDir) -> AppState {
    let config = ServerConfig {
        data_dir: dir.path().to_path_buf(),
        port_range: PortRange {
            start: 50000,
            end: 60000,
        },
        port_attempts: 200,
        preview: PreviewProgram {
            program: "sh".into(),
            args: vec!["-c".into(), "exec sleep 30".into()],
        },
        shutdown_grace_secs: 1,
        ..ServerConfig::default()
    };
    AppState::new(config, Arc::new(FakeFetcher)).unwrap()
}

fn deploy_body(config_path: &str, branch: &str) -> serde_json::Value {
    serde_json::json!({
        "sourceRef": "https://github.com/acme/docs/pull/12",
        "branch": branch,
        "configPath": config_path,
    })
}

/// Send a request via `oneshot` and return (status, headers, raw body).
async fn send(
    app: axum::Router,
    method: &str,
    uri: &str,
    host: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, axum::http::HeaderMap, String) {
    let mut builder = axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .header(header::HOST, host);
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            axum::body::Body::from(serde_json::to_vec(&json).unwrap())
        }
        None => axum::body::Body::empty(),
    };
    let response = app.oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, String::from_utf8_lossy(&bytes).into_owned())
}

/// Send a request and parse the body as JSON (Null when it is not JSON).
async fn send_json(
    app: axum::Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let (status, _, text) = send(app, method, uri, HOST, body).await;
    let json = serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);
    (status, json)
}

/// Insert a record directly, pointing at `port`, in `status`.
fn seed(state: &AppState, port: u16, status: DeploymentStatus) -> String {
    let id = new_deployment_id();
    let d = Deployment::new(
        &id,
        "https://github.com/acme/docs.git",
        "https://github.com/acme/docs.git",
        "main",
        "docs/mint.json",
        port,
        format!("http://{id}.{HOST}"),
    );
    state.store.create(&d).unwrap();
    if status != DeploymentStatus::Starting {
        state.store.update_status(&id, status, None).unwrap();
    }
    id
}

async fn settle(state: &AppState, id: &str) -> Deployment {
    for _ in 0..100 {
        let d = state.store.get(id).unwrap();
        if d.status != DeploymentStatus::Starting {
            return d;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{id} stuck in starting");
}

/// A stand-in preview server on an OS-chosen port.
async fn upstream() -> u16 {
    let app = axum::Router::new()
        .route("/hello", get(|| async { "hello from preview" }))
        .route("/echo", post(|body: String| async move { format!("echo:{body}") }))
        .route(
            "/headers",
            get(|headers: axum::http::HeaderMap| async move {
                let value = |name: &str| {
                    headers
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("-")
                        .to_string()
                };
                format!(
                    "host={} xfh={} xfp={}",
                    value("host"),
                    value("x-forwarded-host"),
                    value("x-forwarded-proto")
                )
            }),
        )
        .route("/moved", get(|| async { Redirect::temporary("/hello") }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

// ---------------------------------------------------------------------------
// Management API
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_returns_starting_with_stable_external_url() {
    let dir = TempDir::new().unwrap();
    let state = app_state(&dir);
    let app = preview_server::build_router(state.clone());

    let (status, created) = send_json(
        app.clone(),
        "POST",
        "/deploy",
        Some(deploy_body("docs/mint.json", "main")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "starting");
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["external_url"], format!("http://{id}.{HOST}"));
    assert_eq!(created["source_ref"], "https://github.com/acme/docs/pull/12");

    let (status, fetched) = send_json(app, "GET", &format!("/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["external_url"], created["external_url"]);

    assert_eq!(settle(&state, &id).await.status, DeploymentStatus::Running);
    state.supervisor.shutdown();
}

#[tokio::test]
async fn invalid_requests_are_rejected_with_400() {
    let dir = TempDir::new().unwrap();
    let state = app_state(&dir);
    let app = preview_server::build_router(state.clone());

    let (status, body) = send_json(
        app.clone(),
        "POST",
        "/deploy",
        Some(deploy_body("docs/mint.yaml", "main")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("config_path"));

    let (status, _) = send_json(
        app.clone(),
        "POST",
        "/deploy",
        Some(serde_json::json!({ "branch": "main" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(state.store.list(&[]).unwrap().is_empty());
}

#[tokio::test]
async fn unknown_branch_is_422_and_creates_nothing() {
    let dir = TempDir::new().unwrap();
    let state = app_state(&dir);
    let app = preview_server::build_router(state.clone());

    let (status, body) = send_json(
        app,
        "POST",
        "/deploy",
        Some(deploy_body("docs/mint.json", "feature/nope")),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("not found"));
    assert!(state.store.list(&[]).unwrap().is_empty());
}

#[tokio::test]
async fn unknown_ids_are_404() {
    let dir = TempDir::new().unwrap();
    let app = preview_server::build_router(app_state(&dir));

    let (status, _) = send_json(app.clone(), "GET", &format!("/{}", new_deployment_id()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send_json(app.clone(), "GET", "/not-an-id", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send_json(app, "DELETE", "/not-an-id", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_twice_stops_then_reports_not_found() {
    let dir = TempDir::new().unwrap();
    let state = app_state(&dir);
    let app = preview_server::build_router(state.clone());

    let (_, created) = send_json(
        app.clone(),
        "POST",
        "/deploy",
        Some(deploy_body("docs/mint.json", "main")),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(settle(&state, &id).await.status, DeploymentStatus::Running);

    let (status, body) = send_json(app.clone(), "DELETE", &format!("/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "stopped");

    let (status, body) = send_json(app.clone(), "DELETE", &format!("/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));

    // Stopped stays stopped.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let (_, body) = send_json(app, "GET", &format!("/{id}"), None).await;
    assert_eq!(body["status"], "stopped");
}

#[tokio::test]
async fn missing_config_file_ends_failed() {
    let dir = TempDir::new().unwrap();
    let state = app_state(&dir);
    let app = preview_server::build_router(state.clone());

    let (status, created) = send_json(
        app.clone(),
        "POST",
        "/deploy",
        Some(deploy_body("docs/config.json", "main")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();

    let d = settle(&state, &id).await;
    assert_eq!(d.status, DeploymentStatus::Failed);
    assert!(d.last_error.unwrap().contains("not found"));

    let (_, body) = send_json(app, "GET", &format!("/{id}"), None).await;
    assert_eq!(body["status"], "failed");
    assert!(body["last_error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn concurrent_creates_get_distinct_ids_and_ports() {
    let dir = TempDir::new().unwrap();
    let state = app_state(&dir);
    let app = preview_server::build_router(state.clone());

    let body = || Some(deploy_body("docs/mint.json", "main"));
    let (a, b) = tokio::join!(
        send_json(app.clone(), "POST", "/deploy", body()),
        send_json(app.clone(), "POST", "/deploy", body()),
    );
    let (a, b) = (a.1["id"].as_str().unwrap(), b.1["id"].as_str().unwrap());
    assert_ne!(a, b);
    assert_ne!(
        state.store.get(a).unwrap().internal_url,
        state.store.get(b).unwrap().internal_url
    );
    state.lifecycle.drain(Duration::from_secs(5)).await;
    state.supervisor.shutdown();
}

#[tokio::test]
async fn list_filters_by_status() {
    let dir = TempDir::new().unwrap();
    let state = app_state(&dir);
    let app = preview_server::build_router(state.clone());
    let running = seed(&state, 1, DeploymentStatus::Running);
    seed(&state, 2, DeploymentStatus::Stopped);

    let (status, all) = send_json(app.clone(), "GET", "/deployments", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 2);

    let (_, only) = send_json(app.clone(), "GET", "/deployments?status=running", None).await;
    let only = only.as_array().unwrap();
    assert_eq!(only.len(), 1);
    assert_eq!(only[0]["id"], running.as_str());

    let (status, _) = send_json(app, "GET", "/deployments?status=bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn healthz_reports_supervised_count() {
    let dir = TempDir::new().unwrap();
    let app = preview_server::build_router(app_state(&dir));
    let (status, body) = send_json(app, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["supervised"], 0);
}

// ---------------------------------------------------------------------------
// Subdomain routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_subdomain_is_not_found() {
    let dir = TempDir::new().unwrap();
    let app = preview_server::build_router(app_state(&dir));
    let host = format!("{}.{HOST}", new_deployment_id());

    let (status, _, body) = send(app.clone(), "GET", "/", &host, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("Deployment not found"));

    // Management paths on a deployment host still go to the router.
    let (status, _, _) = send(app, "GET", "/healthz", &host, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn single_label_host_is_bad_request() {
    let dir = TempDir::new().unwrap();
    let app = preview_server::build_router(app_state(&dir));
    let (status, _, _) = send(app, "GET", "/some/page", "localhost", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn starting_subdomain_serves_placeholder_without_upstream() {
    let dir = TempDir::new().unwrap();
    let state = app_state(&dir);
    // Nothing listens on port 1.
    let id = seed(&state, 1, DeploymentStatus::Starting);
    let app = preview_server::build_router(state);

    let host = format!("{}.{HOST}", id.to_ascii_uppercase());
    let (status, headers, body) = send(app, "GET", "/guides", &host, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-store");
    assert!(body.contains("Your preview is starting"));
}

#[tokio::test]
async fn terminal_subdomains_serve_status_pages() {
    let dir = TempDir::new().unwrap();
    let state = app_state(&dir);
    let failed = seed(&state, 1, DeploymentStatus::Failed);
    let stopped = seed(&state, 1, DeploymentStatus::Stopped);
    let app = preview_server::build_router(state);

    let (status, _, body) = send(app.clone(), "GET", "/", &format!("{failed}.{HOST}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Deployment Failed"));

    let (_, _, body) = send(app, "GET", "/", &format!("{stopped}.{HOST}"), None).await;
    assert!(body.contains("Deployment Stopped"));
}

#[tokio::test]
async fn running_subdomain_is_proxied_verbatim() {
    let dir = TempDir::new().unwrap();
    let state = app_state(&dir);
    let port = upstream().await;
    let id = seed(&state, port, DeploymentStatus::Running);
    let app = preview_server::build_router(state);
    let host = format!("{id}.{HOST}");

    let (status, _, body) = send(app.clone(), "GET", "/hello", &host, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "hello from preview");

    let (status, _, body) = send(
        app.clone(),
        "POST",
        "/echo",
        &host,
        Some(serde_json::json!({ "a": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"echo:{"a":1}"#);

    let (_, _, body) = send(app.clone(), "GET", "/headers", &host, None).await;
    assert_eq!(body, format!("host=127.0.0.1:{port} xfh={host} xfp=http"));

    // Redirects go back to the client untouched.
    let (status, headers, _) = send(app, "GET", "/moved", &host, None).await;
    assert_eq!(status, StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(headers.get(header::LOCATION).unwrap(), "/hello");
}

#[tokio::test]
async fn unreachable_upstream_is_bad_gateway() {
    let dir = TempDir::new().unwrap();
    let state = app_state(&dir);
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let id = seed(&state, port, DeploymentStatus::Running);
    let app = preview_server::build_router(state);

    let (status, _, _) = send(app, "GET", "/", &format!("{id}.{HOST}"), None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn recovery_relaunches_unsupervised_running_records() {
    let dir = TempDir::new().unwrap();
    let id = {
        let state = app_state(&dir);
        seed(&state, 55555, DeploymentStatus::Running)
    };

    // Fresh state over the same data dir, as after a restart.
    let state = app_state(&dir);
    assert!(!state.supervisor.is_supervised(&id));

    let report = preview_server::recovery::recover(&state.lifecycle).unwrap();
    assert_eq!(report.redriven, vec![id.clone()]);

    assert_eq!(settle(&state, &id).await.status, DeploymentStatus::Running);
    assert!(state.supervisor.is_supervised(&id));
    state.supervisor.shutdown();
}

#[tokio::test]
async fn serve_on_recovers_then_shuts_down_cleanly() {
    let dir = TempDir::new().unwrap();
    let id = {
        let state = app_state(&dir);
        seed(&state, 55556, DeploymentStatus::Running)
    };
    let state = app_state(&dir);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(preview_server::serve_on(listener, state.clone(), async {
        let _ = rx.await;
    }));
    assert_eq!(settle(&state, &id).await.status, DeploymentStatus::Running);

    tx.send(()).unwrap();
    server.await.unwrap().unwrap();
    assert_eq!(state.supervisor.live_count(), 0);
    // Left running for the next start to recover.
    assert_eq!(state.store.get(&id).unwrap().status, DeploymentStatus::Running);
}
