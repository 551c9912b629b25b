//! Reverse Proxy Router.
//!
//! Subdomain traffic is recognised by the leading label of the Host. A label
//! shaped like a deployment id is looked up in the store and the request is
//! proxied to the local preview process, answered with the placeholder page,
//! or answered with a status page, depending on the record's status.

use axum::{
    body::{Body, HttpBody},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use preview_core::paths::normalize_id;
use preview_core::{Deployment, DeploymentStatus, PreviewError};

use crate::{error::AppError, pages, state::AppState};

// ---------------------------------------------------------------------------
// Hop-by-hop headers, dropped in both directions
// ---------------------------------------------------------------------------

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

// ---------------------------------------------------------------------------
// Host parsing
// ---------------------------------------------------------------------------

/// Host the request was addressed to, port included.
pub fn request_host(headers: &HeaderMap, uri: &Uri) -> String {
    headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|a| a.to_string()))
        .unwrap_or_default()
}

/// Leading label of `host` when the host has at least two labels.
fn leading_label(host: &str) -> Option<&str> {
    let bare = host.split(':').next().unwrap_or(host);
    let mut labels = bare.split('.');
    let first = labels.next().filter(|l| !l.is_empty())?;
    labels.next().filter(|l| !l.is_empty())?;
    Some(first)
}

/// Deployment id addressed by `host`, if its leading label has the id shape.
pub fn deployment_id(host: &str) -> Option<String> {
    leading_label(host).and_then(normalize_id)
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Middleware: subdomain traffic goes to the router whatever its path, so a
/// preview's own `/deploy` or `/healthz` never reaches a management route.
pub async fn host_dispatch(State(app): State<AppState>, req: Request, next: Next) -> Response {
    let host = request_host(req.headers(), req.uri());
    match deployment_id(&host) {
        Some(id) => route(&app, id, req).await,
        None => next.run(req).await,
    }
}

/// Fallback for everything no management route matched.
pub async fn fallback(State(app): State<AppState>, req: Request) -> Response {
    let host = request_host(req.headers(), req.uri());
    let Some(label) = leading_label(&host) else {
        return (StatusCode::BAD_REQUEST, "Invalid hostname").into_response();
    };
    match normalize_id(label) {
        Some(id) => route(&app, id, req).await,
        None => not_found(),
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Deployment not found").into_response()
}

/// Dispatch on the stored status of `id`.
pub async fn route(app: &AppState, id: String, req: Request) -> Response {
    let store = app.store.clone();
    let lookup = tokio::task::spawn_blocking(move || store.get(&id)).await;
    let deployment = match lookup {
        Ok(Ok(d)) => d,
        Ok(Err(PreviewError::NotFound(_))) => return not_found(),
        Ok(Err(e)) => return AppError::from(e).into_response(),
        Err(e) => return AppError(anyhow::anyhow!("task join error: {e}")).into_response(),
    };

    match deployment.status {
        DeploymentStatus::Running => forward(app, &deployment, req).await,
        DeploymentStatus::Starting => pages::loading(),
        other => pages::status(other),
    }
}

// ---------------------------------------------------------------------------
// Forwarding
// ---------------------------------------------------------------------------

fn build_upstream_url(internal_url: &str, uri: &Uri) -> String {
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    format!("{}{}", internal_url.trim_end_matches('/'), path)
}

/// Copy `headers` minus hop-by-hop ones, including any the peer listed in
/// its `Connection` header.
fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|s| s.trim().to_ascii_lowercase())
        .collect();
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let n = name.as_str();
        if HOP_BY_HOP.contains(&n) || listed.iter().any(|l| l == n) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Feed an axum body to reqwest, which needs a `Sync` stream.
fn upstream_body(body: Body) -> reqwest::Body {
    if body.size_hint().exact() == Some(0) {
        return reqwest::Body::from(Bytes::new());
    }
    let (mut tx, rx) = futures::channel::mpsc::channel::<Result<Bytes, std::io::Error>>(8);
    tokio::spawn(async move {
        let mut stream = body.into_data_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(std::io::Error::other);
            let failed = chunk.is_err();
            if tx.send(chunk).await.is_err() || failed {
                break;
            }
        }
    });
    reqwest::Body::wrap_stream(rx)
}

async fn forward(app: &AppState, deployment: &Deployment, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let url = build_upstream_url(&deployment.internal_url, &parts.uri);
    let original_host = request_host(&parts.headers, &parts.uri);

    let mut headers = forwardable(&parts.headers);
    // reqwest sets Host from the upstream URL.
    headers.remove(header::HOST);
    if let Ok(v) = HeaderValue::from_str(&original_host) {
        headers.insert(X_FORWARDED_HOST, v);
    }
    if let Ok(v) = HeaderValue::from_str(&app.config.public_scheme) {
        headers.insert(X_FORWARDED_PROTO, v);
    }

    tracing::debug!(id = %deployment.id, method = %parts.method, %url, "proxying");
    let upstream = match app
        .http
        .request(parts.method, &url)
        .headers(headers)
        .body(upstream_body(body))
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(id = %deployment.id, "upstream request failed: {e}");
            return (StatusCode::BAD_GATEWAY, "Could not reach preview server").into_response();
        }
    };

    let status = upstream.status();
    let headers = forwardable(upstream.headers());
    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
