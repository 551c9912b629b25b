use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use preview_core::DeploymentStatus;
use rust_embed::Embed;
use tera::{Context, Tera};

#[derive(Embed)]
#[folder = "$CARGO_MANIFEST_DIR/static/"]
struct Pages;

const LOADING: &str = "loading.html";
const STATUS: &str = "status.html";

/// Content of the page shown for a deployment that is not serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPage {
    pub title: &'static str,
    pub message: &'static str,
    pub icon: &'static str,
    pub color: &'static str,
}

impl StatusPage {
    /// Page for a status that is neither `running` nor `starting`. Anything
    /// unrecognised gets the unknown-state page.
    pub fn for_status(status: DeploymentStatus) -> Self {
        match status {
            DeploymentStatus::Failed => Self {
                title: "Deployment Failed",
                message: "Something went wrong while starting the server. If this issue persists, please contact support.",
                icon: "\u{26a0}\u{fe0f}",
                color: "#ef4444",
            },
            DeploymentStatus::Stopped => Self {
                title: "Deployment Stopped",
                message: "The documentation preview is currently unavailable.",
                icon: "\u{1f6d1}",
                color: "#6366f1",
            },
            _ => Self {
                title: "Unknown Deployment State",
                message: "We're unable to determine the current state of your deployment. Please check back later or contact support if this persists.",
                icon: "\u{2753}",
                color: "#eab308",
            },
        }
    }

    /// Render `status.html`. Values are autoescaped.
    pub fn render(&self) -> tera::Result<String> {
        let mut ctx = Context::new();
        ctx.insert("title", self.title);
        ctx.insert("message", self.message);
        ctx.insert("icon", self.icon);
        ctx.insert("color", self.color);
        status_templates()?.render(STATUS, &ctx)
    }
}

fn template(name: &str) -> Option<String> {
    let file = <Pages as Embed>::get(name)?;
    String::from_utf8(file.data.into_owned()).ok()
}

fn status_templates() -> tera::Result<Tera> {
    let body = template(STATUS)
        .ok_or_else(|| tera::Error::msg(format!("embedded page {STATUS} missing")))?;
    let mut tera = Tera::default();
    tera.add_raw_template(STATUS, &body)?;
    Ok(tera)
}

fn html(body: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        body,
    )
        .into_response()
}

fn missing(name: &str) -> Response {
    tracing::error!("embedded page {name} missing");
    (StatusCode::INTERNAL_SERVER_ERROR, "Failed to load template").into_response()
}

/// Placeholder for a deployment still in `starting`.
pub fn loading() -> Response {
    match template(LOADING) {
        Some(body) => {
            let mut response = html(body);
            response.headers_mut().insert(
                header::CACHE_CONTROL,
                header::HeaderValue::from_static("no-store"),
            );
            response
        }
        None => missing(LOADING),
    }
}

pub fn status(status: DeploymentStatus) -> Response {
    match StatusPage::for_status(status).render() {
        Ok(body) => html(body),
        Err(e) => {
            tracing::error!("rendering {STATUS}: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to render template").into_response()
        }
    }
}
