use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use preview_core::error::PreviewError;

// ---------------------------------------------------------------------------
// AppError
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 400 Bad Request error with the given message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(PreviewError::Validation(msg.into()).into())
    }

    /// Construct a 404 Not Found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self(PreviewError::NotFound(id.into()).into())
    }
}

/// HTTP status for a domain error.
pub fn status_for(e: &PreviewError) -> StatusCode {
    match e {
        PreviewError::Validation(_) => StatusCode::BAD_REQUEST,
        PreviewError::NotFound(_) | PreviewError::NotSupervised(_) => StatusCode::NOT_FOUND,
        PreviewError::Fetch(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PreviewError::InvalidTransition { .. } => StatusCode::CONFLICT,
        PreviewError::PortExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        PreviewError::Configuration(_)
        | PreviewError::Process(_)
        | PreviewError::Supervision { .. }
        | PreviewError::Store(_)
        | PreviewError::Io(_)
        | PreviewError::Yaml(_)
        | PreviewError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self
            .0
            .downcast_ref::<PreviewError>()
            .map(status_for)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!("{:#}", self.0);
        }

        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
