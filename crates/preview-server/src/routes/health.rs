use axum::extract::State;
use axum::Json;

use crate::state::AppState;

/// GET /healthz: liveness plus the number of supervised processes.
pub async fn healthz(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "supervised": app.supervisor.live_count(),
        "in_flight": app.lifecycle.in_flight(),
    }))
}
