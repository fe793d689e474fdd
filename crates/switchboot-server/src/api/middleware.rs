use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

use super::handlers::AppState;

// Health, root banner, and docs stay reachable without the passcode.
const OPEN_PATHS: [&str; 4] = ["/health", "/", "/docs", "/openapi.json"];

/// When a passcode is configured, every other request must carry an exactly
/// matching `X-Passcode` header.
pub async fn require_passcode(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if OPEN_PATHS.contains(&path) {
        return next.run(request).await;
    }

    if let Some(expected) = state
        .config
        .api_passcode
        .as_deref()
        .filter(|p| !p.is_empty())
    {
        let provided = request
            .headers()
            .get("x-passcode")
            .and_then(|value| value.to_str().ok());
        if provided != Some(expected) {
            warn!(path = %path, "Rejected request with invalid or missing passcode");
            return (
                StatusCode::FORBIDDEN,
                Json(json!({"detail": "Invalid or missing passcode"})),
            )
                .into_response();
        }
    }

    next.run(request).await
}
