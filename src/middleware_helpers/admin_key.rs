use crate::{errors::ServiceError, AppState};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

/// Header carrying the administrator key
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Rejects requests to administrative routes that do not present the configured key.
/// When no key is configured the routes are open (local development).
pub async fn require_admin_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.admin_api_key.as_deref() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if constant_time_eq(expected, presented) {
        next.run(request).await
    } else {
        warn!(path = %request.uri().path(), "Rejected admin request with missing or wrong key");
        ServiceError::Unauthorized("admin key required".to_string()).into_response()
    }
}

pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
