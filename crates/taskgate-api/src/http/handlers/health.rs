use axum::http::StatusCode;

/// GET /healthz
pub async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// GET /readyz
pub async fn readyz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}
