//! Webhook intake handler.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use taskgate_core::webhook::{Headers, WebhookOutcome, WebhookRequest};

use crate::http::error::AppError;
use crate::state::AppState;

/// POST /webhooks/{namespace}/{name}
///
/// - `201` with the created Task(s)
/// - `200 {"status":"filtered"}` when the filter (or every rule) rejected it
/// - `200 {"status":"skipped"}` when the concurrency policy blocked creation
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let request = WebhookRequest {
        path,
        headers: collect_headers(&headers),
        body: body.to_vec(),
    };
    let outcome = state.pipeline.handle(request).await?;

    let response = match outcome {
        WebhookOutcome::Created { tasks } => {
            let names: Vec<&str> = tasks.iter().map(|k| k.name.as_str()).collect();
            let body = json!({
                "status": "created",
                "task": names.first(),
                "namespace": tasks.first().map(|k| k.namespace.as_str()),
                "tasks": names,
            });
            (StatusCode::CREATED, Json(body)).into_response()
        }
        WebhookOutcome::Filtered => {
            (StatusCode::OK, Json(json!({ "status": "filtered" }))).into_response()
        }
        WebhookOutcome::Skipped => (
            StatusCode::OK,
            Json(json!({ "status": "skipped", "reason": "concurrency_policy" })),
        )
            .into_response(),
    };
    Ok(response)
}

/// First value of every header that is valid UTF-8. Names are already
/// lower-case in `HeaderMap`.
fn collect_headers(headers: &HeaderMap) -> Headers {
    headers
        .keys()
        .filter_map(|name| {
            let value = headers.get(name)?.to_str().ok()?;
            Some((name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_collect_headers_keeps_first_value() {
        let mut headers = HeaderMap::new();
        headers.append("X-GitHub-Event", HeaderValue::from_static("pull_request"));
        headers.append("x-github-event", HeaderValue::from_static("push"));
        headers.insert("x-binary", HeaderValue::from_bytes(&[0xff, 0xfe]).unwrap());

        let collected = collect_headers(&headers);
        assert_eq!(collected.get("x-github-event").map(String::as_str), Some("pull_request"));
        assert!(!collected.contains_key("x-binary"));
    }
}
