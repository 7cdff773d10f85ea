use axum::{http::StatusCode, response::IntoResponse, Extension, Json};
use serde_json::json;

use crate::observability::RequestId;

/// Liveness probe
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// Greeting that reports the request's correlation id back to the caller
pub async fn index(request_id: Option<Extension<RequestId>>) -> impl IntoResponse {
    let request_id = request_id.map(|Extension(id)| id.0);
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "requestId": request_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_check() {
        let response = health_check().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_index_echoes_request_id() {
        let response = index(Some(Extension(RequestId("abc123".to_string()))))
            .await
            .into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["requestId"], "abc123");
    }
}
