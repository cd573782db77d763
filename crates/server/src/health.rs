use axum::{routing::get, Json, Router};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
}

pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health))
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Json;
    use tower::ServiceExt;

    use crate::health::{health, router};

    #[tokio::test]
    async fn health_reports_ok() {
        let Json(payload) = health().await;
        assert!(payload.ok);
    }

    #[tokio::test]
    async fn health_route_serves_json() {
        let response = router::<()>()
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        assert_eq!(&body[..], br#"{"ok":true}"#);
    }
}
