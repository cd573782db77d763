//! Inbound Mercos webhook endpoint.
//!
//! Whole-request checks run in a fixed order (shared-secret token, JSON syntax,
//! batch shape, source name) before any item is touched; after that every item
//! gets its own result and the response is always 200.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header::HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use rdbridge_core::config::WebhookConfig;
use rdbridge_core::dispatch::{EventRouter, ItemResult};
use rdbridge_core::domain::event::EventBatch;
use rdbridge_core::errors::InterfaceError;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct WebhookState {
    router: EventRouter,
    webhook: Arc<WebhookConfig>,
}

impl WebhookState {
    pub fn new(router: EventRouter, webhook: WebhookConfig) -> Self {
        Self { router, webhook: Arc::new(webhook) }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub status: &'static str,
    pub results: Vec<ItemResult>,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    correlation_id: &'a str,
}

pub struct ApiError(InterfaceError);

impl From<InterfaceError> for ApiError {
    fn from(value: InterfaceError) -> Self {
        Self(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody { error: self.0.message(), correlation_id: self.0.correlation_id() };
        let mut response = (status, Json(body)).into_response();
        attach_correlation_id(&mut response, self.0.correlation_id());
        response
    }
}

pub fn router(state: WebhookState) -> Router {
    Router::new().route("/webhooks/{source}/clientes", post(receive_customers)).with_state(state)
}

pub async fn receive_customers(
    State(state): State<WebhookState>,
    Path(source): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();

    if !state.webhook.accepts_token(query_token(&params)) {
        warn!(
            event_name = "webhook.request.unauthorized",
            correlation_id = %correlation_id,
            source = %source,
            "webhook token missing or invalid"
        );
        return Err(InterfaceError::Unauthorized {
            message: "missing or invalid webhook token".to_string(),
            correlation_id,
        }
        .into());
    }

    let batch = EventBatch::from_slice(&body).map_err(|error| {
        warn!(
            event_name = "webhook.request.rejected",
            correlation_id = %correlation_id,
            error = %error,
            "webhook body rejected"
        );
        ApiError(error.into_interface(correlation_id.clone()))
    })?;

    if source != state.webhook.source {
        return Err(InterfaceError::NotFound {
            message: format!("unknown webhook source `{source}`"),
            correlation_id,
        }
        .into());
    }

    info!(
        event_name = "webhook.batch.received",
        correlation_id = %correlation_id,
        source = %source,
        items = batch.len(),
        "webhook batch received"
    );

    let results = state.router.process_batch(&batch, &correlation_id).await;

    let mut response =
        Json(BatchResponse { status: "processed", results }).into_response();
    attach_correlation_id(&mut response, &correlation_id);
    Ok(response)
}

/// Pair-list decoding never rejects a query string, so a repeated or odd
/// parameter still reaches the token check; the first `token` wins.
fn query_token(params: &[(String, String)]) -> Option<&str> {
    params.iter().find(|(name, _)| name == "token").map(|(_, value)| value.as_str())
}

fn attach_correlation_id(response: &mut Response, correlation_id: &str) {
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        response.headers_mut().insert(HeaderName::from_static(CORRELATION_HEADER), value);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use rdbridge_core::config::WebhookConfig;
    use rdbridge_core::dispatch::{ContactApi, EventRouter, RouterSettings};
    use rdbridge_core::domain::contact::ContactPayload;
    use rdbridge_core::errors::IntegrationError;
    use rdbridge_core::idempotency::InMemoryIdempotencyStore;
    use rdbridge_core::mapper::FieldMapper;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{router, WebhookState, CORRELATION_HEADER};

    #[derive(Default)]
    struct CountingApi {
        upserts: Mutex<Vec<String>>,
        tags: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl ContactApi for CountingApi {
        async fn upsert_contact_by_email(
            &self,
            email: &str,
            _payload: &ContactPayload,
        ) -> Result<Value, IntegrationError> {
            self.upserts.lock().expect("upserts lock").push(email.to_string());
            Ok(json!({"email": email}))
        }

        async fn add_tags(
            &self,
            _identifier: &str,
            _value: &str,
            tags: &[String],
        ) -> Result<Value, IntegrationError> {
            self.tags.lock().expect("tags lock").push(tags.to_vec());
            Ok(json!({}))
        }
    }

    fn webhook_config(secret: Option<&str>) -> WebhookConfig {
        WebhookConfig {
            source: "mercos".to_string(),
            secret: secret.map(|value| value.to_string().into()),
            default_tags: vec!["mercos".to_string()],
            excluded_tag: "cliente_excluido".to_string(),
        }
    }

    fn app(api: Arc<CountingApi>, secret: Option<&str>) -> Router {
        let event_router = EventRouter::new(
            api,
            Arc::new(InMemoryIdempotencyStore::new(3600, 100)),
            FieldMapper::default(),
            RouterSettings {
                default_tags: vec!["mercos".to_string()],
                ..RouterSettings::default()
            },
        );
        router(WebhookState::new(event_router, webhook_config(secret)))
    }

    async fn post(app: Router, uri: &str, body: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::post(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");
        let status = response.status();
        assert!(response.headers().contains_key(CORRELATION_HEADER));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    const ONE_EVENT: &str = r#"[{"type": "registered", "data": {"email": "a@b.com", "city": "X"}}]"#;

    #[tokio::test]
    async fn missing_or_wrong_token_is_rejected_when_secret_is_configured() {
        let api = Arc::new(CountingApi::default());

        let (status, body) =
            post(app(api.clone(), Some("s3cret")), "/webhooks/mercos/clientes", ONE_EVENT).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["correlation_id"].is_string());

        let (status, _) = post(
            app(api.clone(), Some("s3cret")),
            "/webhooks/mercos/clientes?token=wrong",
            "not json",
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(api.upserts.lock().expect("upserts lock").is_empty());
    }

    #[tokio::test]
    async fn repeated_token_parameter_is_judged_by_the_token_check() {
        let api = Arc::new(CountingApi::default());

        let (status, _) = post(
            app(api.clone(), Some("s3cret")),
            "/webhooks/mercos/clientes?token=wrong&token=s3cret",
            ONE_EVENT,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, payload) = post(
            app(api.clone(), Some("s3cret")),
            "/webhooks/mercos/clientes?token=s3cret&token=other&extra",
            ONE_EVENT,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["results"][0]["status"], "ok");
        assert_eq!(api.upserts.lock().expect("upserts lock").len(), 1);
    }

    #[tokio::test]
    async fn malformed_json_is_unprocessable() {
        let api = Arc::new(CountingApi::default());
        let (status, body) =
            post(app(api, Some("s3cret")), "/webhooks/mercos/clientes?token=s3cret", "[{").await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap_or_default().contains("not valid JSON"));
    }

    #[tokio::test]
    async fn object_or_empty_body_is_bad_request() {
        let api = Arc::new(CountingApi::default());

        let (status, _) = post(app(api.clone(), None), "/webhooks/mercos/clientes", "{}").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = post(app(api, None), "/webhooks/mercos/clientes", "[]").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_source_is_not_found() {
        let api = Arc::new(CountingApi::default());
        let (status, _) = post(app(api, None), "/webhooks/omie/clientes", ONE_EVENT).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn valid_batch_is_processed_item_by_item() {
        let api = Arc::new(CountingApi::default());
        let app = app(api.clone(), Some("s3cret"));
        let body = r#"[
            {"type": "registered", "data": {"email": "a@b.com", "city": "X"}},
            {"type": "pedido.gerado", "data": {"email": "a@b.com"}},
            {"type": "registered", "data": {"city": "Y"}}
        ]"#;

        let (status, payload) =
            post(app.clone(), "/webhooks/mercos/clientes?token=s3cret", body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["status"], "processed");
        let statuses: Vec<&str> = payload["results"]
            .as_array()
            .expect("results")
            .iter()
            .map(|result| result["status"].as_str().unwrap_or_default())
            .collect();
        assert_eq!(statuses, vec!["ok", "ignored", "ignored"]);
        assert_eq!(payload["results"][0]["event"], "registered");
        assert_eq!(payload["results"][2]["reason"], "missing_email");
        assert_eq!(
            api.tags.lock().expect("tags lock").clone(),
            vec![vec!["mercos".to_string(), "registered".to_string()]]
        );

        let (status, replay) =
            post(app, "/webhooks/mercos/clientes?token=s3cret", ONE_EVENT).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(replay["results"][0]["status"], "duplicate");
        assert_eq!(api.upserts.lock().expect("upserts lock").len(), 1);
    }
}
