//! Event routing: per-item dedup, mapping and delivery to the contact platform.
//!
//! Items of a batch are handled strictly in order, one at a time. Each item
//! ends in exactly one [`ItemStatus`]; a failure on one item never stops the
//! rest of the batch.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::domain::contact::ContactPayload;
use crate::domain::event::{EventBatch, EventKind, InboundEvent};
use crate::errors::{DispatchError, IntegrationError};
use crate::idempotency::{idempotency_key, IdempotencyStore};
use crate::mapper::FieldMapper;

pub const EMAIL_IDENTIFIER: &str = "email";
pub const DEFAULT_EXCLUDED_TAG: &str = "cliente_excluido";

/// Contact operations the router needs from the marketing platform.
#[async_trait]
pub trait ContactApi: Send + Sync {
    async fn upsert_contact_by_email(
        &self,
        email: &str,
        payload: &ContactPayload,
    ) -> Result<Value, IntegrationError>;

    async fn add_tags(
        &self,
        identifier: &str,
        value: &str,
        tags: &[String],
    ) -> Result<Value, IntegrationError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Ok,
    TaggedExcluded,
    Duplicate,
    Ignored,
    Error,
}

impl ItemStatus {
    /// Whether the source should redeliver the item.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Error)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ItemResult {
    pub event: String,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ItemResult {
    fn new(event: impl Into<String>, status: ItemStatus, idempotency_key: &str) -> Self {
        Self {
            event: event.into(),
            status,
            idempotency_key: Some(idempotency_key.to_string()),
            contact: None,
            error: None,
            reason: None,
        }
    }

    fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagFailurePolicy {
    /// Log the failure and report the item as delivered.
    Swallow,
    /// Fail the item and release its claim.
    Propagate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventAction {
    UpsertAndTag { tag_failure: TagFailurePolicy },
    TagExcluded { tag_failure: TagFailurePolicy },
    Ignore,
}

impl EventAction {
    pub fn for_kind(kind: EventKind) -> Self {
        match kind {
            EventKind::Registered | EventKind::Updated | EventKind::BlockStatusChanged => {
                Self::UpsertAndTag { tag_failure: TagFailurePolicy::Swallow }
            }
            EventKind::Deleted => Self::TagExcluded { tag_failure: TagFailurePolicy::Propagate },
            EventKind::Unrecognized => Self::Ignore,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterSettings {
    pub default_tags: Vec<String>,
    pub excluded_tag: String,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self { default_tags: Vec::new(), excluded_tag: DEFAULT_EXCLUDED_TAG.to_string() }
    }
}

struct Delivered {
    status: ItemStatus,
    contact: Option<Value>,
}

#[derive(Clone)]
pub struct EventRouter {
    api: Arc<dyn ContactApi>,
    store: Arc<dyn IdempotencyStore>,
    mapper: FieldMapper,
    settings: RouterSettings,
}

impl EventRouter {
    pub fn new(
        api: Arc<dyn ContactApi>,
        store: Arc<dyn IdempotencyStore>,
        mapper: FieldMapper,
        settings: RouterSettings,
    ) -> Self {
        Self { api, store, mapper, settings }
    }

    pub async fn process_batch(&self, batch: &EventBatch, correlation_id: &str) -> Vec<ItemResult> {
        let expired = self.store.evict_expired(Utc::now()).await;
        let over_capacity = self.store.enforce_capacity().await;
        if expired > 0 || over_capacity > 0 {
            info!(
                event_name = "webhook.idempotency.evicted",
                correlation_id = %correlation_id,
                expired,
                over_capacity,
                "idempotency claims evicted"
            );
        }

        let mut results = Vec::with_capacity(batch.len());
        for item in &batch.items {
            let result = self.process_item(item).await;
            info!(
                event_name = "webhook.item.processed",
                correlation_id = %correlation_id,
                event_type = %result.event,
                status = ?result.status,
                idempotency_key = result.idempotency_key.as_deref().unwrap_or("none"),
                reason = result.reason.as_deref().unwrap_or("none"),
                "webhook item processed"
            );
            results.push(result);
        }
        results
    }

    pub async fn process_item(&self, raw: &Value) -> ItemResult {
        let key = idempotency_key(raw);

        let event = match serde_json::from_value::<InboundEvent>(raw.clone()) {
            Ok(event) => event,
            Err(error) => {
                let mut result = ItemResult::new(raw_event_name(raw), ItemStatus::Ignored, &key)
                    .with_reason("invalid_payload");
                result.error = Some(error.to_string());
                return result;
            }
        };

        if !self.store.claim(&key, Utc::now()).await {
            return ItemResult::new(&event.event_type, ItemStatus::Duplicate, &key);
        }

        let action = EventAction::for_kind(event.kind());
        if action == EventAction::Ignore {
            return ItemResult::new(&event.event_type, ItemStatus::Ignored, &key)
                .with_reason("unrecognized_event");
        }

        let Some(email) = event.data.principal_email() else {
            self.store.release(&key).await;
            return ItemResult::new(&event.event_type, ItemStatus::Ignored, &key)
                .with_reason("missing_email");
        };

        let payload = self.mapper.map_to_contact(&event.data);
        match self.dispatch(action, &event.event_type, email, &payload).await {
            Ok(delivered) => {
                let mut result = ItemResult::new(&event.event_type, delivered.status, &key);
                result.contact = delivered.contact;
                result
            }
            Err(error) => {
                self.store.release(&key).await;
                warn!(
                    event_name = "webhook.item.failed",
                    event_type = %event.event_type,
                    idempotency_key = %key,
                    error = %error,
                    "webhook item failed; idempotency claim released"
                );
                let mut result = ItemResult::new(&event.event_type, ItemStatus::Error, &key);
                result.error = Some(error.to_string());
                result
            }
        }
    }

    async fn dispatch(
        &self,
        action: EventAction,
        event_type: &str,
        email: &str,
        payload: &ContactPayload,
    ) -> Result<Delivered, DispatchError> {
        match action {
            EventAction::UpsertAndTag { tag_failure } => {
                let contact = self
                    .api
                    .upsert_contact_by_email(email, payload)
                    .await
                    .map_err(DispatchError::Upstream)?;

                let tags = self.tags_for(event_type);
                if !tags.is_empty() {
                    let tagged = self.api.add_tags(EMAIL_IDENTIFIER, email, &tags).await;
                    apply_tag_policy(tag_failure, event_type, tagged)?;
                }
                Ok(Delivered { status: ItemStatus::Ok, contact: Some(contact) })
            }
            EventAction::TagExcluded { tag_failure } => {
                let tags = vec![self.settings.excluded_tag.clone()];
                let tagged = self.api.add_tags(EMAIL_IDENTIFIER, email, &tags).await;
                apply_tag_policy(tag_failure, event_type, tagged)?;
                Ok(Delivered { status: ItemStatus::TaggedExcluded, contact: None })
            }
            EventAction::Ignore => Ok(Delivered { status: ItemStatus::Ignored, contact: None }),
        }
    }

    /// Default tags followed by the event type, without repeats.
    fn tags_for(&self, event_type: &str) -> Vec<String> {
        let mut tags: Vec<String> = Vec::with_capacity(self.settings.default_tags.len() + 1);
        for tag in self.settings.default_tags.iter().map(String::as_str).chain([event_type]) {
            let tag = tag.trim();
            if !tag.is_empty() && !tags.iter().any(|existing| existing == tag) {
                tags.push(tag.to_string());
            }
        }
        tags
    }
}

fn apply_tag_policy(
    policy: TagFailurePolicy,
    event_type: &str,
    tagged: Result<Value, IntegrationError>,
) -> Result<(), DispatchError> {
    match (tagged, policy) {
        (Ok(_), _) => Ok(()),
        (Err(error), TagFailurePolicy::Swallow) => {
            warn!(
                event_name = "webhook.item.tag_failed",
                event_type = %event_type,
                error = %error,
                "contact tagging failed; item still reported as delivered"
            );
            Ok(())
        }
        (Err(error), TagFailurePolicy::Propagate) => Err(DispatchError::Tag(error)),
    }
}

fn raw_event_name(raw: &Value) -> String {
    ["type", "evento"]
        .into_iter()
        .find_map(|field| raw.get(field).and_then(Value::as_str))
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use serde_json::{json, Value};

    use super::{
        ContactApi, EventAction, EventRouter, ItemStatus, RouterSettings, TagFailurePolicy,
    };
    use crate::domain::contact::ContactPayload;
    use crate::domain::event::{EventBatch, EventKind};
    use crate::errors::IntegrationError;
    use crate::idempotency::{idempotency_key, IdempotencyStore, InMemoryIdempotencyStore};
    use crate::mapper::FieldMapper;

    #[derive(Clone, Debug, PartialEq)]
    enum Call {
        Upsert { email: String, payload: Value },
        Tag { identifier: String, value: String, tags: Vec<String> },
    }

    #[derive(Default)]
    struct RecordingApi {
        calls: Mutex<Vec<Call>>,
        upsert_failures: Mutex<Vec<IntegrationError>>,
        tag_failures: Mutex<Vec<IntegrationError>>,
    }

    impl RecordingApi {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().expect("calls lock").clone()
        }

        fn fail_next_upsert(&self, error: IntegrationError) {
            self.upsert_failures.lock().expect("failures lock").push(error);
        }

        fn fail_next_tag(&self, error: IntegrationError) {
            self.tag_failures.lock().expect("failures lock").push(error);
        }
    }

    #[async_trait]
    impl ContactApi for RecordingApi {
        async fn upsert_contact_by_email(
            &self,
            email: &str,
            payload: &ContactPayload,
        ) -> Result<Value, IntegrationError> {
            self.calls.lock().expect("calls lock").push(Call::Upsert {
                email: email.to_string(),
                payload: serde_json::to_value(payload).expect("payload"),
            });
            match self.upsert_failures.lock().expect("failures lock").pop() {
                Some(error) => Err(error),
                None => Ok(json!({"uuid": "u1"})),
            }
        }

        async fn add_tags(
            &self,
            identifier: &str,
            value: &str,
            tags: &[String],
        ) -> Result<Value, IntegrationError> {
            self.calls.lock().expect("calls lock").push(Call::Tag {
                identifier: identifier.to_string(),
                value: value.to_string(),
                tags: tags.to_vec(),
            });
            match self.tag_failures.lock().expect("failures lock").pop() {
                Some(error) => Err(error),
                None => Ok(json!({"tags": tags})),
            }
        }
    }

    fn router(api: Arc<RecordingApi>, store: Arc<InMemoryIdempotencyStore>) -> EventRouter {
        EventRouter::new(
            api,
            store,
            FieldMapper::default(),
            RouterSettings {
                default_tags: vec!["mercos".to_string(), "cliente_cadastrado".to_string()],
                ..RouterSettings::default()
            },
        )
    }

    fn batch(value: Value) -> EventBatch {
        EventBatch::from_value(value).expect("batch")
    }

    fn server_error() -> IntegrationError {
        IntegrationError::Upstream { status: 500, body: "boom".to_string() }
    }

    #[test]
    fn dispatch_table_declares_tag_failure_policy_per_event_type() {
        assert_eq!(
            EventAction::for_kind(EventKind::Updated),
            EventAction::UpsertAndTag { tag_failure: TagFailurePolicy::Swallow }
        );
        assert_eq!(
            EventAction::for_kind(EventKind::Deleted),
            EventAction::TagExcluded { tag_failure: TagFailurePolicy::Propagate }
        );
        assert_eq!(EventAction::for_kind(EventKind::Unrecognized), EventAction::Ignore);
    }

    #[tokio::test]
    async fn registered_event_upserts_then_tags_with_defaults_and_event_type() {
        let api = Arc::new(RecordingApi::default());
        let store = Arc::new(InMemoryIdempotencyStore::new(3600, 100));
        let router = router(api.clone(), store);

        let results = router
            .process_batch(
                &batch(json!([{"type": "registered", "data": {"email": "a@b.com", "city": "X"}}])),
                "corr-1",
            )
            .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ItemStatus::Ok);
        assert_eq!(results[0].contact, Some(json!({"uuid": "u1"})));
        assert_eq!(
            api.calls(),
            vec![
                Call::Upsert { email: "a@b.com".to_string(), payload: json!({"city": "X"}) },
                Call::Tag {
                    identifier: "email".to_string(),
                    value: "a@b.com".to_string(),
                    tags: vec![
                        "mercos".to_string(),
                        "cliente_cadastrado".to_string(),
                        "registered".to_string()
                    ],
                },
            ]
        );
    }

    #[tokio::test]
    async fn redelivered_item_is_reported_duplicate_without_upstream_calls() {
        let api = Arc::new(RecordingApi::default());
        let store = Arc::new(InMemoryIdempotencyStore::new(3600, 100));
        let router = router(api.clone(), store);
        let delivery = batch(json!([{
            "evento": "cliente.cadastrado",
            "dados": {"razao_social": "Cliente Teste", "emails": [{"email": "teste@mercos.com"}]}
        }]));

        let first = router.process_batch(&delivery, "corr-1").await;
        let calls_after_first = api.calls().len();
        let second = router.process_batch(&delivery, "corr-2").await;

        assert_eq!(first[0].status, ItemStatus::Ok);
        assert_eq!(second[0].status, ItemStatus::Duplicate);
        assert_eq!(first[0].idempotency_key, second[0].idempotency_key);
        assert_eq!(calls_after_first, 2);
        assert_eq!(api.calls().len(), 2);
    }

    #[tokio::test]
    async fn record_with_rich_and_flat_spellings_is_delivered() {
        let api = Arc::new(RecordingApi::default());
        let store = Arc::new(InMemoryIdempotencyStore::new(3600, 100));
        let router = router(api.clone(), store);

        let results = router
            .process_batch(
                &batch(json!([{
                    "evento": "cliente.cadastrado",
                    "dados": {
                        "razao_social": "A",
                        "cnpj": "1",
                        "documento": "2",
                        "cpf": null,
                        "estado": "SC",
                        "uf": "SC",
                        "emails": [{"email": "a@b.com"}]
                    }
                }])),
                "corr-1",
            )
            .await;

        assert_eq!(results[0].status, ItemStatus::Ok);
        assert_eq!(results[0].reason, None);
        assert_eq!(
            api.calls()[0],
            Call::Upsert {
                email: "a@b.com".to_string(),
                payload: json!({
                    "name": "A",
                    "state": "SC",
                    "country": "Brasil",
                    "custom_fields": {"cf_cnpj": "1"}
                }),
            }
        );
    }

    #[tokio::test]
    async fn failed_delete_tag_releases_claim_and_allows_reprocessing() {
        let api = Arc::new(RecordingApi::default());
        let store = Arc::new(InMemoryIdempotencyStore::new(3600, 100));
        let router = router(api.clone(), store.clone());
        let delivery = batch(json!([{"type": "cliente.excluido", "data": {"email": "a@b.com"}}]));

        api.fail_next_tag(server_error());
        let first = router.process_batch(&delivery, "corr-1").await;

        assert_eq!(first[0].status, ItemStatus::Error);
        assert!(first[0].status.is_retryable());
        assert!(first[0].error.as_deref().unwrap_or_default().contains("tagging failed"));
        assert!(store.is_empty().await);

        let second = router.process_batch(&delivery, "corr-2").await;
        assert_eq!(second[0].status, ItemStatus::TaggedExcluded);
        assert_eq!(
            api.calls().last(),
            Some(&Call::Tag {
                identifier: "email".to_string(),
                value: "a@b.com".to_string(),
                tags: vec!["cliente_excluido".to_string()],
            })
        );
        assert!(!api.calls().iter().any(|call| matches!(call, Call::Upsert { .. })));
    }

    #[tokio::test]
    async fn tag_failure_after_upsert_is_swallowed() {
        let api = Arc::new(RecordingApi::default());
        let store = Arc::new(InMemoryIdempotencyStore::new(3600, 100));
        let router = router(api.clone(), store.clone());

        api.fail_next_tag(server_error());
        let results = router
            .process_batch(&batch(json!([{"type": "updated", "data": {"email": "a@b.com"}}])), "c")
            .await;

        assert_eq!(results[0].status, ItemStatus::Ok);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn upsert_failure_reports_error_and_releases_claim() {
        let api = Arc::new(RecordingApi::default());
        let store = Arc::new(InMemoryIdempotencyStore::new(3600, 100));
        let router = router(api.clone(), store.clone());

        api.fail_next_upsert(IntegrationError::Upstream { status: 400, body: "bad".to_string() });
        let results = router
            .process_batch(
                &batch(json!([{"type": "block_status_changed", "data": {"email": "a@b.com"}}])),
                "c",
            )
            .await;

        assert_eq!(results[0].status, ItemStatus::Error);
        assert!(store.is_empty().await);
        assert_eq!(api.calls().len(), 1);
    }

    #[tokio::test]
    async fn unrecognized_event_is_ignored_without_upstream_calls() {
        let api = Arc::new(RecordingApi::default());
        let store = Arc::new(InMemoryIdempotencyStore::new(3600, 100));
        let router = router(api.clone(), store);

        let results = router
            .process_batch(&batch(json!([{"type": "pedido.gerado", "data": {"email": "a@b.com"}}])), "c")
            .await;

        assert_eq!(results[0].status, ItemStatus::Ignored);
        assert_eq!(results[0].reason.as_deref(), Some("unrecognized_event"));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_email_is_ignored_and_claim_released() {
        let api = Arc::new(RecordingApi::default());
        let store = Arc::new(InMemoryIdempotencyStore::new(3600, 100));
        let router = router(api.clone(), store.clone());

        let results = router
            .process_batch(
                &batch(json!([{"type": "registered", "data": {"emails": [{"email": ""}]}}])),
                "c",
            )
            .await;

        assert_eq!(results[0].status, ItemStatus::Ignored);
        assert_eq!(results[0].reason.as_deref(), Some("missing_email"));
        assert!(store.is_empty().await);
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn one_bad_item_does_not_stop_the_batch() {
        let api = Arc::new(RecordingApi::default());
        let store = Arc::new(InMemoryIdempotencyStore::new(3600, 100));
        let router = router(api.clone(), store);

        api.fail_next_upsert(server_error());
        let results = router
            .process_batch(
                &batch(json!([
                    42,
                    {"type": "registered", "data": {"email": "first@b.com"}},
                    {"type": "registered", "data": {"email": "second@b.com"}}
                ])),
                "c",
            )
            .await;

        let statuses: Vec<ItemStatus> = results.iter().map(|result| result.status).collect();
        assert_eq!(statuses, vec![ItemStatus::Ignored, ItemStatus::Error, ItemStatus::Ok]);
        assert_eq!(results[0].reason.as_deref(), Some("invalid_payload"));
        assert_eq!(results[0].event, "unknown");
    }

    #[tokio::test]
    async fn expired_claims_are_evicted_before_the_batch_runs() {
        let api = Arc::new(RecordingApi::default());
        let store = Arc::new(InMemoryIdempotencyStore::new(3600, 100));
        let router = router(api.clone(), store.clone());
        let item = json!({"type": "registered", "data": {"email": "a@b.com"}});

        store.claim(&idempotency_key(&item), Utc::now() - Duration::hours(2)).await;
        let results = router.process_batch(&batch(json!([item])), "c").await;

        assert_eq!(results[0].status, ItemStatus::Ok);
    }

    #[test]
    fn item_results_serialize_without_absent_fields() {
        let result = super::ItemResult::new("registered", ItemStatus::TaggedExcluded, "abc");

        assert_eq!(
            serde_json::to_value(&result).expect("serialize"),
            json!({"event": "registered", "status": "tagged_excluded", "idempotency_key": "abc"})
        );
    }
}
