use std::sync::Arc;

use axum::Router;
use rdbridge_core::config::AppConfig;
use rdbridge_core::dispatch::{EventRouter, RouterSettings};
use rdbridge_core::idempotency::InMemoryIdempotencyStore;
use rdbridge_core::mapper::FieldMapper;
use rdbridge_rdstation::{RdError, RdStationClient};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::health;
use crate::webhook::{self, WebhookState};

pub struct Application {
    pub config: AppConfig,
    pub router: EventRouter,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("RD Station client setup failed: {0}")]
    Client(#[from] RdError),
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let client = RdStationClient::from_config(&config.rdstation)?;
    let store =
        InMemoryIdempotencyStore::new(config.idempotency.ttl_secs, config.idempotency.max_keys);
    let router = EventRouter::new(
        Arc::new(client),
        Arc::new(store),
        FieldMapper::new(config.mapping.default_country.clone()),
        RouterSettings {
            default_tags: config.webhook.default_tags.clone(),
            excluded_tag: config.webhook.excluded_tag.clone(),
        },
    );

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        rdstation_base_url = %config.rdstation.base_url,
        webhook_source = %config.webhook.source,
        webhook_token_required = config.webhook.secret.is_some(),
        "application bootstrap complete"
    );

    Ok(Application { config, router })
}

impl Application {
    pub fn http_router(&self) -> Router {
        let state = WebhookState::new(self.router.clone(), self.config.webhook.clone());
        Router::new()
            .merge(health::router())
            .merge(webhook::router(state))
            .layer(TraceLayer::new_for_http())
    }
}
