pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod idempotency;
pub mod mapper;

pub use config::{AppConfig, ConfigError, LoadOptions, LogFormat};
pub use dispatch::{ContactApi, EventRouter, ItemResult, ItemStatus, RouterSettings};
pub use domain::contact::ContactPayload;
pub use domain::customer::CustomerRecord;
pub use domain::event::{EventBatch, EventKind, InboundEvent};
pub use errors::{DispatchError, IntegrationError, InterfaceError, ValidationError};
pub use idempotency::{idempotency_key, IdempotencyStore, InMemoryIdempotencyStore};
pub use mapper::FieldMapper;
