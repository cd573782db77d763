use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::customer::CustomerRecord;
use crate::errors::ValidationError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    #[serde(rename = "type", alias = "evento")]
    pub event_type: String,
    #[serde(default, alias = "dados")]
    pub data: CustomerRecord,
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        EventKind::parse(&self.event_type)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Registered,
    Updated,
    BlockStatusChanged,
    Deleted,
    Unrecognized,
}

impl EventKind {
    /// Accepts both the Mercos event names and their English equivalents.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cliente.cadastrado" | "registered" => Self::Registered,
            "cliente.atualizado" | "updated" => Self::Updated,
            "cliente.bloqueio_alterado" | "block_status_changed" | "block-status-changed" => {
                Self::BlockStatusChanged
            }
            "cliente.excluido" | "deleted" => Self::Deleted,
            _ => Self::Unrecognized,
        }
    }
}

/// Ordered raw items of one webhook delivery.
///
/// Items are kept as raw JSON so idempotency keys are derived from exactly what
/// the source sent, independent of how much of it decodes.
#[derive(Clone, Debug, PartialEq)]
pub struct EventBatch {
    pub items: Vec<Value>,
}

impl EventBatch {
    pub fn from_slice(body: &[u8]) -> Result<Self, ValidationError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|error| ValidationError::InvalidJson(error.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Array(items) if items.is_empty() => Err(ValidationError::EmptyBatch),
            Value::Array(items) => Ok(Self { items }),
            _ => Err(ValidationError::NotAnArray),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
