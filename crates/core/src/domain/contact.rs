use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Destination-side contact body for the RD Station contacts API.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personal_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_fields: BTreeMap<String, String>,
}

impl ContactPayload {
    /// Copy of the payload addressed by `email`, as the create endpoint expects.
    pub fn with_email(&self, email: &str) -> Self {
        Self { email: Some(email.to_string()), ..self.clone() }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}
