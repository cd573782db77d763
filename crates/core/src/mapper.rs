//! Mercos customer → RD Station contact field mapping.
//!
//! Native RD fields are `name`, `personal_phone`, `city`, `state` and `country`.
//! Everything else travels as `custom_fields`, whose keys must already exist in
//! the RD account to be stored.

use crate::domain::contact::ContactPayload;
use crate::domain::customer::CustomerRecord;

pub const CF_TAX_ID: &str = "cf_cnpj";
pub const CF_TRADE_NAME: &str = "cf_nome_fantasia";
pub const CF_POSTAL_CODE: &str = "cf_cep";
pub const CF_STREET: &str = "cf_endereco";
pub const CF_NEIGHBORHOOD: &str = "cf_bairro";
pub const CF_STREET_NUMBER: &str = "cf_numero";
pub const CF_COMPLEMENT: &str = "cf_complemento";

pub const DEFAULT_COUNTRY: &str = "Brasil";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldMapper {
    default_country: Option<String>,
}

impl Default for FieldMapper {
    fn default() -> Self {
        Self { default_country: Some(DEFAULT_COUNTRY.to_string()) }
    }
}

impl FieldMapper {
    /// `default_country` applies to collection-based records only; flat records
    /// never receive a country they did not send.
    pub fn new(default_country: Option<String>) -> Self {
        Self { default_country: default_country.filter(|value| !value.trim().is_empty()) }
    }

    pub fn map_to_contact(&self, record: &CustomerRecord) -> ContactPayload {
        let mut payload = ContactPayload {
            name: owned(
                record.legal_name().or_else(|| record.plain_name()).or_else(|| record.trade_name()),
            ),
            personal_phone: owned(record.principal_phone()),
            city: owned(record.city()),
            state: owned(record.state()),
            country: owned(record.country()),
            ..ContactPayload::default()
        };

        if payload.country.is_none() && record.is_rich() {
            payload.country = self.default_country.clone();
        }

        for (key, value) in [
            (CF_TAX_ID, record.tax_id()),
            (CF_TRADE_NAME, record.trade_name()),
            (CF_POSTAL_CODE, record.postal_code()),
            (CF_STREET, record.street()),
            (CF_NEIGHBORHOOD, record.neighborhood()),
            (CF_STREET_NUMBER, record.street_number()),
            (CF_COMPLEMENT, record.complement()),
        ] {
            if let Some(value) = value {
                payload.custom_fields.insert(key.to_string(), value.to_string());
            }
        }

        payload
    }
}

/// Maps with the stock country default.
pub fn map_to_contact(record: &CustomerRecord) -> ContactPayload {
    FieldMapper::default().map_to_contact(record)
}

fn owned(value: Option<&str>) -> Option<String> {
    value.map(str::to_string)
}
