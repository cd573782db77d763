//! Source-side customer record as delivered by Mercos webhooks.
//!
//! Two payload shapes reach the endpoint: the current one with `razao_social`,
//! `cnpj` and collections of e-mail/phone objects, and an older flat one with
//! `nome`, `email` and `telefone`. Both decode into [`CustomerRecord`]; fields of
//! the collection-based shape take precedence when both are present.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Keys a phone entry may use for its number, checked in this order.
pub const PHONE_FIELD_ALIASES: [&str; 4] = ["numero", "telefone", "phone", "number"];

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailEntry {
    #[serde(default, deserialize_with = "lenient_string")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tipo: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneEntry {
    #[serde(default, deserialize_with = "lenient_string")]
    pub numero: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub telefone: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub number: Option<String>,
}

impl PhoneEntry {
    /// First non-blank value across [`PHONE_FIELD_ALIASES`].
    pub fn value(&self) -> Option<&str> {
        [&self.numero, &self.telefone, &self.phone, &self.number]
            .into_iter()
            .find_map(|candidate| non_blank(candidate.as_deref()))
    }
}

/// Every source name gets its own field so a record carrying both a rich and a
/// flat (or English) spelling still decodes; the accessors resolve precedence
/// as rich, then flat, then English.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub razao_social: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub legal_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub nome_fantasia: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub fantasia: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub trade_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub nome: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub cnpj: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub documento: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub cpf: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tax_id: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub cidade: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub city: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub estado: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub uf: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub pais: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub country: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub cep: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub postal_code: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub rua: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub endereco: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub street: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub bairro: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub neighborhood: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub numero: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub street_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub complemento: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub complement: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emails: Option<Vec<EmailEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telefones: Option<Vec<PhoneEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phones: Option<Vec<PhoneEntry>>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub telefone: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub phone: Option<String>,
}

impl CustomerRecord {
    /// Whether the record uses the collection-based Mercos shape.
    pub fn is_rich(&self) -> bool {
        self.razao_social.is_some()
            || self.legal_name.is_some()
            || self.emails.is_some()
            || self.telefones.is_some()
            || self.phones.is_some()
            || self.has_address()
    }

    pub fn has_address(&self) -> bool {
        [
            &self.cep,
            &self.postal_code,
            &self.rua,
            &self.endereco,
            &self.street,
            &self.bairro,
            &self.neighborhood,
            &self.numero,
            &self.street_number,
            &self.complemento,
            &self.complement,
        ]
        .into_iter()
        .any(Option::is_some)
    }

    pub fn legal_name(&self) -> Option<&str> {
        first_non_blank([&self.razao_social, &self.legal_name])
    }

    pub fn trade_name(&self) -> Option<&str> {
        first_non_blank([&self.nome_fantasia, &self.fantasia, &self.trade_name])
    }

    pub fn plain_name(&self) -> Option<&str> {
        first_non_blank([&self.nome, &self.name])
    }

    pub fn tax_id(&self) -> Option<&str> {
        first_non_blank([&self.cnpj, &self.documento, &self.cpf, &self.tax_id])
    }

    pub fn city(&self) -> Option<&str> {
        first_non_blank([&self.cidade, &self.city])
    }

    pub fn state(&self) -> Option<&str> {
        first_non_blank([&self.estado, &self.uf, &self.state])
    }

    pub fn country(&self) -> Option<&str> {
        first_non_blank([&self.pais, &self.country])
    }

    pub fn postal_code(&self) -> Option<&str> {
        first_non_blank([&self.cep, &self.postal_code])
    }

    pub fn street(&self) -> Option<&str> {
        first_non_blank([&self.rua, &self.endereco, &self.street])
    }

    pub fn neighborhood(&self) -> Option<&str> {
        first_non_blank([&self.bairro, &self.neighborhood])
    }

    pub fn street_number(&self) -> Option<&str> {
        first_non_blank([&self.numero, &self.street_number])
    }

    pub fn complement(&self) -> Option<&str> {
        first_non_blank([&self.complemento, &self.complement])
    }

    /// First non-blank e-mail in collection order, falling back to the flat field.
    pub fn principal_email(&self) -> Option<&str> {
        self.emails
            .iter()
            .flatten()
            .find_map(|entry| non_blank(entry.email.as_deref()))
            .or_else(|| non_blank(self.email.as_deref()))
    }

    /// First non-blank phone across entries in order, falling back to the flat field.
    pub fn principal_phone(&self) -> Option<&str> {
        self.telefones
            .iter()
            .chain(self.phones.iter())
            .flatten()
            .find_map(PhoneEntry::value)
            .or_else(|| first_non_blank([&self.telefone, &self.phone]))
    }
}

fn first_non_blank<const N: usize>(candidates: [&Option<String>; N]) -> Option<&str> {
    candidates.into_iter().find_map(|candidate| non_blank(candidate.as_deref()))
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Mercos sends some identifiers (phone numbers, street numbers, CNPJ) as JSON
/// numbers; keep them as text. Any other non-string value is dropped.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(value)) => Some(value),
        Some(Value::Number(value)) => Some(value.to_string()),
        _ => None,
    })
}
