use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::DEFAULT_EXCLUDED_TAG;
use crate::mapper::DEFAULT_COUNTRY;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub rdstation: RdStationConfig,
    pub webhook: WebhookConfig,
    pub idempotency: IdempotencyConfig,
    pub mapping: MappingConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct RdStationConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub refresh_token: SecretString,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub jitter_ms: u64,
    pub user_agent: String,
}

#[derive(Clone, Debug)]
pub struct WebhookConfig {
    pub source: String,
    pub secret: Option<SecretString>,
    pub default_tags: Vec<String>,
    pub excluded_tag: String,
}

#[derive(Clone, Debug)]
pub struct IdempotencyConfig {
    pub ttl_secs: u64,
    pub max_keys: usize,
}

#[derive(Clone, Debug)]
pub struct MappingConfig {
    /// Country applied to collection-based records that do not send one; empty disables it.
    pub default_country: Option<String>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub rdstation_base_url: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig { bind_address: "127.0.0.1".to_string(), port: 8080 },
            rdstation: RdStationConfig {
                base_url: "https://api.rd.services".to_string(),
                client_id: String::new(),
                client_secret: String::new().into(),
                refresh_token: String::new().into(),
                timeout_secs: 20,
                max_retries: 3,
                backoff_base_ms: 500,
                jitter_ms: 100,
                user_agent: "mercos-rd-integration/1.0".to_string(),
            },
            webhook: WebhookConfig {
                source: "mercos".to_string(),
                secret: None,
                default_tags: Vec::new(),
                excluded_tag: DEFAULT_EXCLUDED_TAG.to_string(),
            },
            idempotency: IdempotencyConfig { ttl_secs: 3600, max_keys: 10_000 },
            mapping: MappingConfig { default_country: Some(DEFAULT_COUNTRY.to_string()) },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl WebhookConfig {
    /// Constant-time comparison against the configured secret; open when no secret is set.
    pub fn accepts_token(&self, presented: Option<&str>) -> bool {
        use subtle::ConstantTimeEq;

        let Some(secret) = &self.secret else {
            return true;
        };
        let expected = secret.expose_secret().as_bytes();
        let presented = presented.unwrap_or_default().as_bytes();
        expected.ct_eq(presented).into()
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("rdbridge.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
        }

        if let Some(rdstation) = patch.rdstation {
            if let Some(base_url) = rdstation.base_url {
                self.rdstation.base_url = base_url;
            }
            if let Some(client_id) = rdstation.client_id {
                self.rdstation.client_id = client_id;
            }
            if let Some(client_secret) = rdstation.client_secret {
                self.rdstation.client_secret = secret_value(client_secret);
            }
            if let Some(refresh_token) = rdstation.refresh_token {
                self.rdstation.refresh_token = secret_value(refresh_token);
            }
            if let Some(timeout_secs) = rdstation.timeout_secs {
                self.rdstation.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = rdstation.max_retries {
                self.rdstation.max_retries = max_retries;
            }
            if let Some(backoff_base_ms) = rdstation.backoff_base_ms {
                self.rdstation.backoff_base_ms = backoff_base_ms;
            }
            if let Some(jitter_ms) = rdstation.jitter_ms {
                self.rdstation.jitter_ms = jitter_ms;
            }
            if let Some(user_agent) = rdstation.user_agent {
                self.rdstation.user_agent = user_agent;
            }
        }

        if let Some(webhook) = patch.webhook {
            if let Some(source) = webhook.source {
                self.webhook.source = source;
            }
            if let Some(secret) = webhook.secret {
                self.webhook.secret = optional_secret(secret);
            }
            if let Some(default_tags) = webhook.default_tags {
                self.webhook.default_tags = clean_tags(default_tags);
            }
            if let Some(excluded_tag) = webhook.excluded_tag {
                self.webhook.excluded_tag = excluded_tag;
            }
        }

        if let Some(idempotency) = patch.idempotency {
            if let Some(ttl_secs) = idempotency.ttl_secs {
                self.idempotency.ttl_secs = ttl_secs;
            }
            if let Some(max_keys) = idempotency.max_keys {
                self.idempotency.max_keys = max_keys;
            }
        }

        if let Some(mapping) = patch.mapping {
            if let Some(default_country) = mapping.default_country {
                self.mapping.default_country = non_empty(default_country);
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("RDBRIDGE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("RDBRIDGE_SERVER_PORT") {
            self.server.port = parse_u16("RDBRIDGE_SERVER_PORT", &value)?;
        }

        if let Some(value) = read_env("RDBRIDGE_RDSTATION_BASE_URL") {
            self.rdstation.base_url = value;
        }
        if let Some(value) = read_env_any(&["RDBRIDGE_RDSTATION_CLIENT_ID", "RD_CLIENT_ID"]) {
            self.rdstation.client_id = value;
        }
        if let Some(value) =
            read_env_any(&["RDBRIDGE_RDSTATION_CLIENT_SECRET", "RD_CLIENT_SECRET"])
        {
            self.rdstation.client_secret = secret_value(value);
        }
        if let Some(value) =
            read_env_any(&["RDBRIDGE_RDSTATION_REFRESH_TOKEN", "RD_REFRESH_TOKEN"])
        {
            self.rdstation.refresh_token = secret_value(value);
        }
        if let Some(value) = read_env("RDBRIDGE_RDSTATION_TIMEOUT_SECS") {
            self.rdstation.timeout_secs = parse_u64("RDBRIDGE_RDSTATION_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("RDBRIDGE_RDSTATION_MAX_RETRIES") {
            self.rdstation.max_retries = parse_u32("RDBRIDGE_RDSTATION_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("RDBRIDGE_RDSTATION_BACKOFF_BASE_MS") {
            self.rdstation.backoff_base_ms =
                parse_u64("RDBRIDGE_RDSTATION_BACKOFF_BASE_MS", &value)?;
        }
        if let Some(value) = read_env("RDBRIDGE_RDSTATION_JITTER_MS") {
            self.rdstation.jitter_ms = parse_u64("RDBRIDGE_RDSTATION_JITTER_MS", &value)?;
        }
        if let Some(value) = read_env("RDBRIDGE_RDSTATION_USER_AGENT") {
            self.rdstation.user_agent = value;
        }

        if let Some(value) = read_env("RDBRIDGE_WEBHOOK_SOURCE") {
            self.webhook.source = value;
        }
        if let Some(value) = read_env_any(&["RDBRIDGE_WEBHOOK_SECRET", "MERCOS_WEBHOOK_TOKEN"]) {
            self.webhook.secret = optional_secret(value);
        }
        if let Some(value) = read_env_any(&["RDBRIDGE_WEBHOOK_DEFAULT_TAGS", "RD_DEFAULT_TAGS"]) {
            self.webhook.default_tags = split_tags(&value);
        }
        if let Some(value) = read_env("RDBRIDGE_WEBHOOK_EXCLUDED_TAG") {
            self.webhook.excluded_tag = value;
        }

        let ttl_keys = ["RDBRIDGE_IDEMPOTENCY_TTL_SECS", "IDEMPOTENCY_TTL_SECONDS"];
        if let Some(value) = read_env_any(&ttl_keys) {
            self.idempotency.ttl_secs = parse_u64(ttl_keys[0], &value)?;
        }
        let max_keys = ["RDBRIDGE_IDEMPOTENCY_MAX_KEYS", "IDEMPOTENCY_MAX_KEYS"];
        if let Some(value) = read_env_any(&max_keys) {
            self.idempotency.max_keys = parse_usize(max_keys[0], &value)?;
        }

        if let Ok(value) = env::var("RDBRIDGE_MAPPING_DEFAULT_COUNTRY") {
            self.mapping.default_country = non_empty(value);
        }

        let log_level =
            read_env("RDBRIDGE_LOGGING_LEVEL").or_else(|| read_env("RDBRIDGE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("RDBRIDGE_LOGGING_FORMAT").or_else(|| read_env("RDBRIDGE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(base_url) = overrides.rdstation_base_url {
            self.rdstation.base_url = base_url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_rdstation(&self.rdstation)?;
        validate_webhook(&self.webhook)?;
        validate_idempotency(&self.idempotency)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("rdbridge.toml"), PathBuf::from("config/rdbridge.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_rdstation(rdstation: &RdStationConfig) -> Result<(), ConfigError> {
    let base_url = rdstation.base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "rdstation.base_url must start with http:// or https://".to_string(),
        ));
    }

    if rdstation.client_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "rdstation.client_id is required. Set it in rdbridge.toml or via RD_CLIENT_ID"
                .to_string(),
        ));
    }
    if rdstation.client_secret.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "rdstation.client_secret is required. Set it in rdbridge.toml or via RD_CLIENT_SECRET"
                .to_string(),
        ));
    }
    if rdstation.refresh_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "rdstation.refresh_token is required. Obtain one through the RD Station app authorization flow and set RD_REFRESH_TOKEN"
                .to_string(),
        ));
    }

    if rdstation.timeout_secs == 0 || rdstation.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "rdstation.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if rdstation.max_retries > 10 {
        return Err(ConfigError::Validation(
            "rdstation.max_retries must be in range 0..=10".to_string(),
        ));
    }

    Ok(())
}

fn validate_webhook(webhook: &WebhookConfig) -> Result<(), ConfigError> {
    if webhook.source.trim().is_empty() {
        return Err(ConfigError::Validation("webhook.source must not be empty".to_string()));
    }
    if webhook.excluded_tag.trim().is_empty() {
        return Err(ConfigError::Validation("webhook.excluded_tag must not be empty".to_string()));
    }
    Ok(())
}

fn validate_idempotency(idempotency: &IdempotencyConfig) -> Result<(), ConfigError> {
    if idempotency.ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "idempotency.ttl_secs must be greater than zero".to_string(),
        ));
    }
    if idempotency.max_keys == 0 {
        return Err(ConfigError::Validation(
            "idempotency.max_keys must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_env_any(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| read_env(key))
}

fn optional_secret(value: String) -> Option<SecretString> {
    non_empty(value).map(secret_value)
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn split_tags(value: &str) -> Vec<String> {
    clean_tags(value.split(',').map(str::to_string).collect())
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    tags.into_iter().filter_map(non_empty).collect()
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    server: Option<ServerPatch>,
    rdstation: Option<RdStationPatch>,
    webhook: Option<WebhookPatch>,
    idempotency: Option<IdempotencyPatch>,
    mapping: Option<MappingPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct RdStationPatch {
    base_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    refresh_token: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    backoff_base_ms: Option<u64>,
    jitter_ms: Option<u64>,
    user_agent: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookPatch {
    source: Option<String>,
    secret: Option<String>,
    default_tags: Option<Vec<String>>,
    excluded_tag: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct IdempotencyPatch {
    ttl_secs: Option<u64>,
    max_keys: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct MappingPatch {
    default_country: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
