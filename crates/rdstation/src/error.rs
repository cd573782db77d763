use rdbridge_core::errors::IntegrationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RdError {
    #[error("token refresh failed: {0}")]
    Auth(String),
    #[error("request to RD Station failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("RD Station returned status {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("could not decode RD Station response: {0}")]
    Decode(String),
    #[error("invalid RD Station url `{0}`")]
    InvalidUrl(String),
}

impl From<RdError> for IntegrationError {
    fn from(value: RdError) -> Self {
        match value {
            RdError::Auth(message) => Self::Auth(message),
            RdError::Transport(error) => Self::Transport(error.to_string()),
            RdError::Upstream { status, body } => Self::Upstream { status, body },
            RdError::Decode(message) => Self::Decode(message),
            RdError::InvalidUrl(url) => Self::Transport(format!("invalid url `{url}`")),
        }
    }
}
