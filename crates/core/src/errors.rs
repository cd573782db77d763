use thiserror::Error;

/// Failure talking to the contact platform, independent of the HTTP stack used.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IntegrationError {
    #[error("credential refresh failed: {0}")]
    Auth(String),
    #[error("upstream returned status {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("upstream transport failure: {0}")]
    Transport(String),
    #[error("upstream response could not be decoded: {0}")]
    Decode(String),
}

impl IntegrationError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Upstream(IntegrationError),
    #[error("tagging failed: {0}")]
    Tag(IntegrationError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("request body is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("request body must be a JSON array of events")]
    NotAnArray,
    #[error("request body must contain at least one event")]
    EmptyBatch,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("unauthorized: {message}")]
    Unauthorized { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("unprocessable entity: {message}")]
    UnprocessableEntity { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthorized { .. } => 401,
            Self::NotFound { .. } => 404,
            Self::BadRequest { .. } => 400,
            Self::UnprocessableEntity { .. } => 422,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Unauthorized { message, .. }
            | Self::NotFound { message, .. }
            | Self::BadRequest { message, .. }
            | Self::UnprocessableEntity { message, .. } => message,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::Unauthorized { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::BadRequest { correlation_id, .. }
            | Self::UnprocessableEntity { correlation_id, .. } => correlation_id,
        }
    }
}

impl ValidationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::Unauthorized { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::UnprocessableEntity { correlation_id: id, .. } => {
                *id = correlation_id
            }
        }
        mapped
    }
}

impl From<ValidationError> for InterfaceError {
    fn from(value: ValidationError) -> Self {
        let message = value.to_string();
        match value {
            ValidationError::InvalidJson(_) => {
                Self::UnprocessableEntity { message, correlation_id: "unassigned".to_owned() }
            }
            ValidationError::NotAnArray | ValidationError::EmptyBatch => {
                Self::BadRequest { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}
