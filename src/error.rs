//! Error kinds shared by the ingestion workers, the upstream clients and the
//! read paths.

use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    #[error("{service} responded with status {code}")]
    UpstreamStatus { service: &'static str, code: u16 },

    #[error("{service} request failed: {cause}")]
    UpstreamTransport { service: &'static str, cause: String },

    #[error("failed to parse {service} response: {cause}")]
    Parse { service: &'static str, cause: String },

    #[error("invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid token")]
    InvalidToken,

    #[error("rate limited")]
    RateLimited,

    #[error("operation cancelled")]
    Cancelled,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("cache error: {0}")]
    Cache(String),
}

impl CoreError {
    #[must_use]
    pub const fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            reason: reason.into(),
        }
    }

    pub fn parse(service: &'static str, cause: impl ToString) -> Self {
        Self::Parse {
            service,
            cause: cause.to_string(),
        }
    }

    /// Maps a reqwest failure. Status errors keep their code; everything
    /// else is a transport failure.
    #[must_use]
    pub fn from_reqwest(service: &'static str, err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::UpstreamStatus {
                service,
                code: status.as_u16(),
            };
        }
        if err.is_decode() {
            return Self::parse(service, err);
        }
        Self::UpstreamTransport {
            service,
            cause: err.to_string(),
        }
    }

    /// Stable kind name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::UpstreamStatus { .. } => "upstream_status",
            Self::UpstreamTransport { .. } => "upstream_transport",
            Self::Parse { .. } => "parse_error",
            Self::InvalidInput { .. } => "invalid_input",
            Self::Unauthorized => "unauthorized",
            Self::InvalidToken => "invalid_token",
            Self::RateLimited => "rate_limited",
            Self::Cancelled => "cancelled",
            Self::Conflict(_) => "conflict",
            Self::Database(_) => "database",
            Self::Cache(_) => "cache",
        }
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::UpstreamTransport { .. } | Self::RateLimited | Self::Cache(_)
        ) || matches!(self, Self::UpstreamStatus { code, .. } if *code >= 500 || *code == 429)
    }
}

impl From<sea_orm::DbErr> for CoreError {
    fn from(err: sea_orm::DbErr) -> Self {
        match err.sql_err() {
            Some(sea_orm::SqlErr::UniqueConstraintViolation(msg)) => Self::Conflict(msg),
            _ => Self::Database(err.to_string()),
        }
    }
}

impl From<redis::RedisError> for CoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Cache(err.to_string())
    }
}
