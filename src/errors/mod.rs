//! Error handling module for the consent service.
//!
//! Provides the error taxonomy shared by the codec, catalog client, store and
//! command processor, with mapping to HTTP status codes and response envelopes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Error codes as constants to avoid stringly-typed errors.
pub mod codes {
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const COOKIE_DECODE_ERROR: &str = "COOKIE_DECODE_ERROR";
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
    pub const PARSE_ERROR: &str = "PARSE_ERROR";
    pub const UNKNOWN_COMMAND: &str = "UNKNOWN_COMMAND";
    pub const INVALID_PARAMETER: &str = "INVALID_PARAMETER";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
    pub const NOT_READY: &str = "NOT_READY";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Consent service error type.
#[derive(Debug, Clone, PartialEq)]
pub enum CmpError {
    /// Authentication required
    Unauthorized(String),
    /// A persisted consent cookie could not be decoded
    CookieDecode(String),
    /// A catalog endpoint was unreachable or answered with a failure status
    Network(String),
    /// A catalog or command payload was malformed
    Parse(String),
    /// A command name the processor does not know
    UnknownCommand(String),
    /// A command argument had the wrong shape
    InvalidParameter(String),
    /// Cookie storage failure
    Storage(String),
    /// The requested data is not available until the catalogs have loaded
    NotReady(String),
    /// Internal error
    Internal(String),
}

impl CmpError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            CmpError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            CmpError::CookieDecode(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CmpError::Network(_) => StatusCode::BAD_GATEWAY,
            CmpError::Parse(_) => StatusCode::BAD_REQUEST,
            CmpError::UnknownCommand(_) => StatusCode::NOT_FOUND,
            CmpError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            CmpError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CmpError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            CmpError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            CmpError::Unauthorized(_) => codes::UNAUTHORIZED,
            CmpError::CookieDecode(_) => codes::COOKIE_DECODE_ERROR,
            CmpError::Network(_) => codes::NETWORK_ERROR,
            CmpError::Parse(_) => codes::PARSE_ERROR,
            CmpError::UnknownCommand(_) => codes::UNKNOWN_COMMAND,
            CmpError::InvalidParameter(_) => codes::INVALID_PARAMETER,
            CmpError::Storage(_) => codes::STORAGE_ERROR,
            CmpError::NotReady(_) => codes::NOT_READY,
            CmpError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> String {
        match self {
            CmpError::Unauthorized(msg)
            | CmpError::CookieDecode(msg)
            | CmpError::Network(msg)
            | CmpError::Parse(msg)
            | CmpError::UnknownCommand(msg)
            | CmpError::InvalidParameter(msg)
            | CmpError::Storage(msg)
            | CmpError::NotReady(msg)
            | CmpError::Internal(msg) => msg.clone(),
        }
    }
}

impl std::fmt::Display for CmpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

impl std::error::Error for CmpError {}

impl From<sqlx::Error> for CmpError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Storage error: {:?}", err);
        CmpError::Storage(format!("Storage error: {}", err))
    }
}

impl From<reqwest::Error> for CmpError {
    fn from(err: reqwest::Error) -> Self {
        tracing::error!("Network error: {:?}", err);
        CmpError::Network(format!("Network error: {}", err))
    }
}

impl From<serde_json::Error> for CmpError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON error: {:?}", err);
        CmpError::Parse(format!("JSON error: {}", err))
    }
}

/// Boot stage that produced a [`BootError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStage {
    ReadCookies,
    ConstructStore,
    FetchCatalogs,
}

impl BootStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            BootStage::ReadCookies => "read_cookies",
            BootStage::ConstructStore => "construct_store",
            BootStage::FetchCatalogs => "fetch_catalogs",
        }
    }
}

/// Failure of one stage of the boot pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct BootError {
    pub stage: BootStage,
    pub source: CmpError,
}

impl BootError {
    pub fn new(stage: BootStage, source: CmpError) -> Self {
        Self { stage, source }
    }
}

impl std::fmt::Display for BootError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "boot failed at {}: {}", self.stage.as_str(), self.source)
    }
}

impl std::error::Error for BootError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Error details in the response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

/// Error response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetails,
}

impl ErrorResponse {
    pub fn new(error: &CmpError) -> Self {
        Self {
            success: false,
            error: ErrorDetails {
                code: error.error_code().to_string(),
                message: error.message(),
            },
        }
    }
}

impl IntoResponse for CmpError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse::new(&self);
        (status, Json(body)).into_response()
    }
}
