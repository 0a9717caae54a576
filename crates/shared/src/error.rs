use serde::{Deserialize, Serialize};

/// Error codes returned to the homeserver, serialized the way the Matrix
/// application-service API expects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "M_FORBIDDEN")]
    Forbidden,
    #[serde(rename = "M_NOT_FOUND")]
    NotFound,
    #[serde(rename = "M_BAD_JSON")]
    BadJson,
    #[serde(rename = "M_UNKNOWN")]
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(rename = "errcode")]
    pub code: ErrorCode,
    #[serde(rename = "error")]
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
