use async_trait::async_trait;
use serde_json::Value;

use crate::error::ApiError;

/// HTTP method subset used by the consumed surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// A replayable description of one API call.
///
/// Cheap to clone so the coordinator can queue it during a renewal episode
/// and reissue it verbatim afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
        }
    }

    #[must_use]
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Some(body),
        }
    }

    #[must_use]
    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Patch,
            path: path.into(),
            body: Some(body),
        }
    }

    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::Delete,
            path: path.into(),
            body: None,
        }
    }
}

/// Decoded success payload. `body` is `Value::Null` for 204 responses.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

/// One HTTP call in, classified outcome out.
///
/// Implementations must map HTTP 401 to [`ApiError::Unauthorized`] and 403
/// to [`ApiError::Forbidden`]; the coordinator's renewal logic depends on
/// that distinction. `renew_credentials` exchanges the refresh credential
/// (an HTTP-only cookie the client never sees) for a fresh access
/// credential.
#[async_trait]
pub trait ApiTransport: Send + Sync + 'static {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError>;

    async fn renew_credentials(&self) -> Result<(), ApiError>;
}
