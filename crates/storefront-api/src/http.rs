//! reqwest-backed transport. The refresh credential is an HTTP-only cookie,
//! so the client carries a cookie jar and never touches the token itself.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use storefront_client_core::{
    ApiError, ApiRequest, ApiResponse, ApiTransport, ClientConfig, Method,
};

use crate::paths;

pub struct HttpTransport {
    base_url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|error| ApiError::Network(error.to_string()))?;
        Ok(Self {
            base_url: config.base_url.clone(),
            timeout: config.request_timeout(),
            http,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse, ApiError> {
        let method = match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut request = self
            .http
            .request(method, self.endpoint(path))
            .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
            .timeout(self.timeout);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|error| ApiError::Network(error.to_string()))?;
        classify_response(response).await
    }
}

#[async_trait]
impl ApiTransport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.execute(request.method, &request.path, request.body.as_ref())
            .await
    }

    async fn renew_credentials(&self) -> Result<(), ApiError> {
        // The refresh token rides the cookie jar; the body is empty.
        self.execute(Method::Post, paths::TOKEN_REFRESH, None)
            .await
            .map(|_| ())
    }
}

async fn classify_response(response: reqwest::Response) -> Result<ApiResponse, ApiError> {
    let status = response.status().as_u16();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| ApiError::Network(error.to_string()))?;

    if !(200..300).contains(&status) {
        return Err(ApiError::from_status(status, extract_error_message(&bytes)));
    }
    if bytes.is_empty() {
        return Ok(ApiResponse {
            status,
            body: Value::Null,
        });
    }
    let body =
        serde_json::from_slice(&bytes).map_err(|error| ApiError::Decode(error.to_string()))?;
    Ok(ApiResponse { status, body })
}

/// The server reports failures as `{"error": "..."}` or `{"detail": "..."}`.
fn extract_error_message(bytes: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
        for key in ["error", "detail"] {
            if let Some(message) = value.get(key).and_then(Value::as_str) {
                return message.to_string();
            }
        }
    }
    let raw = String::from_utf8_lossy(bytes);
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        "<empty>".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_builder_normalizes_paths() {
        let config = ClientConfig::new("https://shop.example.com/").expect("config");
        let transport = HttpTransport::new(&config).expect("transport");
        assert_eq!(
            transport.endpoint("/carts/"),
            "https://shop.example.com/carts/"
        );
        assert_eq!(
            transport.endpoint("carts/"),
            "https://shop.example.com/carts/"
        );
    }

    #[test]
    fn error_message_prefers_error_then_detail() {
        assert_eq!(
            extract_error_message(br#"{"error": "out of stock"}"#),
            "out of stock"
        );
        assert_eq!(
            extract_error_message(br#"{"detail": "authentication failed"}"#),
            "authentication failed"
        );
        assert_eq!(extract_error_message(b"  "), "<empty>");
        assert_eq!(extract_error_message(b"gateway timeout"), "gateway timeout");
    }
}
