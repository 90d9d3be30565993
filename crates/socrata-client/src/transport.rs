//! HTTP transport with retry logic.
//!
//! [`Transport`] is the only way the client talks to the network, so tests
//! and alternative HTTP stacks can swap it out. [`HttpTransport`] is the
//! reqwest-based default.

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::types::ApiErrorBody;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{
    policies::ExponentialBackoff, RetryTransientMiddleware, Retryable, RetryableStrategy,
};
use serde_json::Value;

pub use reqwest::Method;

/// Header carrying the application token.
pub const APP_TOKEN_HEADER: &str = "x-app-token";

/// One API call: method, path relative to the base URL, optional JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Some(body),
        }
    }
}

/// Sends one request and returns the parsed JSON body.
///
/// Implementations return `Err` for transport failures and non-success
/// statuses; a successful status always yields the decoded body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<Value>;
}

/// reqwest transport with automatic retries for transient failures.
pub struct HttpTransport {
    http: ClientWithMiddleware,
    base_url: String,
}

impl HttpTransport {
    /// Build a transport from the client configuration.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .unwrap_or_else(|_| HeaderValue::from_static("socrata-client")),
        );

        if let Some(ref token) = config.app_token {
            headers.insert(
                HeaderName::from_static(APP_TOKEN_HEADER),
                HeaderValue::from_str(token)
                    .map_err(|_| ClientError::Config("Invalid app token format".to_string()))?,
            );
        }

        let reqwest_client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.tls_verify)
            .build()?;

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(config.retry_initial_delay, config.retry_max_delay)
            .build_with_max_retries(config.max_retries);

        let client = ClientBuilder::new(reqwest_client)
            .with(RetryTransientMiddleware::new_with_policy_and_strategy(
                retry_policy,
                TransientRetryStrategy,
            ))
            .build();

        Ok(Self {
            http: client,
            base_url: config.base_url.clone(),
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert a non-success response into an error.
    fn status_to_error(
        status: StatusCode,
        body: Option<&[u8]>,
        request_id: Option<String>,
    ) -> ClientError {
        let parsed: Option<ApiErrorBody> = body.and_then(|b| serde_json::from_slice(b).ok());

        let message = parsed
            .as_ref()
            .and_then(ApiErrorBody::description)
            .or_else(|| {
                body.filter(|b| !b.is_empty())
                    .map(|b| String::from_utf8_lossy(b).to_string())
            })
            .unwrap_or_else(|| status.to_string());

        ClientError::Api {
            status: status.as_u16(),
            message,
            code: parsed.and_then(|p| p.code),
            request_id,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<Value> {
        let ApiRequest { method, path, body } = request;
        let url = format!("{}{}", self.base_url, path);
        let start = std::time::Instant::now();

        tracing::debug!(
            method = %method,
            path = %path,
            "Sending request"
        );

        let builder = if let Some(ref b) = body {
            let json_body = serde_json::to_vec(b)?;
            self.http.request(method.clone(), &url).body(json_body)
        } else {
            self.http.request(method.clone(), &url)
        };

        let response = builder.send().await?;
        let status = response.status();
        let duration = start.elapsed();

        let request_id = response
            .headers()
            .get("x-request-id")
            .or_else(|| response.headers().get("x-socrata-requestid"))
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        tracing::debug!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            request_id = ?request_id,
            "Received response"
        );

        if status.is_success() {
            let body = response.bytes().await?;
            serde_json::from_slice(&body).map_err(|e| {
                ClientError::InvalidResponse(format!(
                    "Failed to parse response: {} (body: {})",
                    e,
                    String::from_utf8_lossy(&body)
                ))
            })
        } else {
            let error_body = response.bytes().await.ok();
            let err = Self::status_to_error(status, error_body.as_deref(), request_id);

            tracing::warn!(
                method = %method,
                path = %path,
                status = %status.as_u16(),
                duration_ms = %duration.as_millis(),
                error = %err,
                "Request failed"
            );

            Err(err)
        }
    }
}

/// Retries transient network errors, 5xx and 429; nothing else.
///
/// Both endpoints are read-only, including the POST to the inline rows
/// endpoint, so retrying them is safe.
struct TransientRetryStrategy;

impl RetryableStrategy for TransientRetryStrategy {
    fn handle(&self, res: &reqwest_middleware::Result<reqwest::Response>) -> Option<Retryable> {
        match res {
            Ok(response) => {
                let status = response.status();
                if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    Some(Retryable::Transient)
                } else if status.is_success() {
                    None
                } else {
                    Some(Retryable::Fatal)
                }
            }
            Err(error) => {
                if error.is_timeout() || error.is_connect() {
                    Some(Retryable::Transient)
                } else {
                    Some(Retryable::Fatal)
                }
            }
        }
    }
}
