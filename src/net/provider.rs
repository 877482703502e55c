//! The boundary between modules and external providers.
//!
//! Modules describe a call as a [`ProviderRequest`]; a [`ProviderClient`]
//! executes it. Any HTTP status comes back as a response so modules can give
//! meaning to "not found" answers, while transport failures come back as a
//! classified [`ProviderError`].

use crate::models::{ErrorKind, ModuleError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Classified failure of a provider call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("provider returned HTTP {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("no API key configured for {0}")]
    MissingKey(String),

    #[error("request failed: {0}")]
    Transport(String),
}

impl ProviderError {
    /// Map to the report's error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Timeout => ErrorKind::Timeout,
            ProviderError::Connect(_) => ErrorKind::ProviderUnavailable,
            ProviderError::Status(429) => ErrorKind::RateLimited,
            ProviderError::Status(401 | 403) => ErrorKind::AuthFailure,
            ProviderError::Status(s) if *s >= 500 => ErrorKind::ProviderUnavailable,
            ProviderError::Status(_) => ErrorKind::Unknown,
            ProviderError::Malformed(_) => ErrorKind::Unknown,
            ProviderError::MissingKey(_) => ErrorKind::AuthFailure,
            ProviderError::Transport(_) => ErrorKind::ProviderUnavailable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Timeout | ErrorKind::RateLimited | ErrorKind::ProviderUnavailable
        )
    }

    pub fn into_module_error(self, module: &str) -> ModuleError {
        ModuleError::new(module, self.kind(), self.to_string(), self.is_retryable())
    }
}

/// A single outbound GET call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    /// Provider key; also the rate-limit bucket.
    pub provider: String,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl ProviderRequest {
    pub fn get(provider: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

/// A provider answer with any HTTP status.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProviderResponse {
    pub status: u16,
    /// URL after redirects.
    pub final_url: String,
    /// Header names are lowercase.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ProviderResponse {
    #[cfg(test)]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
            ..Default::default()
        }
    }

    #[cfg(test)]
    pub fn with_final_url(mut self, url: impl Into<String>) -> Self {
        self.final_url = url.into();
        self
    }

    #[cfg(test)]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ProviderError> {
        serde_json::from_slice(&self.body).map_err(|e| ProviderError::Malformed(e.to_string()))
    }

    /// Turn a non-2xx answer into a classified error.
    pub fn error_for_status(self) -> Result<Self, ProviderError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ProviderError::Status(self.status))
        }
    }
}

/// Executes provider calls. Implemented by the HTTP client and by test doubles.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn call(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError>;
}

/// reqwest-backed client, built once per transport.
pub struct HttpProviderClient {
    client: reqwest::Client,
}

impl HttpProviderClient {
    pub fn new(
        timeout: Duration,
        user_agent: &str,
        proxy: Option<&str>,
    ) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(10));

        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn call(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut builder = self.client.get(&request.url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        debug!("{} GET {}", request.provider, request.url);

        let response = builder.send().await.map_err(classify)?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_ascii_lowercase(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await.map_err(classify)?.to_vec();

        Ok(ProviderResponse {
            status,
            final_url,
            headers,
            body,
        })
    }
}

fn classify(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else if e.is_connect() {
        ProviderError::Connect(e.to_string())
    } else if e.is_decode() {
        ProviderError::Malformed(e.to_string())
    } else {
        ProviderError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let cases = [
            (ProviderError::Timeout, ErrorKind::Timeout, true),
            (ProviderError::Connect("refused".into()), ErrorKind::ProviderUnavailable, true),
            (ProviderError::Status(429), ErrorKind::RateLimited, true),
            (ProviderError::Status(401), ErrorKind::AuthFailure, false),
            (ProviderError::Status(403), ErrorKind::AuthFailure, false),
            (ProviderError::Status(503), ErrorKind::ProviderUnavailable, true),
            (ProviderError::Status(418), ErrorKind::Unknown, false),
            (ProviderError::Malformed("eof".into()), ErrorKind::Unknown, false),
            (ProviderError::MissingKey("numverify".into()), ErrorKind::AuthFailure, false),
        ];

        for (error, kind, retryable) in cases {
            let module_error = error.clone().into_module_error("m");
            assert_eq!(module_error.kind, kind, "{:?}", error);
            assert_eq!(module_error.retryable, retryable, "{:?}", error);
            assert_eq!(module_error.module_name, "m");
        }
    }

    #[test]
    fn test_response_helpers() {
        let response = ProviderResponse::new(200, r#"{"ok": true}"#)
            .with_header("Content-Type", "application/json")
            .with_final_url("https://example.com/");

        assert!(response.is_success());
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.header("CONTENT-TYPE"), Some("application/json"));

        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["ok"], true);

        let err = ProviderResponse::new(404, "").error_for_status().unwrap_err();
        assert_eq!(err, ProviderError::Status(404));
    }

    #[test]
    fn test_malformed_json() {
        let response = ProviderResponse::new(200, "not json");
        let result: Result<serde_json::Value, _> = response.json();
        assert!(matches!(result, Err(ProviderError::Malformed(_))));
    }

    #[test]
    fn test_request_builder() {
        let request = ProviderRequest::get("ipinfo", "https://ipinfo.io/8.8.8.8/json")
            .query("token", "abc")
            .header("Accept", "application/json");

        assert_eq!(request.provider, "ipinfo");
        assert_eq!(request.query, vec![("token".to_string(), "abc".to_string())]);
        assert_eq!(request.headers.len(), 1);
    }
}
