//! Intelligence modules.
//!
//! Each module investigates one kind of target and reports typed fields.
//! Modules never talk to the network directly: every provider call goes
//! through [`ScanContext::fetch`], which enforces cancellation, rate limits
//! and the anonymity requirement.

pub mod dns;
pub mod domain;
pub mod email;
pub mod geo;
pub mod image;
pub mod ip;
pub mod person;
pub mod phone;
pub mod social;
pub mod username;

use crate::config::ApiKeys;
use crate::models::{ModuleError, PartialResult, Query, QueryType};
use crate::net::{AnonymityRouter, ProviderError, ProviderRequest, ProviderResponse, RateLimiter};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A unit of investigation for one or more query types.
#[async_trait]
pub trait Module: Send + Sync {
    /// Unique name; used as provenance in reports.
    fn name(&self) -> &'static str;

    /// Query types this module can investigate.
    fn query_types(&self) -> &'static [QueryType];

    /// Investigate the target. Must stop at the next cancellation checkpoint
    /// once the scan is cancelled.
    async fn investigate(
        &self,
        query: &Query,
        ctx: &ScanContext,
    ) -> Result<PartialResult, ModuleError>;
}

/// Shared services handed to every module of one scan.
#[derive(Clone)]
pub struct ScanContext {
    limiter: Arc<RateLimiter>,
    router: Arc<AnonymityRouter>,
    keys: Arc<ApiKeys>,
    cancel: CancellationToken,
    require_anonymity: bool,
}

impl ScanContext {
    pub fn new(
        limiter: Arc<RateLimiter>,
        router: Arc<AnonymityRouter>,
        keys: Arc<ApiKeys>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            limiter,
            router,
            keys,
            cancel,
            require_anonymity: false,
        }
    }

    pub fn requiring_anonymity(mut self, required: bool) -> Self {
        self.require_anonymity = required;
        self
    }

    pub fn anonymity_required(&self) -> bool {
        self.require_anonymity
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancellation checkpoint.
    pub fn checkpoint(&self, module: &str) -> Result<(), ModuleError> {
        if self.cancel.is_cancelled() {
            Err(ModuleError::cancelled(module))
        } else {
            Ok(())
        }
    }

    /// Refuse to continue when anonymity is required but the transport is direct.
    pub fn ensure_anonymity(&self, module: &str) -> Result<(), ModuleError> {
        if self.require_anonymity && !self.router.is_anonymized() {
            Err(ModuleError::anonymity_refused(
                module,
                "anonymity required but no anonymizing transport is configured",
            ))
        } else {
            Ok(())
        }
    }

    pub fn api_key(&self, provider: &str) -> Option<&str> {
        self.keys.get(provider)
    }

    /// API key or an `AuthFailure` error naming the provider.
    pub fn require_key(&self, module: &str, provider: &str) -> Result<&str, ModuleError> {
        self.api_key(provider).ok_or_else(|| {
            ProviderError::MissingKey(provider.to_string()).into_module_error(module)
        })
    }

    /// Perform one provider call on behalf of `module`.
    ///
    /// Returns the response for any HTTP status.
    pub async fn fetch(
        &self,
        module: &str,
        request: ProviderRequest,
    ) -> Result<ProviderResponse, ModuleError> {
        self.checkpoint(module)?;
        self.ensure_anonymity(module)?;

        let permit = tokio::select! {
            permit = self.limiter.acquire(&request.provider) => {
                permit.map_err(|e| ModuleError::rate_limited(module, e.to_string()))?
            }
            _ = self.cancel.cancelled() => return Err(ModuleError::cancelled(module)),
        };
        debug!("{}: token granted from '{}'", module, permit.bucket());

        let client = self.router.route(&request);
        tokio::select! {
            response = client.call(&request) => response.map_err(|e| e.into_module_error(module)),
            _ = self.cancel.cancelled() => Err(ModuleError::cancelled(module)),
        }
    }

    /// Like [`fetch`](Self::fetch), but non-2xx answers become errors.
    pub async fn fetch_ok(
        &self,
        module: &str,
        request: ProviderRequest,
    ) -> Result<ProviderResponse, ModuleError> {
        self.fetch(module, request)
            .await?
            .error_for_status()
            .map_err(|e| e.into_module_error(module))
    }

    /// Fetch and decode a JSON body from a successful answer.
    pub async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        module: &str,
        request: ProviderRequest,
    ) -> Result<T, ModuleError> {
        self.fetch_ok(module, request)
            .await?
            .json()
            .map_err(|e| e.into_module_error(module))
    }
}

/// Percent-encode a URL component.
pub fn encode_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// Format `(label, url)` pairs as a list field.
pub fn link_list(links: &[(&str, String)]) -> Vec<String> {
    links
        .iter()
        .map(|(label, url)| format!("{}: {}", label, url))
        .collect()
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::models::ErrorKind;
    use crate::net::Transport;

    #[tokio::test]
    async fn test_fetch_refuses_direct_when_anonymity_required() {
        let mock = Arc::new(MockProvider::new());
        let ctx = context(mock.clone()).requiring_anonymity(true);

        let err = ctx
            .fetch("ipinfo", ProviderRequest::get("ipinfo", "https://ipinfo.io"))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::ProviderUnavailable);
        assert!(!err.retryable);
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_allows_anonymized_transport() {
        let mock = Arc::new(MockProvider::new().json("ipinfo.io", 200, serde_json::json!({})));
        let ctx = context_with(mock.clone(), ApiKeys::default(), Transport::Tor { port: 9050 })
            .requiring_anonymity(true);

        let response = ctx
            .fetch("ipinfo", ProviderRequest::get("ipinfo", "https://ipinfo.io"))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(mock.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_stops_after_cancellation() {
        let mock = Arc::new(MockProvider::new());
        let ctx = context(mock.clone());
        ctx.cancellation().cancel();

        let err = ctx
            .fetch("m", ProviderRequest::get("p", "https://example.com"))
            .await
            .unwrap_err();

        assert_eq!(err.message, "scan cancelled");
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_ok_maps_status() {
        let mock = Arc::new(MockProvider::new().on("x", ProviderResponse::new(503, "")));
        let ctx = context(mock);

        let err = ctx
            .fetch_ok("m", ProviderRequest::get("p", "https://x.test"))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::ProviderUnavailable);
        assert!(err.retryable);
    }

    #[test]
    fn test_encode_component() {
        assert_eq!(encode_component("john smith"), "john%20smith");
        assert_eq!(encode_component("a@b.co"), "a%40b.co");
        assert_eq!(encode_component("safe-._~"), "safe-._~");
    }
}
