//! Anonymity routing.
//!
//! The router owns the single provider client of a process. The transport
//! is fixed when the client is built, so every provider call of a scan goes
//! out the same way.

use crate::net::provider::HttpProviderClient;
use crate::net::{ProviderClient, ProviderRequest};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// How outbound traffic leaves the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Direct,
    HttpProxy(String),
    Socks(String),
    Tor { port: u16 },
}

impl Transport {
    /// Build a proxy transport from a URL, picking SOCKS for `socks*` schemes.
    pub fn from_proxy_url(url: &str) -> Self {
        if url.starts_with("socks") {
            Transport::Socks(url.to_string())
        } else {
            Transport::HttpProxy(url.to_string())
        }
    }

    /// True when traffic does not leave from the local address.
    pub fn is_anonymized(&self) -> bool {
        !matches!(self, Transport::Direct)
    }

    /// Proxy URL for the HTTP client. SOCKS hostnames resolve remotely.
    pub fn proxy_url(&self) -> Option<String> {
        match self {
            Transport::Direct => None,
            Transport::HttpProxy(url) => Some(url.clone()),
            Transport::Socks(url) => Some(url.replacen("socks5://", "socks5h://", 1)),
            Transport::Tor { port } => Some(format!("socks5h://127.0.0.1:{}", port)),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Direct => write!(f, "direct"),
            Transport::HttpProxy(url) => write!(f, "http proxy {}", url),
            Transport::Socks(url) => write!(f, "socks proxy {}", url),
            Transport::Tor { port } => write!(f, "tor (127.0.0.1:{})", port),
        }
    }
}

/// Selects the transport for provider calls.
pub struct AnonymityRouter {
    transport: Transport,
    client: Arc<dyn ProviderClient>,
}

impl AnonymityRouter {
    /// Build the HTTP client for `transport`.
    pub fn new(transport: Transport, timeout: Duration, user_agent: &str) -> anyhow::Result<Self> {
        let proxy = transport.proxy_url();
        let client = HttpProviderClient::new(timeout, user_agent, proxy.as_deref())?;
        info!("Outbound transport: {}", transport);

        Ok(Self {
            transport,
            client: Arc::new(client),
        })
    }

    /// Use an existing client, e.g. a test double.
    #[cfg(test)]
    pub fn with_client(transport: Transport, client: Arc<dyn ProviderClient>) -> Self {
        Self { transport, client }
    }

    /// The client that carries `request`.
    pub fn route(&self, request: &ProviderRequest) -> &dyn ProviderClient {
        debug!("Routing {} via {}", request.provider, self.transport);
        self.client.as_ref()
    }

    #[cfg(test)]
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn is_anonymized(&self) -> bool {
        self.transport.is_anonymized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_urls() {
        assert_eq!(Transport::Direct.proxy_url(), None);
        assert_eq!(
            Transport::Tor { port: 9050 }.proxy_url().as_deref(),
            Some("socks5h://127.0.0.1:9050")
        );
        assert_eq!(
            Transport::from_proxy_url("socks5://10.0.0.1:1080").proxy_url().as_deref(),
            Some("socks5h://10.0.0.1:1080")
        );
        assert_eq!(
            Transport::from_proxy_url("http://proxy:3128"),
            Transport::HttpProxy("http://proxy:3128".to_string())
        );
    }

    #[test]
    fn test_anonymized() {
        assert!(!Transport::Direct.is_anonymized());
        assert!(Transport::Tor { port: 9050 }.is_anonymized());
        assert!(Transport::HttpProxy("http://p:1".into()).is_anonymized());
    }

    #[test]
    fn test_router_builds_client() {
        let router = AnonymityRouter::new(
            Transport::Tor { port: 9050 },
            Duration::from_secs(5),
            "cksearch-test",
        )
        .unwrap();

        assert!(router.is_anonymized());
        assert_eq!(router.transport(), &Transport::Tor { port: 9050 });
    }
}
