//! IP address intelligence: geolocation, network owner and exposed ports.

use crate::models::{Coordinate, ModuleError, PartialResult, Query, QueryType};
use crate::modules::dns::{self, normalize_domain, RecordType};
use crate::modules::{Module, ScanContext};
use crate::net::ProviderRequest;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

pub const COMMON_PORTS: &[u16] = &[
    21, 22, 23, 25, 53, 80, 110, 111, 135, 139, 143, 443, 445, 993, 995, 1723, 3306, 3389, 5432,
    5900, 8080, 8443,
];

/// Ports whose exposure is a finding on its own.
pub const RISKY_PORTS: &[u16] = &[21, 23, 445, 3306, 3389, 6379, 27017];

const MAX_CONCURRENT_CONNECTS: usize = 32;
const BANNER_TIMEOUT: Duration = Duration::from_secs(1);
const PORT_SCAN_BUCKET: &str = "port_scan";

pub fn service_name(port: u16) -> &'static str {
    match port {
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        53 => "dns",
        80 => "http",
        110 => "pop3",
        111 => "rpcbind",
        135 => "msrpc",
        139 => "netbios",
        143 => "imap",
        443 => "https",
        445 => "smb",
        993 => "imaps",
        995 => "pop3s",
        1723 => "pptp",
        3306 => "mysql",
        3389 => "rdp",
        5432 => "postgresql",
        5900 => "vnc",
        6379 => "redis",
        8080 => "http-proxy",
        8443 => "https-alt",
        27017 => "mongodb",
        _ => "unknown",
    }
}

/// True for addresses that geolocation providers can say something about.
pub fn is_public(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation())
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            !(v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80)
        }
    }
}

/// Accept an IP literal or resolve a hostname to its first A record.
pub async fn resolve_target(
    ctx: &ScanContext,
    module: &str,
    target: &str,
) -> Result<IpAddr, ModuleError> {
    if let Ok(ip) = target.trim().parse::<IpAddr>() {
        return Ok(ip);
    }

    let host = normalize_domain(target)
        .ok_or_else(|| ModuleError::invalid_target(module, "not an IP address or hostname"))?;
    let records = dns::resolve(ctx, module, &host, RecordType::A).await?;

    records
        .iter()
        .find_map(|r| r.parse::<IpAddr>().ok())
        .ok_or_else(|| ModuleError::invalid_target(module, format!("{} does not resolve", host)))
}

async fn public_target(ctx: &ScanContext, module: &str, query: &Query) -> Result<IpAddr, ModuleError> {
    let ip = resolve_target(ctx, module, query.value()).await?;
    if is_public(&ip) {
        Ok(ip)
    } else {
        Err(ModuleError::invalid_target(
            module,
            format!("{} is a private or reserved address", ip),
        ))
    }
}

/// Split `"AS15169 Google LLC"` into ASN and organization.
pub fn split_asn(text: &str) -> (Option<String>, Option<String>) {
    let text = text.trim();
    match text.split_once(' ') {
        Some((asn, org)) if asn.starts_with("AS") => (Some(asn.to_string()), Some(org.trim().to_string())),
        _ if text.starts_with("AS") && !text.contains(' ') => (Some(text.to_string()), None),
        _ if text.is_empty() => (None, None),
        _ => (None, Some(text.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    loc: Option<String>,
    #[serde(default)]
    org: Option<String>,
    #[serde(default)]
    postal: Option<String>,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    bogon: bool,
}

/// Geolocation and network owner from ipinfo.io.
pub struct IpInfoModule;

#[async_trait]
impl Module for IpInfoModule {
    fn name(&self) -> &'static str {
        "ipinfo"
    }

    fn query_types(&self) -> &'static [QueryType] {
        &[QueryType::Ip]
    }

    async fn investigate(&self, query: &Query, ctx: &ScanContext) -> Result<PartialResult, ModuleError> {
        let ip = public_target(ctx, self.name(), query).await?;

        let mut request = ProviderRequest::get("ipinfo", format!("https://ipinfo.io/{}/json", ip));
        if let Some(token) = ctx.api_key("ipinfo") {
            request = request.query("token", token);
        }
        let body: IpInfoResponse = ctx.fetch_json(self.name(), request).await?;

        if body.bogon {
            return Err(ModuleError::invalid_target(self.name(), "bogon address"));
        }

        let mut result = PartialResult::new(self.name(), 0.85).with_field("ip", ip.to_string());
        result.set_text("hostname", body.hostname.as_deref());
        result.set_text("city", body.city.as_deref());
        result.set_text("region", body.region.as_deref());
        result.set_text("country", body.country.as_deref());
        result.set_text("postal", body.postal.as_deref());
        result.set_text("timezone", body.timezone.as_deref());
        result.set_opt("location", body.loc.as_deref().and_then(Coordinate::parse_pair));
        if let Some(org) = body.org.as_deref() {
            let (asn, org) = split_asn(org);
            result.set_opt("asn", asn);
            result.set_opt("org", org);
        }

        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    region_name: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    zip: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    isp: Option<String>,
    #[serde(default, rename = "as")]
    asn: Option<String>,
    #[serde(default)]
    reverse: Option<String>,
    #[serde(default)]
    proxy: Option<bool>,
    #[serde(default)]
    hosting: Option<bool>,
}

/// Geolocation, ISP and proxy/hosting flags from ip-api.com.
pub struct IpApiModule;

impl IpApiModule {
    const FIELDS: &'static str =
        "status,message,country,countryCode,regionName,city,zip,lat,lon,timezone,isp,org,as,reverse,proxy,hosting,query";
}

#[async_trait]
impl Module for IpApiModule {
    fn name(&self) -> &'static str {
        "ip_api"
    }

    fn query_types(&self) -> &'static [QueryType] {
        &[QueryType::Ip]
    }

    async fn investigate(&self, query: &Query, ctx: &ScanContext) -> Result<PartialResult, ModuleError> {
        let ip = public_target(ctx, self.name(), query).await?;

        let request = ProviderRequest::get("ip_api", format!("http://ip-api.com/json/{}", ip))
            .query("fields", Self::FIELDS);
        let body: IpApiResponse = ctx.fetch_json(self.name(), request).await?;

        if body.status != "success" {
            let message = body.message.unwrap_or_else(|| "lookup failed".to_string());
            return Err(ModuleError::invalid_target(self.name(), message));
        }

        let mut result = PartialResult::new(self.name(), 0.8).with_field("ip", ip.to_string());
        result.set_text("hostname", body.reverse.as_deref());
        result.set_text("city", body.city.as_deref());
        result.set_text("region", body.region_name.as_deref());
        result.set_text("country", body.country_code.as_deref());
        result.set_text("country_name", body.country.as_deref());
        result.set_text("postal", body.zip.as_deref());
        result.set_text("timezone", body.timezone.as_deref());
        result.set_text("isp", body.isp.as_deref());
        if let (Some(lat), Some(lon)) = (body.lat, body.lon) {
            result.set_opt("location", Coordinate::new(lat, lon));
        }
        if let Some(asn) = body.asn.as_deref() {
            let (asn, org) = split_asn(asn);
            result.set_opt("asn", asn);
            result.set_opt("org", org);
        }
        result.set_opt("network.proxy", body.proxy);
        result.set_opt("network.hosting", body.hosting);

        Ok(result)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PortState {
    Open(Option<String>),
    Closed,
    Filtered,
}

/// Active TCP connect scan of common ports.
///
/// Raw sockets cannot be routed through the anonymity transport, so the
/// module refuses to run when anonymity is required.
pub struct PortScanModule {
    ports: Vec<u16>,
    connect_timeout: Duration,
}

impl PortScanModule {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            ports: COMMON_PORTS.to_vec(),
            connect_timeout,
        }
    }

    #[cfg(test)]
    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }

    async fn probe(&self, ip: IpAddr, port: u16, ctx: &ScanContext) -> Result<PortState, ModuleError> {
        ctx.checkpoint(self.name())?;
        ctx.limiter()
            .acquire(PORT_SCAN_BUCKET)
            .await
            .map_err(|e| ModuleError::rate_limited(self.name(), e.to_string()))?;

        let addr = SocketAddr::new(ip, port);
        let mut stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(_)) => return Ok(PortState::Closed),
            Err(_) => return Ok(PortState::Filtered),
        };

        Ok(PortState::Open(grab_banner(&mut stream, port).await))
    }
}

async fn grab_banner(stream: &mut TcpStream, port: u16) -> Option<String> {
    let mut buf = [0u8; 256];

    if matches!(port, 80 | 8080) {
        stream.write_all(b"HEAD / HTTP/1.0\r\n\r\n").await.ok()?;
    }

    let n = tokio::time::timeout(BANNER_TIMEOUT, stream.read(&mut buf))
        .await
        .ok()?
        .ok()?;
    let text = String::from_utf8_lossy(&buf[..n]);
    let banner: String = text
        .lines()
        .find(|l| l.to_ascii_lowercase().starts_with("server:"))
        .or_else(|| text.lines().next())?
        .trim()
        .chars()
        .take(120)
        .collect();

    (!banner.is_empty()).then_some(banner)
}

/// Guess the operating system from banners and exposed services.
pub fn os_hints(open: &[(u16, Option<String>)]) -> Vec<String> {
    let mut hints = Vec::new();
    let banners = open
        .iter()
        .filter_map(|(_, b)| b.as_deref())
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase();

    for (marker, hint) in [
        ("ubuntu", "Ubuntu Linux"),
        ("debian", "Debian Linux"),
        ("centos", "CentOS Linux"),
        ("freebsd", "FreeBSD"),
        ("microsoft", "Windows"),
        ("windows", "Windows"),
    ] {
        if banners.contains(marker) && !hints.iter().any(|h| h == hint) {
            hints.push(hint.to_string());
        }
    }

    let ports: Vec<u16> = open.iter().map(|(p, _)| *p).collect();
    if (ports.contains(&3389) || ports.contains(&135)) && !hints.iter().any(|h| h == "Windows") {
        hints.push("Windows".to_string());
    }
    hints
}

#[async_trait]
impl Module for PortScanModule {
    fn name(&self) -> &'static str {
        "port_scan"
    }

    fn query_types(&self) -> &'static [QueryType] {
        &[QueryType::Ip]
    }

    async fn investigate(&self, query: &Query, ctx: &ScanContext) -> Result<PartialResult, ModuleError> {
        if ctx.anonymity_required() {
            return Err(ModuleError::anonymity_refused(
                self.name(),
                "port scanning cannot run over an anonymizing transport",
            ));
        }
        let ip = resolve_target(ctx, self.name(), query.value()).await?;
        debug!("Scanning {} ports on {}", self.ports.len(), ip);

        let probes: Vec<_> = self
            .ports
            .iter()
            .copied()
            .map(|port| async move { (port, self.probe(ip, port, ctx).await) })
            .collect();
        let states: Vec<(u16, Result<PortState, ModuleError>)> = stream::iter(probes)
            .buffer_unordered(MAX_CONCURRENT_CONNECTS)
            .collect()
            .await;

        ctx.checkpoint(self.name())?;

        let mut open: Vec<(u16, Option<String>)> = Vec::new();
        let mut filtered = 0usize;
        let mut unprobed: Vec<(u16, ModuleError)> = Vec::new();
        for (port, state) in states {
            match state {
                Ok(PortState::Open(banner)) => open.push((port, banner)),
                Ok(PortState::Filtered) => filtered += 1,
                Ok(PortState::Closed) => {}
                // A port that could not be probed counts as filtered
                Err(e) => {
                    filtered += 1;
                    unprobed.push((port, e));
                }
            }
        }
        open.sort_by_key(|(port, _)| *port);
        unprobed.sort_by_key(|(port, _)| *port);

        let risky: Vec<u16> = open
            .iter()
            .map(|(p, _)| *p)
            .filter(|p| RISKY_PORTS.contains(p))
            .collect();
        let risk_level = if !risky.is_empty() {
            "high"
        } else if open.len() > 5 {
            "medium"
        } else {
            "low"
        };

        let mut result = PartialResult::new(self.name(), 0.95)
            .with_field("ip", ip.to_string())
            .with_field("ports.scanned", self.ports.len())
            .with_field("ports.filtered", filtered)
            .with_field(
                "open_ports",
                crate::models::FieldValue::List(open.iter().map(|(p, _)| (*p as u64).into()).collect()),
            )
            .with_field(
                "services",
                open.iter()
                    .map(|(p, _)| format!("{}/{}", p, service_name(*p)))
                    .collect::<Vec<_>>(),
            )
            .with_field("risk_level", risk_level);

        let banners: Vec<String> = open
            .iter()
            .filter_map(|(p, b)| b.as_ref().map(|b| format!("{}: {}", p, b)))
            .collect();
        if !banners.is_empty() {
            result.set("banners", banners);
        }
        let hints = os_hints(&open);
        if !hints.is_empty() {
            result.set("os_hints", hints);
        }
        if !risky.is_empty() {
            result.set(
                "risky_ports",
                risky.iter().map(|p| format!("{}/{}", p, service_name(*p))).collect::<Vec<_>>(),
            );
            result.warn(format!("{} risky service(s) exposed", risky.len()));
        }
        if let Some((_, first)) = unprobed.first() {
            result.warn(format!("{} port(s) not probed: {}", unprobed.len(), first.message));
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiKeys;
    use crate::models::{ErrorKind, FieldValue};
    use crate::modules::testing::*;
    use crate::net::{AnonymityRouter, BucketConfig, RateLimiter, Transport};
    use tokio_util::sync::CancellationToken;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    fn ip_query(value: &str) -> Query {
        Query::new(QueryType::Ip, value).unwrap()
    }

    #[test]
    fn test_split_asn() {
        assert_eq!(
            split_asn("AS15169 Google LLC"),
            (Some("AS15169".into()), Some("Google LLC".into()))
        );
        assert_eq!(split_asn("AS13335"), (Some("AS13335".into()), None));
        assert_eq!(split_asn("Some ISP"), (None, Some("Some ISP".into())));
    }

    #[test]
    fn test_is_public() {
        assert!(is_public(&"8.8.8.8".parse().unwrap()));
        assert!(!is_public(&"192.168.1.1".parse().unwrap()));
        assert!(!is_public(&"127.0.0.1".parse().unwrap()));
        assert!(!is_public(&"fe80::1".parse().unwrap()));
        assert!(is_public(&"2001:4860:4860::8888".parse().unwrap()));
    }

    #[test]
    fn test_os_hints() {
        let open = vec![(22, Some("SSH-2.0-OpenSSH_8.9p1 Ubuntu-3".to_string())), (3389, None)];
        assert_eq!(os_hints(&open), vec!["Ubuntu Linux", "Windows"]);
    }

    #[tokio::test]
    async fn test_ipinfo_fields() {
        let mock = Arc::new(MockProvider::new().json(
            "ipinfo.io/8.8.8.8",
            200,
            json!({
                "ip": "8.8.8.8",
                "hostname": "dns.google",
                "city": "Mountain View",
                "region": "California",
                "country": "US",
                "loc": "37.4056,-122.0775",
                "org": "AS15169 Google LLC",
                "timezone": "America/Los_Angeles"
            }),
        ));
        let ctx = context(mock);

        let result = IpInfoModule.investigate(&ip_query("8.8.8.8"), &ctx).await.unwrap();

        assert_eq!(result.fields["asn"], FieldValue::from("AS15169"));
        assert_eq!(result.fields["org"], FieldValue::from("Google LLC"));
        assert_eq!(
            result.fields["location"],
            FieldValue::Coordinate(Coordinate { lat: 37.4056, lon: -122.0775 })
        );
    }

    #[tokio::test]
    async fn test_private_address_rejected() {
        let mock = Arc::new(MockProvider::new());
        let ctx = context(mock.clone());

        let err = IpApiModule.investigate(&ip_query("10.0.0.1"), &ctx).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidTarget);
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ip_api_fields() {
        let mock = Arc::new(MockProvider::new().json(
            "ip-api.com",
            200,
            json!({
                "status": "success",
                "country": "United States",
                "countryCode": "US",
                "regionName": "California",
                "city": "Mountain View",
                "lat": 37.386,
                "lon": -122.0838,
                "isp": "Google LLC",
                "as": "AS15169 Google LLC",
                "hosting": true
            }),
        ));
        let ctx = context(mock);

        let result = IpApiModule.investigate(&ip_query("8.8.8.8"), &ctx).await.unwrap();

        assert_eq!(result.fields["country"], FieldValue::from("US"));
        assert_eq!(result.fields["org"], FieldValue::from("Google LLC"));
        assert_eq!(result.fields["network.hosting"], FieldValue::Bool(true));
    }

    #[tokio::test]
    async fn test_hostname_target_is_resolved() {
        let mock = Arc::new(
            MockProvider::new()
                .json("dns.google", 200, json!({"Status": 0, "Answer": [{"type": 1, "data": "1.1.1.1"}]}))
                .json("ip-api.com/json/1.1.1.1", 200, json!({"status": "success", "countryCode": "AU"})),
        );
        let ctx = context(mock);

        let result = IpApiModule.investigate(&ip_query("one.one.one.one"), &ctx).await.unwrap();
        assert_eq!(result.fields["ip"], FieldValue::from("1.1.1.1"));
    }

    #[tokio::test]
    async fn test_port_scan_finds_open_port_and_banner() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let _ = socket.write_all(b"SSH-2.0-OpenSSH_9.6p1 Ubuntu-3ubuntu13\r\n").await;
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        });

        let closed_port = {
            let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
            probe.local_addr().unwrap().port()
        };

        let module = PortScanModule::new(Duration::from_secs(2)).with_ports(vec![open_port, closed_port]);
        let ctx = context(Arc::new(MockProvider::new()));

        let result = module.investigate(&ip_query("127.0.0.1"), &ctx).await.unwrap();

        assert_eq!(
            result.fields["open_ports"],
            FieldValue::List(vec![FieldValue::from(open_port as u64)])
        );
        let banners = result.fields["banners"].to_string();
        assert!(banners.contains("OpenSSH_9.6p1"));
        assert_eq!(result.fields["os_hints"], FieldValue::texts(["Ubuntu Linux"]));
        assert_eq!(result.fields["risk_level"], FieldValue::from("low"));
    }

    #[tokio::test]
    async fn test_port_scan_rate_limit_skips_ports_without_aborting() {
        let mut ports = Vec::new();
        for _ in 0..3 {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            ports.push(listener.local_addr().unwrap().port());
        }

        let limiter = RateLimiter::new(BucketConfig::default()).with_bucket(
            PORT_SCAN_BUCKET,
            BucketConfig::new(0.001, 1, Duration::from_millis(20)),
        );
        let router = AnonymityRouter::with_client(Transport::Direct, Arc::new(MockProvider::new()));
        let ctx = ScanContext::new(
            Arc::new(limiter),
            Arc::new(router),
            Arc::new(ApiKeys::default()),
            CancellationToken::new(),
        );
        let module = PortScanModule::new(Duration::from_secs(1)).with_ports(ports);

        let result = module.investigate(&ip_query("127.0.0.1"), &ctx).await.unwrap();

        assert_eq!(result.fields["ports.scanned"], FieldValue::from(3usize));
        assert_eq!(result.fields["ports.filtered"], FieldValue::from(2usize));
        assert!(result.warnings.iter().any(|w| w.starts_with("2 port(s) not probed")));
    }

    #[tokio::test]
    async fn test_port_scan_refuses_when_anonymity_required() {
        let ctx = context(Arc::new(MockProvider::new())).requiring_anonymity(true);
        let module = PortScanModule::new(Duration::from_millis(100));

        let err = module.investigate(&ip_query("127.0.0.1"), &ctx).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProviderUnavailable);
        assert!(!err.retryable);
    }
}
