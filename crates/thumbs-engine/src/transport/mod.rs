//! Outbound HTTP client profiles.
//!
//! One [`TransportProfile`] is built at startup from the configured protocol
//! version, forward proxy and IP family, and shared read-only by every
//! resolution afterwards.

mod dns;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use reqwest::{Client, ClientBuilder, Proxy, redirect};
use thiserror::Error;
use tracing::{debug, info, warn};

use self::dns::FamilyResolver;

/// Errors raised while turning transport settings into a client.
///
/// All of them are configuration mistakes and abort startup.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid proxy URL {url:?}: {reason}")]
    InvalidProxy { url: String, reason: String },

    #[error("a forward proxy cannot be used with the HTTP/3 transport")]
    ProxyUnsupported,

    #[error("HTTP/3 transport is not available in this build (enable the `http3` feature)")]
    Http3Unavailable,

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

impl TransportError {
    pub fn invalid_proxy(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::InvalidProxy {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

/// Protocol spoken to the upstream image host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpVersion {
    #[default]
    Http1,
    Http2,
    Http3,
}

impl HttpVersion {
    /// Maps the numeric setting (`1`, `2`, `3`). Anything else selects
    /// HTTP/1.1.
    pub fn from_config(value: i64) -> Self {
        match value {
            1 => Self::Http1,
            2 => Self::Http2,
            3 => Self::Http3,
            other => {
                warn!(
                    http_client_ver = other,
                    "Unknown HTTP client version; falling back to HTTP/1.1"
                );
                Self::Http1
            }
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Http1 => "HTTP/1.1",
            Self::Http2 => "HTTP/2",
            Self::Http3 => "HTTP/3",
        })
    }
}

/// Address family every outbound dial is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpFamily {
    #[default]
    V4,
    V6,
}

impl IpFamily {
    pub fn from_ipv6_only(ipv6_only: bool) -> Self {
        if ipv6_only { Self::V6 } else { Self::V4 }
    }

    pub fn matches(&self, addr: &SocketAddr) -> bool {
        match self {
            Self::V4 => addr.is_ipv4(),
            Self::V6 => addr.is_ipv6(),
        }
    }

    /// Wildcard local address; binding it pins the socket family.
    pub fn unspecified(&self) -> IpAddr {
        match self {
            Self::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Self::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::V4 => "IPv4",
            Self::V6 => "IPv6",
        })
    }
}

/// Per-phase limits of a profile.
///
/// reqwest runs the TLS handshake inside the connect phase, so `dial`
/// bounds both; `tls_handshake` is kept for reporting. `response_header`
/// is enforced by the caller around `send()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTimeouts {
    pub dial: Duration,
    pub tls_handshake: Duration,
    pub response_header: Duration,
    pub idle: Duration,
    pub max_idle_per_host: usize,
    /// Blanket limit on a whole request. Only the QUIC profile sets it.
    pub request: Option<Duration>,
}

impl PhaseTimeouts {
    pub const TCP: Self = Self {
        dial: Duration::from_secs(30),
        tls_handshake: Duration::from_secs(10),
        response_header: Duration::from_secs(20),
        idle: Duration::from_secs(30),
        max_idle_per_host: 10,
        request: None,
    };

    pub const QUIC: Self = Self {
        dial: Duration::from_secs(10),
        tls_handshake: Duration::from_secs(10),
        response_header: Duration::from_secs(10),
        idle: Duration::from_secs(30),
        max_idle_per_host: 10,
        request: Some(Duration::from_secs(10)),
    };

    pub fn for_version(version: HttpVersion) -> Self {
        match version {
            HttpVersion::Http1 | HttpVersion::Http2 => Self::TCP,
            HttpVersion::Http3 => Self::QUIC,
        }
    }
}

/// Validated inputs of [`build_profile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportConfig {
    pub version: HttpVersion,
    pub proxy: Option<String>,
    pub ip_family: IpFamily,
}

impl TransportConfig {
    pub fn new(version: HttpVersion, proxy: Option<String>, ip_family: IpFamily) -> Self {
        Self {
            version,
            proxy: proxy.filter(|p| !p.trim().is_empty()),
            ip_family,
        }
    }

    /// Checks the combination without building anything.
    pub fn validate(&self) -> Result<(), TransportError> {
        if let Some(proxy) = &self.proxy {
            if self.version == HttpVersion::Http3 {
                return Err(TransportError::ProxyUnsupported);
            }
            parse_proxy(proxy)?;
        }
        if self.version == HttpVersion::Http3 && !cfg!(feature = "http3") {
            return Err(TransportError::Http3Unavailable);
        }
        Ok(())
    }

    pub fn build(&self) -> Result<TransportProfile, TransportError> {
        build_profile(self.version, self.proxy.as_deref(), self.ip_family)
    }
}

/// An immutable client plus the settings it was built from.
///
/// Cloning is cheap; the connection pool is shared.
#[derive(Debug, Clone)]
pub struct TransportProfile {
    version: HttpVersion,
    ip_family: IpFamily,
    proxied: bool,
    timeouts: PhaseTimeouts,
    client: Client,
}

impl TransportProfile {
    pub fn version(&self) -> HttpVersion {
        self.version
    }

    pub fn ip_family(&self) -> IpFamily {
        self.ip_family
    }

    pub fn is_proxied(&self) -> bool {
        self.proxied
    }

    pub fn timeouts(&self) -> &PhaseTimeouts {
        &self.timeouts
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Installs the process-wide rustls crypto provider exactly once.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

fn parse_proxy(proxy_url: &str) -> Result<Proxy, TransportError> {
    let url = url::Url::parse(proxy_url)
        .map_err(|e| TransportError::invalid_proxy(proxy_url, e))?;
    match url.scheme() {
        "http" | "https" | "socks5" | "socks5h" => {}
        other => {
            return Err(TransportError::invalid_proxy(
                proxy_url,
                format!("unsupported scheme {other:?}"),
            ));
        }
    }
    if url.host_str().is_none() {
        return Err(TransportError::invalid_proxy(proxy_url, "missing host"));
    }
    Proxy::all(url.as_str()).map_err(|e| TransportError::invalid_proxy(proxy_url, e))
}

/// Builds the client for one protocol version.
///
/// Redirects are never followed. TCP profiles dial only `ip_family`
/// addresses and honour `proxy_url`; the QUIC profile rejects a proxy.
pub fn build_profile(
    version: HttpVersion,
    proxy_url: Option<&str>,
    ip_family: IpFamily,
) -> Result<TransportProfile, TransportError> {
    let proxy_url = proxy_url.filter(|p| !p.trim().is_empty());
    TransportConfig::new(version, proxy_url.map(str::to_owned), ip_family).validate()?;

    install_rustls_provider();

    let timeouts = PhaseTimeouts::for_version(version);
    let client = match version {
        HttpVersion::Http1 => tcp_builder(&timeouts, proxy_url, ip_family)?
            .http1_only()
            .build()?,
        HttpVersion::Http2 => tcp_builder(&timeouts, proxy_url, ip_family)?.build()?,
        HttpVersion::Http3 => quic_client(&timeouts, ip_family)?,
    };

    info!(
        %version,
        %ip_family,
        proxied = proxy_url.is_some(),
        dial_timeout = ?timeouts.dial,
        tls_handshake_timeout = ?timeouts.tls_handshake,
        response_header_timeout = ?timeouts.response_header,
        "Upstream transport ready"
    );

    Ok(TransportProfile {
        version,
        ip_family,
        proxied: proxy_url.is_some(),
        timeouts,
        client,
    })
}

fn tcp_builder(
    timeouts: &PhaseTimeouts,
    proxy_url: Option<&str>,
    ip_family: IpFamily,
) -> Result<ClientBuilder, TransportError> {
    let builder = Client::builder()
        .use_rustls_tls()
        .redirect(redirect::Policy::none())
        .dns_resolver(Arc::new(FamilyResolver::new(ip_family)))
        .local_address(ip_family.unspecified())
        .connect_timeout(timeouts.dial)
        .pool_idle_timeout(timeouts.idle)
        .pool_max_idle_per_host(timeouts.max_idle_per_host);

    Ok(match proxy_url {
        Some(url) => builder.proxy(parse_proxy(url)?),
        None => builder.no_proxy(),
    })
}

#[cfg(feature = "http3")]
fn quic_client(timeouts: &PhaseTimeouts, ip_family: IpFamily) -> Result<Client, TransportError> {
    let mut builder = Client::builder()
        .use_rustls_tls()
        .http3_prior_knowledge()
        .redirect(redirect::Policy::none())
        .dns_resolver(Arc::new(FamilyResolver::new(ip_family)))
        .local_address(ip_family.unspecified())
        .no_proxy()
        .pool_idle_timeout(timeouts.idle)
        .pool_max_idle_per_host(timeouts.max_idle_per_host);
    if let Some(request) = timeouts.request {
        builder = builder.timeout(request);
    }
    Ok(builder.build()?)
}

#[cfg(not(feature = "http3"))]
fn quic_client(_timeouts: &PhaseTimeouts, _ip_family: IpFamily) -> Result<Client, TransportError> {
    Err(TransportError::Http3Unavailable)
}

/// Plain client for talking to the local VPN controller: no forward proxy,
/// no family restriction, 10 s limit per call.
pub fn build_control_client() -> Result<Client, TransportError> {
    install_rustls_provider();
    Ok(Client::builder()
        .use_rustls_tls()
        .no_proxy()
        .redirect(redirect::Policy::none())
        .timeout(Duration::from_secs(10))
        .build()?)
}
