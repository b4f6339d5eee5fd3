//! Command-line and environment configuration.
//!
//! Every setting can be given as a flag or through the environment (a
//! `.env` file is loaded first). [`AppConfig::validate`] turns the raw
//! values into a [`RuntimeConfig`]; nothing is built before it succeeds.

use std::path::PathBuf;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use thumbs_engine::{HealthMonitorConfig, HttpVersion, IpFamily, TransportConfig};
use vid_codec::{SECRET_KEY_LEN, SecretKey};

use crate::logging::DEFAULT_LOG_FILTER;
use crate::{Error, Result};

#[derive(Parser, Debug, Clone)]
#[command(name = "thumbs", version, about = "Thumbnail proxy for opaque video ids", long_about = None)]
pub struct AppConfig {
    /// Serve HTTP over TCP
    #[arg(
        long = "http",
        env = "ENABLE_HTTP",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub enable_http: bool,

    /// Serve HTTP over a Unix domain socket
    #[arg(
        long = "uds",
        env = "ENABLE_UDS",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub enable_uds: bool,

    /// Unix socket path
    #[arg(short = 's', long = "uds-path", env = "UDS_PATH", default_value = "/tmp/http-ytproxy.sock")]
    pub uds_path: PathBuf,

    /// Listen address
    #[arg(short = 'l', long = "host", env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Listen port
    #[arg(short = 'p', long = "port", env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Forward proxy for upstream requests, e.g. http://127.0.0.1:8090
    #[arg(long = "proxy", alias = "pr", env = "PROXY")]
    pub proxy: Option<String>,

    /// Upstream HTTP version: 1, 2 or 3
    #[arg(
        long = "http-client-ver",
        env = "HTTP_CLIENT_VER",
        default_value_t = 1,
        allow_negative_numbers = true
    )]
    pub http_client_ver: i64,

    /// Dial upstreams over IPv6 only (IPv4 only otherwise)
    #[arg(
        long = "ipv6-only",
        env = "IPV6_ONLY",
        default_value_t = false,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub ipv6_only: bool,

    /// gluetun control server, host:port
    #[arg(long = "gluetun-api", env = "GLUETUN_API", default_value = "127.0.0.1:8000")]
    pub gluetun_api: String,

    /// Watch egress throughput and rotate the VPN IP when it collapses
    #[arg(
        long = "block-checker",
        env = "BLOCK_CHECKER",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub block_checker: bool,

    /// Seconds between block checks
    #[arg(long = "block-checker-cooldown", env = "BLOCK_CHECKER_COOLDOWN", default_value_t = 60)]
    pub block_checker_cooldown: u64,

    /// 16-byte key shared with the id issuer
    #[arg(long = "secret-key", env = "SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Add X-LiteSpeed-Cache-Control to image responses
    #[arg(
        long = "enable-litespeed-cache",
        env = "ENABLE_LITESPEED_CACHE",
        default_value_t = false,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub enable_litespeed_cache: bool,

    /// tracing filter directive
    #[arg(long = "log-filter", env = "RUST_LOG", default_value = DEFAULT_LOG_FILTER)]
    pub log_filter: String,
}

/// Where the server accepts connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenConfig {
    /// `host:port` when TCP is enabled.
    pub tcp: Option<(String, u16)>,
    pub uds: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    pub controller: String,
    pub config: HealthMonitorConfig,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub listen: ListenConfig,
    pub transport: TransportConfig,
    pub secret_key: SecretKey,
    /// `None` when the block checker is disabled.
    pub monitor: Option<MonitorSettings>,
    pub litespeed_cache: bool,
}

impl AppConfig {
    pub fn validate(&self) -> Result<RuntimeConfig> {
        let secret_key = self
            .secret_key
            .as_deref()
            .filter(|key| key.len() == SECRET_KEY_LEN)
            .and_then(|key| SecretKey::new(key).ok())
            .ok_or_else(|| {
                Error::config("The value of 'SECRET_KEY' needs to be exactly 16 characters.")
            })?;

        if !self.enable_http && !self.enable_uds {
            return Err(Error::config(
                "Both the HTTP and the Unix socket listeners are disabled",
            ));
        }
        if self.enable_uds && self.uds_path.as_os_str().is_empty() {
            return Err(Error::config("UDS_PATH must not be empty"));
        }

        let transport = TransportConfig::new(
            HttpVersion::from_config(self.http_client_ver),
            self.proxy.clone(),
            IpFamily::from_ipv6_only(self.ipv6_only),
        );
        transport.validate()?;

        let monitor = if self.block_checker {
            if self.block_checker_cooldown == 0 {
                return Err(Error::config("BLOCK_CHECKER_COOLDOWN must be at least 1 second"));
            }
            Some(MonitorSettings {
                controller: self.gluetun_api.clone(),
                config: HealthMonitorConfig::default()
                    .with_cooldown(Duration::from_secs(self.block_checker_cooldown)),
            })
        } else {
            None
        };

        Ok(RuntimeConfig {
            listen: ListenConfig {
                tcp: self.enable_http.then(|| (self.host.clone(), self.port)),
                uds: self.enable_uds.then(|| self.uds_path.clone()),
            },
            transport,
            secret_key,
            monitor,
            litespeed_cache: self.enable_litespeed_cache,
        })
    }
}
