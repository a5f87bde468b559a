//! Proxy configuration.
//!
//! All inputs arrive on the command line. The upstream address is validated
//! up front so a malformed `--server` fails before any socket is opened.

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use thiserror::Error;

/// Command-line configuration for the proxy.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "tap-proxy",
    about = "Transparent TCP forwarding proxy with HTTP request inspection"
)]
pub struct Config {
    /// IP address to listen on.
    #[arg(long)]
    pub ip: IpAddr,

    /// Port to listen on.
    #[arg(long)]
    pub port: u16,

    /// Upstream server in `host:port` form.
    #[arg(long, value_name = "HOST:PORT")]
    pub server: UpstreamAddr,

    /// Reject requests whose target contains this substring with a 403.
    #[arg(long, value_name = "SUBSTRING")]
    pub block: Option<String>,

    /// Header to insert into forwarded requests, in `Name: Value` form.
    #[arg(long, value_name = "NAME: VALUE")]
    pub inject_header: Option<String>,

    /// Directory the final statistics report is written to.
    #[arg(long, default_value = "logs")]
    pub log_dir: PathBuf,

    /// Log level used when RUST_LOG is not set (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Upstream `host:port` pair.
///
/// The host may be an IP address or a DNS name; resolution happens per
/// session at connect time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamAddr {
    pub host: String,
    pub port: u16,
}

/// Error parsing an upstream `host:port` string.
#[derive(Debug, Error)]
pub enum UpstreamAddrError {
    #[error("upstream address must be in 'host:port' form")]
    MissingPort,
    #[error("upstream host is empty")]
    EmptyHost,
    #[error("'{0}' is not a valid port number")]
    InvalidPort(String),
}

impl FromStr for UpstreamAddr {
    type Err = UpstreamAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Split on the last colon so IPv6 hosts keep their inner colons.
        let (host, port) = s.rsplit_once(':').ok_or(UpstreamAddrError::MissingPort)?;
        if host.is_empty() {
            return Err(UpstreamAddrError::EmptyHost);
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| UpstreamAddrError::InvalidPort(port.to_string()))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for UpstreamAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
