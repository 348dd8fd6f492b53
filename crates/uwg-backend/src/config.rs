//! Tunnel Configuration
//!
//! The structured, immutable description of a tunnel: one `[interface]`
//! section and an ordered list of `[[peer]]` sections. Keys are kept in
//! their user-facing base64 form; they are only decoded when the config is
//! validated or translated into protocol text.
//!
//! # Example (TOML)
//!
//! ```toml
//! [interface]
//! private_key = "yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk="
//! listen_port = 51820
//! addresses = ["10.0.0.2/32"]
//! dns = ["1.1.1.1"]
//!
//! [[peer]]
//! public_key = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg="
//! endpoint = "vpn.example.com:51820"
//! persistent_keepalive = 25
//! allowed_ips = ["0.0.0.0/0"]
//! ```

use crate::keys::{Key, KeyError};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::str::FromStr;

/// Peer endpoint as written by the user (`host:port`)
///
/// The host may be a hostname or an IP literal; IPv6 literals are written
/// in brackets (`[fd00::1]:51820`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InetEndpoint {
    host: String,
    port: u16,
}

impl InetEndpoint {
    /// Create a new endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Host part (hostname or IP literal, without brackets)
    pub fn host(&self) -> &str {
        &self.host
    }

    /// UDP port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Socket address if the host is an IP literal, without any lookup
    pub fn literal(&self) -> Option<SocketAddr> {
        self.host.parse::<IpAddr>().ok().map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl fmt::Display for InetEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for InetEndpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidEndpoint(s.to_string());

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, port) = rest.split_once("]:").ok_or_else(invalid)?;
            host.parse::<std::net::Ipv6Addr>().map_err(|_| invalid())?;
            (host, port)
        } else {
            let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
            if host.contains(':') {
                return Err(invalid());
            }
            (host, port)
        };

        if host.is_empty() {
            return Err(invalid());
        }
        let port: u16 = port.parse().map_err(|_| invalid())?;

        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for InetEndpoint {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<InetEndpoint> for String {
    fn from(endpoint: InetEndpoint) -> Self {
        endpoint.to_string()
    }
}

/// Local interface section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Interface {
    /// Private key (base64)
    pub private_key: Option<String>,
    /// UDP listen port (0 = let the engine pick)
    pub listen_port: u16,
    /// Device MTU (unset or 0 = platform default)
    pub mtu: Option<u16>,
    /// Addresses assigned to the device
    pub addresses: Vec<IpNet>,
    /// DNS servers pushed to the platform
    pub dns: Vec<IpAddr>,
    /// Applications whose traffic bypasses the tunnel
    pub excluded_applications: Vec<String>,
}

/// Remote peer section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Peer {
    /// Peer's public key (base64)
    pub public_key: Option<String>,
    /// Preshared key (base64)
    pub preshared_key: Option<String>,
    /// Where to reach the peer
    pub endpoint: Option<InetEndpoint>,
    /// Persistent keepalive interval in seconds (0 = off)
    pub persistent_keepalive: u16,
    /// Destination ranges routed to this peer
    pub allowed_ips: Vec<IpNet>,
}

/// Complete tunnel configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Interface section
    #[serde(default)]
    pub interface: Interface,
    /// Peers, in file order
    #[serde(default, rename = "peer")]
    pub peers: Vec<Peer>,
}

/// Supported config file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Pick the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let ext = path.extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match ext {
            "toml" => Ok(ConfigFormat::Toml),
            "json" => Ok(ConfigFormat::Json),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl TunnelConfig {
    /// Load from a file, choosing the format by extension
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_str_with(&content, format)
    }

    /// Load from a string in the given format
    pub fn from_str_with(content: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        match format {
            ConfigFormat::Toml => Self::from_toml(content),
            ConfigFormat::Json => Self::from_json(content),
        }
    }

    /// Load from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from JSON string
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Export as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Export as JSON
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Endpoints of all peers that have one, in peer order
    pub fn endpoints(&self) -> impl Iterator<Item = &InetEndpoint> {
        self.peers.iter().filter_map(|p| p.endpoint.as_ref())
    }

    /// Check that every key present decodes to a 32-byte key
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref key) = self.interface.private_key {
            check_key("private_key", key)?;
        }

        for peer in &self.peers {
            if let Some(ref key) = peer.public_key {
                check_key("public_key", key)?;
            }
            if let Some(ref key) = peer.preshared_key {
                check_key("preshared_key", key)?;
            }
        }

        Ok(())
    }
}

fn check_key(field: &'static str, value: &str) -> Result<(), ConfigError> {
    Key::from_base64(value)
        .map(|_| ())
        .map_err(|source| ConfigError::InvalidKey { field, source })
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported config format: {0:?}")]
    UnsupportedFormat(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid {field}: {source}")]
    InvalidKey {
        field: &'static str,
        #[source]
        source: KeyError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [interface]
        private_key = "yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk="
        listen_port = 51820
        addresses = ["10.0.0.2/32", "fd00::2/128"]
        dns = ["1.1.1.1"]
        excluded_applications = ["com.example.bank"]

        [[peer]]
        public_key = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg="
        endpoint = "vpn.example.com:51820"
        persistent_keepalive = 25
        allowed_ips = ["0.0.0.0/0", "::/0"]

        [[peer]]
        public_key = "TrMvSoP4jYQlY6RIzBgbssQqY3vxI2Pi+y71lOWWXX0="
        allowed_ips = ["192.168.4.0/24"]
    "#;

    #[test]
    fn test_endpoint_parse() {
        let ep: InetEndpoint = "vpn.example.com:51820".parse().unwrap();
        assert_eq!(ep.host(), "vpn.example.com");
        assert_eq!(ep.port(), 51820);
        assert!(ep.literal().is_none());

        let ep: InetEndpoint = "10.0.0.1:51820".parse().unwrap();
        assert_eq!(ep.literal(), Some("10.0.0.1:51820".parse().unwrap()));
    }

    #[test]
    fn test_endpoint_ipv6() {
        let ep: InetEndpoint = "[fd00::1]:51820".parse().unwrap();
        assert_eq!(ep.host(), "fd00::1");
        assert_eq!(ep.to_string(), "[fd00::1]:51820");
        assert_eq!(ep.literal(), Some("[fd00::1]:51820".parse().unwrap()));
    }

    #[test]
    fn test_endpoint_invalid() {
        assert!("no-port".parse::<InetEndpoint>().is_err());
        assert!(":51820".parse::<InetEndpoint>().is_err());
        assert!("host:99999".parse::<InetEndpoint>().is_err());
        assert!("fd00::1:51820".parse::<InetEndpoint>().is_err());
    }

    #[test]
    fn test_from_toml() {
        let config = TunnelConfig::from_toml(SAMPLE).unwrap();

        assert_eq!(config.interface.listen_port, 51820);
        assert_eq!(config.interface.mtu, None);
        assert_eq!(config.interface.addresses.len(), 2);
        assert_eq!(config.interface.excluded_applications, vec!["com.example.bank"]);
        assert_eq!(config.peers.len(), 2);
        assert_eq!(config.peers[0].persistent_keepalive, 25);
        assert_eq!(config.peers[1].endpoint, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_matches_toml() {
        let config = TunnelConfig::from_toml(SAMPLE).unwrap();
        let json = config.to_json().unwrap();

        assert_eq!(TunnelConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("home.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = TunnelConfig::from_file(&path).unwrap();
        assert_eq!(config.endpoints().count(), 1);

        let bad = dir.path().join("home.conf");
        std::fs::write(&bad, SAMPLE).unwrap();
        assert!(matches!(
            TunnelConfig::from_file(&bad),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_validate_bad_key() {
        let mut config = TunnelConfig::from_toml(SAMPLE).unwrap();
        config.peers[1].preshared_key = Some("short".to_string());

        match config.validate() {
            Err(ConfigError::InvalidKey { field, .. }) => assert_eq!(field, "preshared_key"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
