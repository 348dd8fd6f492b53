//! Config Translator
//!
//! Serializes a [`TunnelConfig`] into the engine's line-oriented control
//! protocol, one `key=value` per line:
//!
//! ```text
//! replace_peers=true
//! private_key=<hex>
//! listen_port=<port>
//! public_key=<hex>            (per peer, in config order)
//! preshared_key=<hex>
//! endpoint=<ip:port>
//! persistent_keepalive_interval=<secs>
//! allowed_ip=<cidr>           (one per range, in list order)
//! ```
//!
//! The order is part of the engine's contract. Rendering is pure: endpoint
//! lookups happen beforehand (see [`crate::resolver`]).

use crate::config::{InetEndpoint, TunnelConfig};
use crate::keys::{self, KeyError};
use crate::resolver::{ResolveError, ResolvedEndpoints};
use std::fmt::{self, Write as _};

/// Keys whose values are secret
const SECRET_KEYS: &[&str] = &["private_key", "preshared_key"];

/// Rendered control-protocol text
#[derive(Clone, PartialEq, Eq)]
pub struct ProtocolText(String);

impl ProtocolText {
    /// Full text, ready for the engine
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over `(key, value)` pairs
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.lines().filter_map(|line| line.split_once('='))
    }

    /// Copy of the text with secret values hidden, for display and logs
    pub fn redacted(&self) -> String {
        let mut out = String::with_capacity(self.0.len());
        for line in self.0.lines() {
            match line.split_once('=') {
                Some((key, _)) if SECRET_KEYS.contains(&key) => {
                    let _ = writeln!(out, "{}=(hidden)", key);
                }
                _ => {
                    let _ = writeln!(out, "{}", line);
                }
            }
        }
        out
    }
}

impl fmt::Debug for ProtocolText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProtocolText").field(&self.redacted()).finish()
    }
}

/// Line builder for the control protocol
struct Writer {
    out: String,
}

impl Writer {
    fn new() -> Self {
        Self { out: String::with_capacity(512) }
    }

    fn line(&mut self, key: &str, value: impl fmt::Display) {
        // Writing to a String cannot fail
        let _ = writeln!(self.out, "{}={}", key, value);
    }

    fn finish(self) -> ProtocolText {
        ProtocolText(self.out)
    }
}

/// Render `config` into protocol text
///
/// Every endpoint in `config` must have an entry in `endpoints`.
pub fn render(
    config: &TunnelConfig,
    endpoints: &ResolvedEndpoints,
) -> Result<ProtocolText, TranslationError> {
    let mut w = Writer::new();

    w.line("replace_peers", "true");

    let iface = &config.interface;
    if let Some(ref key) = iface.private_key {
        w.line("private_key", hex_key("private_key", None, key)?);
    }
    if iface.listen_port != 0 {
        w.line("listen_port", iface.listen_port);
    }

    for (index, peer) in config.peers.iter().enumerate() {
        if let Some(ref key) = peer.public_key {
            w.line("public_key", hex_key("public_key", Some(index), key)?);
        }
        if let Some(ref key) = peer.preshared_key {
            w.line("preshared_key", hex_key("preshared_key", Some(index), key)?);
        }
        if let Some(ref endpoint) = peer.endpoint {
            let addr = endpoints.get(endpoint)
                .ok_or_else(|| TranslationError::UnresolvedEndpoint(endpoint.clone()))?;
            w.line("endpoint", addr);
        }
        if peer.persistent_keepalive != 0 {
            w.line("persistent_keepalive_interval", peer.persistent_keepalive);
        }
        for allowed in &peer.allowed_ips {
            w.line("allowed_ip", allowed);
        }
    }

    Ok(w.finish())
}

fn hex_key(field: &'static str, peer: Option<usize>, value: &str) -> Result<String, TranslationError> {
    keys::base64_to_hex(value)
        .map_err(|source| TranslationError::InvalidKey { field, peer, source })
}

fn peer_suffix(peer: &Option<usize>) -> String {
    peer.map(|i| format!(" for peer {}", i)).unwrap_or_default()
}

/// Translation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum TranslationError {
    #[error("Invalid {field}{}: {source}", peer_suffix(.peer))]
    InvalidKey {
        field: &'static str,
        peer: Option<usize>,
        #[source]
        source: KeyError,
    },

    #[error("Endpoint {0} was not resolved")]
    UnresolvedEndpoint(InetEndpoint),

    #[error("Endpoint resolution failed: {0}")]
    Resolve(#[from] ResolveError),
}
