//! WireGuard Key Encoding
//!
//! Keys travel in two encodings: base64 in user-facing configuration and
//! lowercase hex in the engine's control protocol. This module converts
//! between them and provides X25519 key generation.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use std::fmt;

/// Length of every WireGuard key in bytes
pub const KEY_LEN: usize = 32;

/// A raw 32-byte Curve25519 key (private, public or preshared)
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Key {
    bytes: [u8; KEY_LEN],
}

impl Key {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Decode from base64 (the user-facing encoding)
    pub fn from_base64(s: &str) -> Result<Self, KeyError> {
        let bytes = BASE64.decode(s.trim())
            .map_err(|_| KeyError::InvalidBase64)?;
        Self::from_slice(&bytes)
    }

    /// Decode from hex (the engine-facing encoding)
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s.trim())
            .map_err(|_| KeyError::InvalidHex)?;
        Self::from_slice(&bytes)
    }

    fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; KEY_LEN] = bytes.try_into()
            .map_err(|_| KeyError::InvalidLength(bytes.len()))?;
        Ok(Self::from_bytes(bytes))
    }

    /// Generate a new random private key (clamped)
    pub fn generate_private() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        Self::from_bytes(secret.to_bytes())
    }

    /// Generate a random preshared key
    pub fn generate_preshared() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self::from_bytes(bytes)
    }

    /// Derive the public key, treating this key as a private key
    pub fn public_key(&self) -> Self {
        let secret = StaticSecret::from(self.bytes);
        Self::from_bytes(X25519Public::from(&secret).to_bytes())
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Encode as base64
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.bytes)
    }

    /// Encode as lowercase hex
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key([redacted])")
    }
}

/// Convert a base64 key straight to its hex form
pub fn base64_to_hex(s: &str) -> Result<String, KeyError> {
    Key::from_base64(s).map(|k| k.to_hex())
}

/// Key parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("Invalid base64 encoding")]
    InvalidBase64,

    #[error("Invalid hex encoding")]
    InvalidHex,

    #[error("Invalid key length ({0} bytes, expected 32)")]
    InvalidLength(usize),
}
