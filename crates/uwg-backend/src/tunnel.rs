//! Tunnel Identity
//!
//! A tunnel is a name plus the configuration the caller currently holds
//! for it. The backend only reads it; whether it is running is decided by
//! the backend's own record of the active engine handle.

use crate::config::TunnelConfig;
use std::fmt;

/// Desired or observed tunnel state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TunnelState {
    /// Tunnel is not running
    Down,
    /// Tunnel is running
    Up,
    /// Request only: flip the current state
    Toggle,
}

impl TunnelState {
    /// Resolve a requested state against the current observed one
    ///
    /// `Toggle` becomes the opposite of `current`; anything else is kept.
    pub fn resolve(self, current: TunnelState) -> TunnelState {
        match self {
            TunnelState::Toggle if current == TunnelState::Up => TunnelState::Down,
            TunnelState::Toggle => TunnelState::Up,
            other => other,
        }
    }

    /// Check if this is the running state
    pub fn is_up(&self) -> bool {
        matches!(self, TunnelState::Up)
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TunnelState::Down => "DOWN",
            TunnelState::Up => "UP",
            TunnelState::Toggle => "TOGGLE",
        };
        f.write_str(s)
    }
}

/// A named tunnel and its current configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tunnel {
    name: String,
    config: Option<TunnelConfig>,
}

impl Tunnel {
    /// Create a tunnel with a configuration
    pub fn new(name: impl Into<String>, config: TunnelConfig) -> Self {
        Self {
            name: name.into(),
            config: Some(config),
        }
    }

    /// Create a tunnel whose configuration has not been loaded
    pub fn without_config(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: None,
        }
    }

    /// Tunnel name (also used as the interface and session name)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current configuration, if loaded
    pub fn config(&self) -> Option<&TunnelConfig> {
        self.config.as_ref()
    }

    /// Replace the configuration, e.g. after a successful apply
    pub fn set_config(&mut self, config: TunnelConfig) {
        self.config = Some(config);
    }
}

/// Opaque handle of a running engine tunnel
///
/// Always non-negative; the engine signals failure with a negative return
/// value, which never becomes a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineHandle(i32);

impl EngineHandle {
    /// Wrap an engine return value, rejecting failure codes
    pub fn from_raw(raw: i32) -> Option<Self> {
        (raw >= 0).then_some(Self(raw))
    }

    /// Raw value to pass back to the engine
    pub fn raw(&self) -> i32 {
        self.0
    }
}

/// Transfer statistics
///
/// The userspace backend does not collect these; the value is always empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunnelStats {
    /// Bytes received from peers
    pub rx_bytes: u64,
    /// Bytes sent to peers
    pub tx_bytes: u64,
}
