//! uwg Backend - Userspace WireGuard Tunnel Lifecycle
//!
//! Runs a single userspace WireGuard tunnel on top of a platform VPN
//! service (which owns the virtual network device) and an opaque native
//! engine (which speaks the WireGuard protocol).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                         Backend                          │
//! │                                                          │
//! │  TunnelConfig ──▶ resolver ──▶ translator ──▶ settings ─┐ │
//! │       │                                                │ │
//! │       └──────▶ DeviceHandoff ──▶ tun fd ───────────────┤ │
//! │                     ▲                                  ▼ │
//! │              ┌──────┴──────┐                ┌──────────┐ │
//! │              │ VpnService  │◀── protect ────│  Engine  │ │
//! │              │ (platform)  │    sockets     │ (native) │ │
//! │              └─────────────┘                └──────────┘ │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Features
//!
//! - **Single active tunnel**: a second start request is a conflict
//! - **Deterministic protocol text**: interface keys first, then peers in order
//! - **Bounded platform wait**: 2 seconds by default, then a hard failure
//! - **Best-effort rollback**: a failed reconfiguration restores the old config once

mod backend;
mod config;
mod device;
mod engine;
mod keys;
mod platform;
mod resolver;
mod translator;
mod tunnel;

#[cfg(test)]
mod testing;

pub use backend::{Backend, BackendConfig, BackendError};
pub use config::{ConfigError, ConfigFormat, InetEndpoint, Interface, Peer, TunnelConfig};
pub use device::{DEFAULT_MTU, DataPathDescriptor, DeviceHandoff, effective_mtu};
pub use engine::TunnelEngine;
#[cfg(feature = "wg-go")]
pub use engine::GoEngine;
pub use keys::{KEY_LEN, Key, KeyError, base64_to_hex};
pub use platform::{DeviceBuilder, DeviceError, ServiceBinding, ServiceStarter, TunDevice, VpnService};
pub use resolver::{DEFAULT_CACHE_TTL, DnsResolver, EndpointResolver, ResolveError, ResolvedEndpoints, resolve_endpoints};
pub use translator::{ProtocolText, TranslationError, render};
pub use tunnel::{EngineHandle, Tunnel, TunnelState, TunnelStats};
