//! Tunnel Lifecycle Controller
//!
//! Drives a single userspace tunnel through its lifecycle:
//!
//! 1. Waits (bounded) for the platform VPN service
//! 2. Resolves endpoints and renders the config to protocol text
//! 3. Builds the device and hands its descriptor to the engine
//! 4. Protects the engine's own sockets from the tunnel
//!
//! At most one tunnel runs at a time. A request to start a second tunnel
//! fails with [`BackendError::Conflict`]; it never preempts the first.
//!
//! # Usage
//!
//! ```rust,ignore
//! let backend = Backend::new(GoEngine, starter, resolver, BackendConfig::default());
//!
//! // Platform callback once the VPN service process is up
//! backend.on_service_ready(service);
//!
//! let tunnel = Tunnel::new("home", config);
//! backend.set_state(&tunnel, TunnelState::Up).await?;
//! assert_eq!(backend.get_state(&tunnel), TunnelState::Up);
//! ```

use crate::config::TunnelConfig;
use crate::device::{DEFAULT_MTU, DeviceHandoff};
use crate::engine::TunnelEngine;
use crate::platform::{DeviceError, ServiceBinding, ServiceStarter, VpnService};
use crate::resolver::{self, EndpointResolver};
use crate::translator::{self, TranslationError};
use crate::tunnel::{EngineHandle, Tunnel, TunnelState, TunnelStats};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Backend settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// How long to wait for the platform VPN service (milliseconds)
    pub service_timeout_ms: u64,
    /// MTU used when a tunnel config has none
    pub default_mtu: u16,
    /// Opaque configure action handed to the platform device builder
    pub configure_intent: Option<String>,
}

impl BackendConfig {
    /// Platform service wait bound
    pub fn service_timeout(&self) -> Duration {
        Duration::from_millis(self.service_timeout_ms)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            service_timeout_ms: 2000,
            default_mtu: DEFAULT_MTU,
            configure_intent: None,
        }
    }
}

/// Backend errors
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Translation error: {0}")]
    Translation(#[from] TranslationError),

    #[error("Unable to start platform VPN service (no response after {timeout_ms}ms)")]
    PlatformUnavailable { timeout_ms: u64 },

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Unable to turn tunnel on (engine returned {code})")]
    EngineStart { code: i32 },

    #[error("Only one userspace tunnel can run at a time ({active} is up, {requested} requested)")]
    Conflict { active: String, requested: String },
}

impl BackendError {
    /// Stage of the transition that failed, for display
    pub fn stage(&self) -> &'static str {
        match self {
            BackendError::Configuration(_) => "config",
            BackendError::Translation(_) => "translation",
            BackendError::PlatformUnavailable { .. } => "platform-wait",
            BackendError::Device(_) => "device",
            BackendError::EngineStart { .. } => "engine-start",
            BackendError::Conflict { .. } => "conflict",
        }
    }
}

/// The running tunnel and its engine handle
#[derive(Debug, Clone)]
struct ActiveTunnel {
    name: String,
    handle: EngineHandle,
}

/// Userspace tunnel backend
pub struct Backend<E, S> {
    /// Native engine
    engine: E,
    /// Platform VPN service readiness
    binding: ServiceBinding<S>,
    /// Starts the platform service on demand
    starter: Box<dyn ServiceStarter>,
    /// Endpoint lookups
    resolver: Arc<dyn EndpointResolver>,
    /// Device construction
    handoff: DeviceHandoff,
    /// Settings
    config: BackendConfig,
    /// Serializes transitions
    transition: Mutex<()>,
    /// Running tunnel, if any
    active: RwLock<Option<ActiveTunnel>>,
}

impl<E: TunnelEngine, S: VpnService> Backend<E, S> {
    /// Create a backend
    pub fn new(
        engine: E,
        starter: impl ServiceStarter + 'static,
        resolver: Arc<dyn EndpointResolver>,
        config: BackendConfig,
    ) -> Self {
        let handoff = DeviceHandoff::new(config.configure_intent.clone(), config.default_mtu);

        Self {
            engine,
            binding: ServiceBinding::new(),
            starter: Box::new(starter),
            resolver,
            handoff,
            config,
            transition: Mutex::new(()),
            active: RwLock::new(None),
        }
    }

    /// Backend display name
    pub fn type_name(&self) -> &'static str {
        "Go userspace"
    }

    /// Engine version
    pub fn version(&self) -> String {
        self.engine.version()
    }

    /// Observed state of `tunnel`
    pub fn get_state(&self, tunnel: &Tunnel) -> TunnelState {
        match self.active_tunnel() {
            Some(active) if active.name == tunnel.name() => TunnelState::Up,
            _ => TunnelState::Down,
        }
    }

    /// Names of running tunnels (zero or one)
    pub fn enumerate(&self) -> BTreeSet<String> {
        self.active_tunnel()
            .map(|active| active.name)
            .into_iter()
            .collect()
    }

    /// Transfer statistics (not collected by this backend)
    pub fn statistics(&self, _tunnel: &Tunnel) -> TunnelStats {
        TunnelStats::default()
    }

    /// Platform callback: the VPN service process is up
    pub fn on_service_ready(&self, service: Arc<S>) -> bool {
        self.binding.complete(service)
    }

    /// Platform callback: the VPN service process went away
    ///
    /// Any running tunnel is brought down, then the binding is reset so the
    /// next start waits for a fresh service.
    pub async fn on_service_torn_down(&self) {
        let _guard = self.transition.lock().await;
        self.bring_down();
        self.binding.reset();
    }

    /// Move `tunnel` to `state`, returning the resulting state
    pub async fn set_state(&self, tunnel: &Tunnel, state: TunnelState) -> Result<TunnelState, BackendError> {
        let _guard = self.transition.lock().await;

        let original = self.get_state(tunnel);
        let target = state.resolve(original);
        if target == original {
            return Ok(original);
        }
        if target.is_up() {
            if let Some(active) = self.active_tunnel() {
                return Err(BackendError::Conflict {
                    active: active.name,
                    requested: tunnel.name().to_string(),
                });
            }
        }

        debug!("Changing tunnel {} to state {}", tunnel.name(), target);
        self.set_state_internal(tunnel, tunnel.config(), target).await?;
        Ok(self.get_state(tunnel))
    }

    /// Apply `config` to `tunnel`, restarting it if it is running
    ///
    /// If the new config fails to come up, the old one is brought back up
    /// once (best effort) and the original failure is returned.
    pub async fn apply_config(&self, tunnel: &Tunnel, config: TunnelConfig) -> Result<TunnelConfig, BackendError> {
        let _guard = self.transition.lock().await;

        if self.get_state(tunnel).is_up() {
            self.set_state_internal(tunnel, tunnel.config(), TunnelState::Down).await?;

            if let Err(e) = self.set_state_internal(tunnel, Some(&config), TunnelState::Up).await {
                warn!("New configuration for {} failed ({}), restoring previous", tunnel.name(), e);
                if let Err(rollback) = self.set_state_internal(tunnel, tunnel.config(), TunnelState::Up).await {
                    error!("Unable to restore previous configuration for {}: {}", tunnel.name(), rollback);
                }
                return Err(e);
            }
        }

        Ok(config)
    }

    async fn set_state_internal(
        &self,
        tunnel: &Tunnel,
        config: Option<&TunnelConfig>,
        state: TunnelState,
    ) -> Result<(), BackendError> {
        if state.is_up() {
            self.bring_up(tunnel, config).await
        } else {
            self.bring_down();
            Ok(())
        }
    }

    async fn bring_up(&self, tunnel: &Tunnel, config: Option<&TunnelConfig>) -> Result<(), BackendError> {
        info!("Bringing tunnel {} up", tunnel.name());

        let config = config.ok_or_else(|| {
            BackendError::Configuration("Trying to bring up a tunnel with no config".to_string())
        })?;

        let service = self.service().await?;

        if self.active_tunnel().is_some() {
            warn!("Tunnel already up");
            return Ok(());
        }

        let endpoints = resolver::resolve_endpoints(config, self.resolver.as_ref())
            .await
            .map_err(TranslationError::from)?;
        let settings = translator::render(config, &endpoints)?;

        let tun = self.handoff.establish(service.as_ref(), tunnel.name(), config)?;

        debug!("Go backend v{}", self.engine.version());
        let code = self.engine.turn_on(tunnel.name(), tun, settings.as_str());
        let handle = EngineHandle::from_raw(code)
            .ok_or(BackendError::EngineStart { code })?;

        self.set_active(Some(ActiveTunnel {
            name: tunnel.name().to_string(),
            handle,
        }));

        for socket in [self.engine.socket_v4(handle.raw()), self.engine.socket_v6(handle.raw())] {
            if !service.protect(socket) {
                warn!("Unable to protect engine socket {}", socket);
            }
        }

        info!("Tunnel {} is up", tunnel.name());
        Ok(())
    }

    fn bring_down(&self) {
        info!("Bringing tunnel down");

        let Some(active) = self.take_active() else {
            warn!("Tunnel already down");
            return;
        };

        self.engine.turn_off(active.handle.raw());
        info!("Tunnel {} is down", active.name);
    }

    /// Wait for the platform service, asking the platform to start it first
    async fn service(&self) -> Result<Arc<S>, BackendError> {
        if !self.binding.is_ready() {
            debug!("Requesting to start VpnService");
            self.starter.request_start();
        }

        let timeout = self.config.service_timeout();
        self.binding.wait(timeout).await.ok_or(BackendError::PlatformUnavailable {
            timeout_ms: self.config.service_timeout_ms,
        })
    }

    fn active_tunnel(&self) -> Option<ActiveTunnel> {
        self.active.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_active(&self, active: Option<ActiveTunnel>) {
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = active;
    }

    fn take_active(&self) -> Option<ActiveTunnel> {
        self.active.write().unwrap_or_else(PoisonError::into_inner).take()
    }
}
