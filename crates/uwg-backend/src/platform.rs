//! Platform VPN Service
//!
//! The surrounding platform owns the virtual network device. It hands us a
//! service object once its process is up, and that object can build
//! devices and protect sockets from being routed into the tunnel.
//!
//! # Lifecycle
//!
//! ```text
//!  unset ──on_service_ready──▶ ready ──on_service_torn_down──▶ unset
//! ```
//!
//! [`ServiceBinding`] tracks this: it is completed at most once per service
//! lifetime and reset on teardown, so the next start produces a fresh wait.

use ipnet::IpNet;
use std::net::IpAddr;
use std::os::fd::{OwnedFd, RawFd};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Builder for the platform's virtual network device
pub trait DeviceBuilder: Send {
    /// Device produced by [`DeviceBuilder::establish`]
    type Device: TunDevice;

    /// Session name shown by the platform
    fn set_session(&mut self, name: &str);

    /// Action the platform offers to reconfigure the tunnel (opaque)
    fn set_configure_intent(&mut self, intent: &str);

    /// Exclude an application's traffic from the tunnel
    fn add_disallowed_application(&mut self, package: &str) -> Result<(), DeviceError>;

    /// Assign an address to the device
    fn add_address(&mut self, address: &IpNet) -> Result<(), DeviceError>;

    /// Push a DNS server
    fn add_dns_server(&mut self, server: IpAddr) -> Result<(), DeviceError>;

    /// Route a destination range through the device
    fn add_route(&mut self, route: &IpNet) -> Result<(), DeviceError>;

    /// Set the device MTU
    fn set_mtu(&mut self, mtu: u16) -> Result<(), DeviceError>;

    /// Blocking reads and writes on the data-path descriptor
    fn set_blocking(&mut self, blocking: bool);

    /// Create the device, or `None` if the platform refused
    fn establish(self) -> Option<Self::Device>;
}

/// An established virtual network device
///
/// Dropping the device releases the platform's handle.
pub trait TunDevice {
    /// Take ownership of the raw data-path descriptor
    fn detach_fd(self) -> OwnedFd;
}

/// The running platform VPN service
pub trait VpnService: Send + Sync + 'static {
    /// Builder for this platform's devices
    type Builder: DeviceBuilder;

    /// Open a fresh device builder
    fn builder(&self) -> Self::Builder;

    /// Exclude `socket` from the tunnel's routing. Returns `false` on failure.
    fn protect(&self, socket: RawFd) -> bool;
}

/// Asks the platform to start its VPN service process
pub trait ServiceStarter: Send + Sync {
    /// Fire-and-forget; readiness arrives through [`ServiceBinding::complete`]
    fn request_start(&self);
}

/// Readiness handle for the platform VPN service
pub struct ServiceBinding<S> {
    tx: watch::Sender<Option<Arc<S>>>,
}

impl<S: VpnService> ServiceBinding<S> {
    /// Create an unset binding
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Has the service reported ready in this lifetime?
    pub fn is_ready(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Mark the service ready. Only the first completion per lifetime
    /// takes effect; returns whether this call set it.
    pub fn complete(&self, service: Arc<S>) -> bool {
        let mut service = Some(service);
        let set = self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = service.take();
                true
            } else {
                false
            }
        });
        if set {
            debug!("Platform VPN service ready");
        }
        set
    }

    /// Forget the service after its process went away
    pub fn reset(&self) {
        self.tx.send_replace(None);
        debug!("Platform VPN service binding reset");
    }

    /// Wait up to `timeout` for the service
    pub async fn wait(&self, timeout: Duration) -> Option<Arc<S>> {
        let mut rx = self.tx.subscribe();
        let result = tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await;

        match result {
            Ok(Ok(service)) => service.clone(),
            _ => None,
        }
    }
}

impl<S: VpnService> Default for ServiceBinding<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Device creation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("Platform rejected {what}: {reason}")]
    Rejected { what: String, reason: String },

    #[error("Unable to create tun device")]
    NotEstablished,
}
