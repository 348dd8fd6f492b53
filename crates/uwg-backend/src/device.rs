//! Device Handoff
//!
//! Builds the platform's virtual network device from a tunnel config and
//! hands its data-path descriptor over to the caller, who passes it on to
//! the engine.
//!
//! Routes come from the peers' allowed IPs, not from the interface
//! addresses, so only the tunneled ranges go through the device.

use crate::config::TunnelConfig;
use crate::platform::{DeviceBuilder, DeviceError, TunDevice, VpnService};
use std::os::fd::OwnedFd;
use tracing::debug;

/// IPv6 minimum MTU; safe for any transport
pub const DEFAULT_MTU: u16 = 1280;

/// Raw read/write channel of the virtual network device
pub type DataPathDescriptor = OwnedFd;

/// MTU to configure: the interface's value, or `default` if unset or zero
pub fn effective_mtu(config: &TunnelConfig, default: u16) -> u16 {
    config.interface.mtu
        .filter(|&mtu| mtu != 0)
        .unwrap_or(default)
}

/// Device handoff coordinator
#[derive(Debug, Clone)]
pub struct DeviceHandoff {
    /// Opaque configure action handed to the platform
    configure_intent: Option<String>,
    /// MTU used when the config has none
    default_mtu: u16,
}

impl DeviceHandoff {
    /// Create a coordinator
    pub fn new(configure_intent: Option<String>, default_mtu: u16) -> Self {
        Self {
            configure_intent,
            default_mtu,
        }
    }

    /// Build and establish the device for `name`, returning its descriptor
    ///
    /// The platform's device handle is released before this returns, on
    /// every path.
    pub fn establish<S: VpnService>(
        &self,
        service: &S,
        name: &str,
        config: &TunnelConfig,
    ) -> Result<DataPathDescriptor, DeviceError> {
        let mut builder = service.builder();
        builder.set_session(name);

        if let Some(ref intent) = self.configure_intent {
            builder.set_configure_intent(intent);
        }

        let iface = &config.interface;
        for app in &iface.excluded_applications {
            builder.add_disallowed_application(app)?;
        }
        for address in &iface.addresses {
            builder.add_address(address)?;
        }
        for dns in &iface.dns {
            builder.add_dns_server(*dns)?;
        }
        for peer in &config.peers {
            for route in &peer.allowed_ips {
                builder.add_route(route)?;
            }
        }

        let mtu = effective_mtu(config, self.default_mtu);
        builder.set_mtu(mtu)?;
        builder.set_blocking(true);

        let device = builder.establish().ok_or(DeviceError::NotEstablished)?;
        debug!("Established tun device for {} (mtu {})", name, mtu);

        Ok(device.detach_fd())
    }
}

impl Default for DeviceHandoff {
    fn default() -> Self {
        Self::new(None, DEFAULT_MTU)
    }
}
