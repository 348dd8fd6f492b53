//! Recording test doubles for the engine, platform and resolver seams.

use crate::config::InetEndpoint;
use crate::engine::TunnelEngine;
use crate::platform::{DeviceBuilder, DeviceError, ServiceStarter, TunDevice, VpnService};
use crate::resolver::{EndpointResolver, ResolveError};
use async_trait::async_trait;
use ipnet::IpNet;
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::net::{IpAddr, SocketAddr};
use std::os::fd::{OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Socket numbers the fake engine reports
pub const FAKE_SOCKET_V4: RawFd = 1000;
pub const FAKE_SOCKET_V6: RawFd = 1001;

/// Everything the backend did to one device builder
#[derive(Debug, Clone, Default)]
pub struct DeviceRecord {
    pub session: Option<String>,
    pub configure_intent: Option<String>,
    pub disallowed: Vec<String>,
    pub addresses: Vec<IpNet>,
    pub dns: Vec<IpAddr>,
    pub routes: Vec<IpNet>,
    pub mtu: Option<u16>,
    pub blocking: bool,
    pub established: bool,
}

#[derive(Default)]
struct ServiceShared {
    devices: Mutex<Vec<DeviceRecord>>,
    protected: Mutex<Vec<RawFd>>,
    refuse: AtomicBool,
    refuse_protect: AtomicBool,
    reject_routes: AtomicBool,
}

/// Platform service that records builders and protected sockets
#[derive(Clone, Default)]
pub struct FakeService {
    shared: Arc<ServiceShared>,
}

impl FakeService {
    /// Make `establish` return no device
    pub fn refuse_establish(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Make `protect` report failure
    pub fn refuse_protect(&self, refuse: bool) {
        self.shared.refuse_protect.store(refuse, Ordering::SeqCst);
    }

    /// Make `add_route` fail
    pub fn reject_routes(&self, reject: bool) {
        self.shared.reject_routes.store(reject, Ordering::SeqCst);
    }

    /// Builders that reached `establish`
    pub fn devices(&self) -> Vec<DeviceRecord> {
        self.shared.devices.lock().unwrap().clone()
    }

    /// Sockets passed to `protect`
    pub fn protected(&self) -> Vec<RawFd> {
        self.shared.protected.lock().unwrap().clone()
    }
}

impl VpnService for FakeService {
    type Builder = FakeBuilder;

    fn builder(&self) -> FakeBuilder {
        FakeBuilder {
            shared: self.shared.clone(),
            record: DeviceRecord::default(),
        }
    }

    fn protect(&self, socket: RawFd) -> bool {
        self.shared.protected.lock().unwrap().push(socket);
        !self.shared.refuse_protect.load(Ordering::SeqCst)
    }
}

pub struct FakeBuilder {
    shared: Arc<ServiceShared>,
    record: DeviceRecord,
}

impl DeviceBuilder for FakeBuilder {
    type Device = FakeDevice;

    fn set_session(&mut self, name: &str) {
        self.record.session = Some(name.to_string());
    }

    fn set_configure_intent(&mut self, intent: &str) {
        self.record.configure_intent = Some(intent.to_string());
    }

    fn add_disallowed_application(&mut self, package: &str) -> Result<(), DeviceError> {
        self.record.disallowed.push(package.to_string());
        Ok(())
    }

    fn add_address(&mut self, address: &IpNet) -> Result<(), DeviceError> {
        self.record.addresses.push(*address);
        Ok(())
    }

    fn add_dns_server(&mut self, server: IpAddr) -> Result<(), DeviceError> {
        self.record.dns.push(server);
        Ok(())
    }

    fn add_route(&mut self, route: &IpNet) -> Result<(), DeviceError> {
        if self.shared.reject_routes.load(Ordering::SeqCst) {
            return Err(DeviceError::Rejected {
                what: format!("route {}", route),
                reason: "bad address".to_string(),
            });
        }
        self.record.routes.push(*route);
        Ok(())
    }

    fn set_mtu(&mut self, mtu: u16) -> Result<(), DeviceError> {
        self.record.mtu = Some(mtu);
        Ok(())
    }

    fn set_blocking(&mut self, blocking: bool) {
        self.record.blocking = blocking;
    }

    fn establish(mut self) -> Option<FakeDevice> {
        let refused = self.shared.refuse.load(Ordering::SeqCst);
        self.record.established = !refused;
        self.shared.devices.lock().unwrap().push(self.record);

        if refused {
            return None;
        }
        let fd = File::open("/dev/null").expect("open /dev/null");
        Some(FakeDevice { fd: fd.into() })
    }
}

pub struct FakeDevice {
    fd: OwnedFd,
}

impl TunDevice for FakeDevice {
    fn detach_fd(self) -> OwnedFd {
        self.fd
    }
}

/// Counts platform start requests
#[derive(Clone, Default)]
pub struct FakeStarter {
    requests: Arc<AtomicUsize>,
}

impl FakeStarter {
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl ServiceStarter for FakeStarter {
    fn request_start(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct EngineLog {
    turn_on: Vec<(String, String)>,
    turn_off: Vec<i32>,
    failures: VecDeque<i32>,
    next_handle: i32,
}

/// Engine that records calls and hands out increasing handles
#[derive(Clone, Default)]
pub struct FakeEngine {
    log: Arc<Mutex<EngineLog>>,
}

impl FakeEngine {
    /// Queue failure codes for the next `turn_on` calls
    pub fn fail_turn_on(&self, codes: &[i32]) {
        self.log.lock().unwrap().failures.extend(codes);
    }

    /// `(iface_name, settings)` of every `turn_on` call
    pub fn turn_on_calls(&self) -> Vec<(String, String)> {
        self.log.lock().unwrap().turn_on.clone()
    }

    /// Handles passed to `turn_off`
    pub fn turn_off_calls(&self) -> Vec<i32> {
        self.log.lock().unwrap().turn_off.clone()
    }
}

impl TunnelEngine for FakeEngine {
    fn turn_on(&self, iface_name: &str, _tun: OwnedFd, settings: &str) -> i32 {
        let mut log = self.log.lock().unwrap();
        log.turn_on.push((iface_name.to_string(), settings.to_string()));

        if let Some(code) = log.failures.pop_front() {
            return code;
        }
        let handle = log.next_handle;
        log.next_handle += 1;
        handle
    }

    fn turn_off(&self, handle: i32) {
        self.log.lock().unwrap().turn_off.push(handle);
    }

    fn socket_v4(&self, _handle: i32) -> RawFd {
        FAKE_SOCKET_V4
    }

    fn socket_v6(&self, _handle: i32) -> RawFd {
        FAKE_SOCKET_V6
    }

    fn version(&self) -> String {
        "0.0.0-fake".to_string()
    }
}

/// Resolver with a fixed host table
#[derive(Default)]
pub struct StaticResolver {
    hosts: HashMap<String, IpAddr>,
    lookups: AtomicUsize,
}

impl StaticResolver {
    pub fn with_host(mut self, host: &str, addr: IpAddr) -> Self {
        self.hosts.insert(host.to_string(), addr);
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EndpointResolver for StaticResolver {
    async fn resolve(&self, endpoint: &InetEndpoint) -> Result<SocketAddr, ResolveError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.hosts.get(endpoint.host())
            .map(|ip| SocketAddr::new(*ip, endpoint.port()))
            .ok_or_else(|| ResolveError::NoAddresses(endpoint.host().to_string()))
    }
}
