//! Tunnel Engine
//!
//! The native engine is opaque to the backend: it receives a data-path
//! descriptor and protocol text, and hands back an integer handle. All
//! marshalling lives behind [`TunnelEngine`] so the lifecycle logic can be
//! driven by any implementation, including test doubles.

use std::os::fd::{OwnedFd, RawFd};

/// The four operations of the native tunnel engine
pub trait TunnelEngine: Send + Sync {
    /// Start a tunnel. The engine takes ownership of `tun`.
    ///
    /// Returns a non-negative handle on success, a negative code on failure.
    fn turn_on(&self, iface_name: &str, tun: OwnedFd, settings: &str) -> i32;

    /// Stop the tunnel behind `handle`. Must not be called twice per handle.
    fn turn_off(&self, handle: i32);

    /// The engine's own IPv4 transport socket
    fn socket_v4(&self, handle: i32) -> RawFd;

    /// The engine's own IPv6 transport socket
    fn socket_v6(&self, handle: i32) -> RawFd;

    /// Engine version string
    fn version(&self) -> String;
}

#[cfg(feature = "wg-go")]
pub use go::GoEngine;

#[cfg(feature = "wg-go")]
mod go {
    use super::TunnelEngine;
    use std::ffi::{CStr, CString, c_char, c_int};
    use std::os::fd::{IntoRawFd, OwnedFd, RawFd};
    use tracing::error;

    #[allow(non_snake_case)]
    #[link(name = "wg-go")]
    unsafe extern "C" {
        fn wgTurnOn(ifname: *const c_char, tun_fd: c_int, settings: *const c_char) -> c_int;
        fn wgTurnOff(handle: c_int);
        fn wgGetSocketV4(handle: c_int) -> c_int;
        fn wgGetSocketV6(handle: c_int) -> c_int;
        fn wgVersion() -> *mut c_char;
    }

    /// Engine backed by `libwg-go`
    #[derive(Debug, Default)]
    pub struct GoEngine;

    impl TunnelEngine for GoEngine {
        fn turn_on(&self, iface_name: &str, tun: OwnedFd, settings: &str) -> i32 {
            let (Ok(name), Ok(settings)) = (CString::new(iface_name), CString::new(settings)) else {
                error!("Interface name or settings contain a NUL byte");
                return -libc::EINVAL;
            };
            // The engine closes the descriptor, also on failure
            unsafe { wgTurnOn(name.as_ptr(), tun.into_raw_fd(), settings.as_ptr()) }
        }

        fn turn_off(&self, handle: i32) {
            unsafe { wgTurnOff(handle) }
        }

        fn socket_v4(&self, handle: i32) -> RawFd {
            unsafe { wgGetSocketV4(handle) }
        }

        fn socket_v6(&self, handle: i32) -> RawFd {
            unsafe { wgGetSocketV6(handle) }
        }

        fn version(&self) -> String {
            let ptr = unsafe { wgVersion() };
            if ptr.is_null() {
                return "unknown".to_string();
            }
            let version = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
            unsafe { libc::free(ptr.cast()) };
            version
        }
    }
}
