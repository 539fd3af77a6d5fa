#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "windows")]
mod windows;

#[cfg(target_os = "linux")]
pub use linux::LinuxAdapter as NativeAdapter;
#[cfg(target_os = "macos")]
pub use macos::MacAdapter as NativeAdapter;
#[cfg(target_os = "windows")]
pub use windows::WindowsAdapter as NativeAdapter;

use std::collections::HashSet;
use std::net::Ipv4Addr;

use anyhow::Result;
use ipnet::Ipv4Net;
use parking_lot::Mutex;

/// The thin side-effect boundary for TUN provisioning and host route
/// management (§4.2). Selected at compile time per target OS; the tunnel
/// engine only ever talks to this trait, never to `std::process::Command`
/// or the `tun` crate directly.
pub trait PlatformAdapter: Send + Sync + 'static {
    /// Creates a point-to-point TUN assigned `local_ip`/`peer_ip` inside
    /// `subnet`, with its MTU set to the configured tunnel MTU.
    fn open_tun(&self, local_ip: Ipv4Addr, peer_ip: Ipv4Addr, subnet: Ipv4Net, mtu: u16) -> Result<tun::AsyncDevice>;

    /// Installs a host route for `subnet` pointing at the TUN. Tracks the
    /// route so `clear_routes` can undo only what this process owns.
    fn add_route(&self, subnet: Ipv4Net) -> Result<()>;

    /// Removes the host route for `subnet`. A missing route is not an
    /// error (§4.2).
    fn del_route(&self, subnet: Ipv4Net);

    /// Removes every route this adapter has installed during the
    /// process's lifetime.
    fn clear_routes(&self);
}

/// Bookkeeping shared by every platform adapter: which subnets this
/// process has installed a host route for, so shutdown and reload only
/// ever touch routes this process owns (§4.2, §3 invariants).
#[derive(Default)]
pub struct RouteTracker {
    installed: Mutex<HashSet<Ipv4Net>>,
}

impl RouteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, subnet: Ipv4Net) {
        self.installed.lock().insert(subnet);
    }

    pub fn untrack(&self, subnet: Ipv4Net) {
        self.installed.lock().remove(&subnet);
    }

    /// Drains and returns every tracked subnet, leaving the tracker empty.
    pub fn drain(&self) -> Vec<Ipv4Net> {
        self.installed.lock().drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_tracker_drains_only_what_it_tracked() {
        let tracker = RouteTracker::new();
        let a: Ipv4Net = "172.17.0.0/16".parse().unwrap();
        let b: Ipv4Net = "172.18.0.0/16".parse().unwrap();

        tracker.track(a);
        tracker.track(b);
        tracker.untrack(a);

        let mut drained = tracker.drain();
        drained.sort();
        assert_eq!(drained, vec![b]);
        assert!(tracker.drain().is_empty());
    }
}
