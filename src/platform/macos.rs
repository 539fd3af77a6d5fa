use std::net::Ipv4Addr;
use std::process::Command;

use anyhow::{bail, Context, Result};
use ipnet::Ipv4Net;
use parking_lot::Mutex;
use tracing::{info, warn};

use super::{PlatformAdapter, RouteTracker};

/// macOS adapter: provisions a `utunN` device via the `tun` crate and
/// manages host routes with `route(8)`, the same shell-out-to-the-native-
/// tool style the teacher crate uses for `ip`/`iptables` on Linux.
pub struct MacAdapter {
    routes: RouteTracker,
    iface_name: Mutex<Option<String>>,
}

impl MacAdapter {
    pub fn new() -> Self {
        Self {
            routes: RouteTracker::new(),
            iface_name: Mutex::new(None),
        }
    }

    fn iface(&self) -> Result<String> {
        self.iface_name
            .lock()
            .clone()
            .context("TUN device has not been opened yet")
    }
}

impl Default for MacAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformAdapter for MacAdapter {
    fn open_tun(&self, local_ip: Ipv4Addr, peer_ip: Ipv4Addr, subnet: Ipv4Net, mtu: u16) -> Result<tun::AsyncDevice> {
        let mut config = tun::Configuration::default();
        config
            .address(local_ip)
            .destination(peer_ip)
            .netmask(subnet.netmask())
            .mtu(mtu as i32)
            .up();

        let device = tun::create_as_async(&config).context("failed to create TUN device")?;
        let name = device
            .get_ref()
            .name()
            .context("failed to read assigned TUN interface name")?;
        info!(interface = %name, %local_ip, %peer_ip, "TUN device created");
        *self.iface_name.lock() = Some(name);
        Ok(device)
    }

    fn add_route(&self, subnet: Ipv4Net) -> Result<()> {
        let iface = self.iface()?;
        let output = Command::new("route")
            .args(["-n", "add", "-net", &subnet.to_string(), "-interface", &iface])
            .output()
            .context("failed to execute route(8)")?;

        if !output.status.success() {
            bail!(
                "route add {subnet} via {iface} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        self.routes.track(subnet);
        info!(%subnet, interface = %iface, "host route installed");
        Ok(())
    }

    fn del_route(&self, subnet: Ipv4Net) {
        let iface = match self.iface() {
            Ok(i) => i,
            Err(e) => {
                warn!(error = %e, %subnet, "skipping route removal, no TUN interface bound");
                return;
            }
        };
        match Command::new("route")
            .args(["-n", "delete", "-net", &subnet.to_string(), "-interface", &iface])
            .output()
        {
            Ok(output) if output.status.success() => info!(%subnet, interface = %iface, "host route removed"),
            Ok(output) => warn!(%subnet, stderr = %String::from_utf8_lossy(&output.stderr).trim(), "route delete reported failure"),
            Err(e) => warn!(error = %e, %subnet, "failed to execute route(8) for removal"),
        }
        self.routes.untrack(subnet);
    }

    fn clear_routes(&self) {
        for subnet in self.routes.drain() {
            self.del_route(subnet);
        }
    }
}
