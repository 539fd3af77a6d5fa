use std::net::Ipv4Addr;
use std::process::Command;

use anyhow::{bail, Context, Result};
use ipnet::Ipv4Net;
use parking_lot::Mutex;
use tracing::{info, warn};

use super::{PlatformAdapter, RouteTracker};

/// Windows adapter: provisions a Wintun-backed device via the `tun` crate
/// and manages host routes with `netsh interface ipv4 add/delete route`.
pub struct WindowsAdapter {
    routes: RouteTracker,
    iface_name: Mutex<Option<String>>,
}

impl WindowsAdapter {
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

impl Default for WindowsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformAdapter for WindowsAdapter {
    fn open_tun(&self, local_ip: Ipv4Addr, peer_ip: Ipv4Addr, subnet: Ipv4Net, mtu: u16) -> Result<tun::AsyncDevice> {
        let mut config = tun::Configuration::default();
        config
            .name("docker-connector")
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
        let output = Command::new("netsh")
            .args([
                "interface",
                "ipv4",
                "add",
                "route",
                &subnet.to_string(),
                &format!("interface={iface}"),
                "store=active",
            ])
            .output()
            .context("failed to execute netsh")?;

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
        match Command::new("netsh")
            .args([
                "interface",
                "ipv4",
                "delete",
                "route",
                &subnet.to_string(),
                &format!("interface={iface}"),
            ])
            .output()
        {
            Ok(output) if output.status.success() => info!(%subnet, interface = %iface, "host route removed"),
            Ok(output) => warn!(%subnet, stderr = %String::from_utf8_lossy(&output.stderr).trim(), "route delete reported failure"),
            Err(e) => warn!(error = %e, %subnet, "failed to execute netsh for removal"),
        }
        self.routes.untrack(subnet);
    }

    fn clear_routes(&self) {
        for subnet in self.routes.drain() {
            self.del_route(subnet);
        }
    }
}
