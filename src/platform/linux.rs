use std::net::Ipv4Addr;
use std::process::Command;

use anyhow::{bail, Context, Result};
use ipnet::Ipv4Net;
use tracing::{info, warn};

use super::{PlatformAdapter, RouteTracker};

const IFACE: &str = "dockerconn0";

/// Linux adapter used only for local development and CI — shipped
/// production hosts are always macOS or Windows (§1). Manages host
/// routes with `ip route`, the same shell-out-to-the-native-tool style
/// the teacher crate uses for its own Linux route management.
pub struct LinuxAdapter {
    routes: RouteTracker,
}

impl LinuxAdapter {
    pub fn new() -> Self {
        Self {
            routes: RouteTracker::new(),
        }
    }
}

impl Default for LinuxAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformAdapter for LinuxAdapter {
    fn open_tun(&self, local_ip: Ipv4Addr, peer_ip: Ipv4Addr, subnet: Ipv4Net, mtu: u16) -> Result<tun::AsyncDevice> {
        let mut config = tun::Configuration::default();
        config
            .name(IFACE)
            .address(local_ip)
            .destination(peer_ip)
            .netmask(subnet.netmask())
            .mtu(mtu as i32)
            .up();

        config.platform(|platform_config| {
            platform_config.packet_information(false);
        });

        let device = tun::create_as_async(&config).context("failed to create TUN device")?;
        info!(interface = IFACE, %local_ip, %peer_ip, "TUN device created");
        Ok(device)
    }

    fn add_route(&self, subnet: Ipv4Net) -> Result<()> {
        let output = Command::new("ip")
            .args(["route", "replace", &subnet.to_string(), "dev", IFACE])
            .output()
            .context("failed to execute ip(8)")?;

        if !output.status.success() {
            bail!(
                "route add {subnet} dev {IFACE} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        self.routes.track(subnet);
        info!(%subnet, interface = IFACE, "host route installed");
        Ok(())
    }

    fn del_route(&self, subnet: Ipv4Net) {
        match Command::new("ip")
            .args(["route", "del", &subnet.to_string(), "dev", IFACE])
            .output()
        {
            Ok(output) if output.status.success() => info!(%subnet, interface = IFACE, "host route removed"),
            Ok(output) => warn!(%subnet, stderr = %String::from_utf8_lossy(&output.stderr).trim(), "route delete reported failure"),
            Err(e) => warn!(error = %e, %subnet, "failed to execute ip(8) for removal"),
        }
        self.routes.untrack(subnet);
    }

    fn clear_routes(&self) {
        for subnet in self.routes.drain() {
            self.del_route(subnet);
        }
    }
}
