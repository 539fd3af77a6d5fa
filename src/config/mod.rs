pub mod parse;
pub mod watch;

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use ipnet::Ipv4Net;
use parking_lot::RwLock;
use tracing::warn;

use parse::ParseWarning;

/// A single container-subnet route. `expose` marks it as forwardable
/// through the accessor registration boundary (§4.7).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    pub subnet: Ipv4Net,
    pub expose: bool,
}

/// The reload-diffable part of the config: routes, iptables intents, and
/// the hosts blob. Rebuilt in full on every reload and swapped in under a
/// single lock (§3 ownership, §5 shared-resource policy).
#[derive(Debug, Clone, Default)]
pub struct DynamicState {
    pub routes: Vec<Route>,
    pub intents: HashMap<String, bool>,
    pub hosts: Vec<u8>,
}

/// Immutable startup parameters. Parsed once from CLI defaults overridden
/// by the config file's static directives; never touched again.
#[derive(Debug, Clone)]
pub struct StaticParams {
    pub addr: Ipv4Net,
    pub port: u16,
    pub host: Ipv4Addr,
    pub mtu: u16,
    pub bind: bool,
    pub tokens: HashMap<String, Ipv4Addr>,
    pub expose: Option<String>,
}

impl StaticParams {
    /// The network's first usable host: host portion zero, last octet `.1`.
    pub fn peer_ip(&self) -> Ipv4Addr {
        let net = self.addr.network().octets();
        Ipv4Addr::new(net[0], net[1], net[2], 1)
    }

    /// `peer_ip` with the last octet incremented by one.
    pub fn local_ip(&self) -> Ipv4Addr {
        let p = self.peer_ip().octets();
        Ipv4Addr::new(p[0], p[1], p[2], p[3] + 1)
    }

    /// The tunnel's own overlay CIDR, distinct from container subnets.
    pub fn subnet(&self) -> Ipv4Net {
        self.addr
    }
}

/// CLI-supplied defaults, used only to seed `StaticParams` when the config
/// file doesn't override them.
#[derive(Debug, Clone)]
pub struct Defaults {
    pub addr: Ipv4Net,
    pub port: u16,
    pub host: Ipv4Addr,
    pub bind: bool,
}

/// Result of a reload: what changed in the route set, and whether
/// anything dynamic changed at all (routes, intents, or hosts), which
/// gates a fresh control push to the current peer.
#[derive(Debug, Clone, Default)]
pub struct ReloadDelta {
    pub routes_added: Vec<Route>,
    pub routes_removed: Vec<Route>,
    pub changed: bool,
}

pub struct ConfigStore {
    path: PathBuf,
    pub statics: StaticParams,
    dynamic: RwLock<Arc<DynamicState>>,
}

impl ConfigStore {
    /// First load: a malformed static directive is fatal (the process
    /// can't safely guess at overlay addressing or bind parameters).
    pub fn load_initial(path: PathBuf, defaults: Defaults) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let (parsed, warnings) = parse::parse(&content);

        for w in &warnings {
            warn!(line = w.line_no, text = %w.line, "{}", w.message);
        }

        if let Some(fatal) = warnings.iter().find(|w| w.is_static) {
            anyhow::bail!(
                "malformed static directive at line {}: {}",
                fatal.line_no,
                fatal.message
            );
        }

        let statics = StaticParams {
            addr: parsed.addr.unwrap_or(defaults.addr),
            port: parsed.port.unwrap_or(defaults.port),
            host: parsed.host.unwrap_or(defaults.host),
            mtu: parsed.mtu.unwrap_or(1400),
            bind: parsed.bind.unwrap_or(defaults.bind),
            tokens: parsed.tokens,
            expose: parsed.expose,
        };

        let dynamic = DynamicState {
            routes: parsed.routes,
            intents: parsed.intents,
            hosts: parsed.hosts,
        };

        Ok(Self {
            path,
            statics,
            dynamic: RwLock::new(Arc::new(dynamic)),
        })
    }

    pub fn snapshot(&self) -> Arc<DynamicState> {
        self.dynamic.read().clone()
    }

    /// Reparses the config file, rebuilds the dynamic tables in full, and
    /// swaps them in under the write lock. Malformed static directives are
    /// logged and ignored (statics don't change live). Returns the route
    /// delta so the caller can install/remove host routes.
    pub fn reload(&self) -> Result<ReloadDelta> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read config file {}", self.path.display()))?;
        let (parsed, warnings) = parse::parse(&content);

        for w in &warnings {
            warn!(line = w.line_no, text = %w.line, "{}", w.message);
        }

        let new_state = DynamicState {
            routes: parsed.routes,
            intents: parsed.intents,
            hosts: parsed.hosts,
        };

        let old = self.dynamic.read().clone();
        let old_set: std::collections::HashSet<&Route> = old.routes.iter().collect();
        let new_set: std::collections::HashSet<&Route> = new_state.routes.iter().collect();

        let routes_added: Vec<Route> = new_set.difference(&old_set).map(|r| (*r).clone()).collect();
        let routes_removed: Vec<Route> = old_set.difference(&new_set).map(|r| (*r).clone()).collect();

        let changed = !routes_added.is_empty()
            || !routes_removed.is_empty()
            || old.intents != new_state.intents
            || old.hosts != new_state.hosts;

        *self.dynamic.write() = Arc::new(new_state);

        Ok(ReloadDelta {
            routes_added,
            routes_removed,
            changed,
        })
    }

    /// Appends bytes pushed by the in-VM client into the config pipeline.
    /// The bytes land at the end of the live config file; the ordinary
    /// file watcher then picks up the resulting write event and reloads
    /// through the normal debounced path.
    pub fn append_pushed_bytes(&self, bytes: &[u8]) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open config file {} for append", self.path.display()))?;
        file.write_all(bytes)
            .context("failed to append client-pushed config bytes")?;
        file.write_all(b"\n").context("failed to append trailing newline")?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_temp(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker-connector.conf");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        (dir, path)
    }

    fn defaults() -> Defaults {
        Defaults {
            addr: "192.168.251.1/24".parse().unwrap(),
            port: 2511,
            host: "127.0.0.1".parse().unwrap(),
            bind: true,
        }
    }

    #[test]
    fn derives_local_and_peer_ip() {
        let (_dir, path) = write_temp("addr 192.168.251.1/24\n");
        let store = ConfigStore::load_initial(path, defaults()).unwrap();
        assert_eq!(store.statics.peer_ip(), "192.168.251.1".parse::<Ipv4Addr>().unwrap());
        assert_eq!(store.statics.local_ip(), "192.168.251.2".parse::<Ipv4Addr>().unwrap());
        assert_ne!(store.statics.local_ip(), store.statics.peer_ip());
    }

    #[test]
    fn initial_load_fatal_on_malformed_static() {
        let (_dir, path) = write_temp("addr not-a-cidr\n");
        assert!(ConfigStore::load_initial(path, defaults()).is_err());
    }

    #[test]
    fn reload_computes_route_delta_and_flags_change() {
        let (_dir, path) = write_temp("route 172.17.0.0/16\n");
        let store = ConfigStore::load_initial(path.clone(), defaults()).unwrap();

        fs::write(&path, "route 172.17.0.0/16\nroute 172.20.0.0/16\niptables 10.0.1.0+10.0.2.0\n").unwrap();
        let delta = store.reload().unwrap();

        assert_eq!(delta.routes_added.len(), 1);
        assert_eq!(delta.routes_added[0].subnet.to_string(), "172.20.0.0/16");
        assert!(delta.routes_removed.is_empty());
        assert!(delta.changed);
    }

    #[test]
    fn reload_idempotence_yields_empty_delta() {
        let (_dir, path) = write_temp("route 172.17.0.0/16\niptables 10.0.1.0+10.0.2.0\n");
        let store = ConfigStore::load_initial(path.clone(), defaults()).unwrap();
        let delta = store.reload().unwrap();
        assert!(delta.routes_added.is_empty());
        assert!(delta.routes_removed.is_empty());
        assert!(!delta.changed);
    }

    #[test]
    fn append_pushed_bytes_lands_in_file() {
        let (_dir, path) = write_temp("addr 192.168.251.1/24\n");
        let store = ConfigStore::load_initial(path.clone(), defaults()).unwrap();
        store.append_pushed_bytes(b"route 172.21.0.0/16").unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("route 172.21.0.0/16"));
    }
}
