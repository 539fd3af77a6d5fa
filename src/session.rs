use std::net::{Ipv4Addr, SocketAddr};

use dashmap::DashMap;

/// Maps a destination IPv4 to a secondary UDP peer. Populated by the
/// accessor registration boundary (§4.7); read by the tunnel engine's UDP
/// demultiplexer on every inbound data packet. Read-mostly, so a
/// concurrent map avoids contending the primary receive loop against
/// registration writes (§4.5, §5 shared-resource policy).
#[derive(Debug, Default)]
pub struct SessionTable {
    entries: DashMap<Ipv4Addr, SocketAddr>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, dest: Ipv4Addr) -> Option<SocketAddr> {
        self.entries.get(&dest).map(|entry| *entry)
    }

    pub fn register(&self, dest: Ipv4Addr, secondary: SocketAddr) {
        self.entries.insert(dest, secondary);
    }

    pub fn unregister(&self, dest: Ipv4Addr) {
        self.entries.remove(&dest);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_lookup_redirects() {
        let table = SessionTable::new();
        let dest: Ipv4Addr = "1.2.3.4".parse().unwrap();
        let secondary: SocketAddr = "127.0.0.1:9000".parse().unwrap();

        assert_eq!(table.lookup(dest), None);
        table.register(dest, secondary);
        assert_eq!(table.lookup(dest), Some(secondary));
    }

    #[test]
    fn unregister_removes_entry() {
        let table = SessionTable::new();
        let dest: Ipv4Addr = "1.2.3.4".parse().unwrap();
        table.register(dest, "127.0.0.1:9000".parse().unwrap());
        table.unregister(dest);
        assert_eq!(table.lookup(dest), None);
    }
}
