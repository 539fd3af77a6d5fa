use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex as SyncMutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::{debug, info, warn};

use crate::config::ConfigStore;
use crate::control;
use crate::memo;
use crate::session::SessionTable;

/// Reads up to this many bytes per TUN iteration (§4.4).
const TUN_READ_SIZE: usize = 2000;

type TunWriter = Arc<AsyncMutex<WriteHalf<tun::AsyncDevice>>>;

/// Owns the TUN device, the primary UDP socket, the current primary peer,
/// and the two directional pumps. The only component that touches packet
/// bytes directly (§2, §4.4).
pub struct TunnelEngine {
    config: Arc<ConfigStore>,
    sessions: Arc<SessionTable>,
    socket: Arc<UdpSocket>,
    tun_write: Option<TunWriter>,
    local_ip: Ipv4Addr,
    primary_peer: SyncMutex<Option<SocketAddr>>,
    memo_path: Option<PathBuf>,
    stop: AtomicBool,
    shutdown: Notify,
    /// Serializes control-frame pushes. `push_control` is reachable from
    /// both the UDP receive task (heartbeat-driven peer change) and the
    /// config-reload task (`push_to_current_peer`); without this guard
    /// those two could interleave a header and fragments from two
    /// different frames on the wire (§5: "no other UDP send is
    /// interleaved into that sequence by the sending task").
    control_send_guard: AsyncMutex<()>,
}

impl TunnelEngine {
    /// `memo_path` is `None` when a fixed `-cli` peer was configured —
    /// the spec says fixed-peer mode disables memo persistence entirely.
    pub fn new(
        config: Arc<ConfigStore>,
        sessions: Arc<SessionTable>,
        socket: UdpSocket,
        tun: Option<tun::AsyncDevice>,
        local_ip: Ipv4Addr,
        memo_path: Option<PathBuf>,
        fixed_peer: Option<SocketAddr>,
    ) -> (Arc<Self>, Option<ReadHalf<tun::AsyncDevice>>) {
        let (tun_read, tun_write) = match tun {
            Some(device) => {
                let (read, write) = tokio::io::split(device);
                (Some(read), Some(Arc::new(AsyncMutex::new(write))))
            }
            None => (None, None),
        };

        let initial_peer = fixed_peer.or_else(|| memo_path.as_deref().and_then(memo::load));
        if let Some(peer) = initial_peer {
            info!(%peer, "resuming primary peer from memo");
        }

        let engine = Arc::new(Self {
            config,
            sessions,
            socket: Arc::new(socket),
            tun_write,
            local_ip,
            primary_peer: SyncMutex::new(initial_peer),
            memo_path,
            stop: AtomicBool::new(false),
            shutdown: Notify::new(),
            control_send_guard: AsyncMutex::new(()),
        });

        (engine, tun_read)
    }

    pub fn primary_peer(&self) -> Option<SocketAddr> {
        *self.primary_peer.lock()
    }

    pub fn has_tun(&self) -> bool {
        self.tun_write.is_some()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        self.shutdown.notify_waiters();
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Pushes a fresh control frame to whatever peer is currently primary.
    /// No-op if there is none yet. Used both after a heartbeat-driven peer
    /// change and after a config reload that changed dynamic state (§4.3).
    pub async fn push_to_current_peer(&self) {
        if let Some(peer) = self.primary_peer() {
            self.push_control(peer).await;
        }
    }

    async fn push_control(&self, peer: SocketAddr) {
        let snapshot = self.config.snapshot();
        let payload = control::encode_payload(&snapshot.intents, &snapshot.hosts);

        // Held for the whole header+fragments send so a concurrent push
        // from the other caller (heartbeat vs. reload) can't interleave.
        let _guard = self.control_send_guard.lock().await;
        if let Err(e) = control::push(&self.socket, peer, &payload, self.config.statics.mtu as usize).await {
            warn!(error = %e, %peer, "failed to push control frame");
        }
    }

    async fn handle_heartbeat(&self, src: SocketAddr) {
        let changed = {
            let mut guard = self.primary_peer.lock();
            match *guard {
                None => {
                    info!(peer = %src, "client init");
                    *guard = Some(src);
                    true
                }
                Some(prev) if prev != src => {
                    info!(old = %prev, new = %src, "peer changed");
                    *guard = Some(src);
                    true
                }
                Some(_) => false,
            }
        };

        if !changed {
            return;
        }

        if let Some(path) = &self.memo_path {
            if let Err(e) = memo::save(path, src) {
                warn!(error = %e, "failed to persist peer memo");
            }
        }

        self.push_control(src).await;
    }

    async fn handle_data_packet(&self, data: &[u8]) {
        let Some(dest) = extract_dest(data) else {
            return;
        };

        if let Some(secondary) = self.sessions.lookup(dest) {
            if let Err(e) = self.socket.send_to(data, secondary).await {
                warn!(error = %e, %secondary, "failed to forward to session peer");
            }
            return;
        }

        match &self.tun_write {
            Some(tun_write) => {
                let mut w = tun_write.lock().await;
                if let Err(e) = w.write_all(data).await {
                    warn!(error = %e, "failed to write data packet to TUN");
                }
            }
            None => debug!(%dest, "no TUN bound and no session match, dropping data packet"),
        }
    }

    /// UDP receive loop: classifies every inbound datagram as heartbeat,
    /// client-pushed config, or data, per §4.4's classification table.
    pub async fn run_udp_pump(self: Arc<Self>) {
        let mut buf = vec![0u8; 65536];
        loop {
            if self.stopping() {
                break;
            }

            let (n, src) = tokio::select! {
                _ = self.shutdown.notified() => break,
                res = self.socket.recv_from(&mut buf) => match res {
                    Ok(v) => v,
                    Err(e) => {
                        if self.stopping() {
                            break;
                        }
                        warn!(error = %e, "UDP receive error");
                        continue;
                    }
                },
            };

            if n == 1 && buf[0] == 0 {
                self.handle_heartbeat(src).await;
            } else if n > 1 && buf[0] == 1 {
                if let Err(e) = self.config.append_pushed_bytes(&buf[1..n]) {
                    warn!(error = %e, "failed to append client-pushed config");
                }
            } else {
                self.handle_data_packet(&buf[..n]).await;
            }
        }
        debug!("UDP receive pump stopped");
    }

    /// TUN read loop: loops packets addressed to `local_ip` back into the
    /// TUN, forwards everything else to the current primary peer (§4.4).
    pub async fn run_tun_pump(self: Arc<Self>, mut tun_read: ReadHalf<tun::AsyncDevice>) {
        let mut buf = BytesMut::zeroed(TUN_READ_SIZE);
        loop {
            if self.stopping() {
                break;
            }

            let n = tokio::select! {
                _ = self.shutdown.notified() => break,
                res = tun_read.read(&mut buf) => match res {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        if self.stopping() {
                            break;
                        }
                        warn!(error = %e, "TUN read error");
                        continue;
                    }
                },
            };

            let packet = &buf[..n];
            let Some(dest) = extract_dest(packet) else {
                continue;
            };

            if dest == self.local_ip {
                if let Some(tun_write) = &self.tun_write {
                    let mut w = tun_write.lock().await;
                    if let Err(e) = w.write_all(packet).await {
                        warn!(error = %e, "failed to loop packet back into TUN");
                    }
                }
                continue;
            }

            match self.primary_peer() {
                None => debug!(%dest, "no primary peer yet, dropping outbound packet"),
                Some(peer) => {
                    if let Err(e) = self.socket.send_to(packet, peer).await {
                        warn!(error = %e, %peer, "send to peer failed");
                    }
                }
            }
        }
        debug!("TUN read pump stopped");
    }
}

fn extract_dest(data: &[u8]) -> Option<Ipv4Addr> {
    if data.len() < 20 {
        return None;
    }
    Some(Ipv4Addr::new(data[16], data[17], data[18], data[19]))
}
