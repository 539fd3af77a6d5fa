use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use ipnet::Ipv4Net;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::accessor;
use crate::args::Args;
use crate::config::{ConfigStore, Defaults};
use crate::engine::TunnelEngine;
use crate::health;
use crate::memo;
use crate::platform::{NativeAdapter, PlatformAdapter};
use crate::session::SessionTable;

/// Owns the startup and shutdown sequence (§4.6): builds every component,
/// wires the config watcher and accessor listener in, and tears everything
/// down in response to a single shutdown signal.
pub async fn run(args: Args) -> Result<()> {
    let addr: Ipv4Net = args.addr.parse().with_context(|| format!("invalid -addr '{}'", args.addr))?;
    let defaults = Defaults {
        addr,
        port: args.port,
        host: args.host,
        bind: args.bind,
    };

    let config_path = args.resolved_config_path();
    let config = Arc::new(
        ConfigStore::load_initial(config_path.clone(), defaults).context("failed to load initial configuration")?,
    );

    let adapter: Arc<NativeAdapter> = Arc::new(NativeAdapter::new());
    let local_ip = config.statics.local_ip();
    let peer_ip = config.statics.peer_ip();
    let subnet = config.statics.subnet();

    let tun = if config.statics.bind {
        let device = adapter
            .open_tun(local_ip, peer_ip, subnet, config.statics.mtu)
            .context("failed to provision TUN device")?;
        Some(device)
    } else {
        info!("bind is disabled, running without a TUN device");
        None
    };

    for route in &config.snapshot().routes {
        if let Err(e) = adapter.add_route(route.subnet) {
            warn!(error = %e, subnet = %route.subnet, "failed to install initial route");
        }
    }

    let bind_addr = SocketAddr::new(config.statics.host.into(), config.statics.port);
    let socket = UdpSocket::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind UDP socket on {bind_addr}"))?;
    info!(%bind_addr, "UDP socket bound");

    let sessions = Arc::new(SessionTable::new());

    let fixed_peer: Option<SocketAddr> = match &args.cli {
        Some(raw) => Some(raw.parse().with_context(|| format!("invalid -cli '{raw}'"))?),
        None => None,
    };
    let memo_path = if fixed_peer.is_some() { None } else { Some(memo::default_path()) };

    let (engine, tun_read) = TunnelEngine::new(
        config.clone(),
        sessions.clone(),
        socket,
        tun,
        local_ip,
        memo_path,
        fixed_peer,
    );

    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(engine.clone().run_udp_pump()));
    if let Some(tun_read) = tun_read {
        tasks.push(tokio::spawn(engine.clone().run_tun_pump(tun_read)));
    }
    tasks.push(tokio::spawn(health::run(engine.clone(), config.clone(), sessions.clone())));

    let expose_addr = config.statics.expose.clone().or_else(|| args.expose.clone());
    if let Some(listen_addr) = expose_addr {
        accessor::spawn(&listen_addr, sessions.clone())
            .await
            .context("failed to start accessor registration boundary")?;
    }

    let _watcher = if args.watch {
        match crate::config::watch::spawn(&config_path) {
            Ok((watcher, mut reload_rx)) => {
                let config = config.clone();
                let adapter = adapter.clone();
                let engine = engine.clone();
                tokio::spawn(async move {
                    while reload_rx.recv().await.is_some() {
                        match config.reload() {
                            Ok(delta) => {
                                for route in &delta.routes_removed {
                                    adapter.del_route(route.subnet);
                                }
                                for route in &delta.routes_added {
                                    if let Err(e) = adapter.add_route(route.subnet) {
                                        warn!(error = %e, subnet = %route.subnet, "failed to install reloaded route");
                                    }
                                }
                                if delta.changed {
                                    engine.push_to_current_peer().await;
                                }
                                info!("configuration reloaded");
                            }
                            Err(e) => warn!(error = %e, "config reload failed"),
                        }
                    }
                });
                Some(watcher)
            }
            Err(e) => {
                warn!(error = %e, "failed to start config watcher, hot reload disabled");
                None
            }
        }
    } else {
        None
    };

    let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel::<()>();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .context("failed to install signal handler")?;
    shutdown_rx.recv().await;

    info!("shutdown requested");
    engine.request_stop();
    adapter.clear_routes();

    for task in tasks {
        task.abort();
    }

    Ok(())
}
