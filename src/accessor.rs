use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::routing::{delete, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{info, warn};

use crate::session::SessionTable;

#[derive(Debug, Deserialize)]
struct Registration {
    dest_ip: Ipv4Addr,
    secondary_addr: SocketAddr,
}

/// Starts the thin registration boundary the out-of-core accessor
/// subsystem writes session entries through (§4.7). This listener performs
/// no authentication, no fan-out, and no multi-client arbitration of its
/// own — it only ever writes into the shared `SessionTable`; everything
/// else about "exposing" the tunnel to third parties stays the external
/// accessor's responsibility, per the Non-goals in §1.
pub async fn spawn(listen_addr: &str, sessions: Arc<SessionTable>) -> Result<()> {
    let addr: SocketAddr = listen_addr
        .parse()
        .with_context(|| format!("invalid expose address '{listen_addr}'"))?;

    let app = Router::new()
        .route("/sessions", post(register))
        .route("/sessions/{dest_ip}", delete(unregister))
        .layer(RequestBodyLimitLayer::new(4096))
        .with_state(sessions);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind accessor listener on {addr}"))?;
    info!(%addr, "accessor registration boundary listening");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "accessor listener exited");
        }
    });

    Ok(())
}

async fn register(State(sessions): State<Arc<SessionTable>>, Json(body): Json<Registration>) -> &'static str {
    sessions.register(body.dest_ip, body.secondary_addr);
    "ok"
}

async fn unregister(State(sessions): State<Arc<SessionTable>>, Path(dest_ip): Path<Ipv4Addr>) -> &'static str {
    sessions.unregister(dest_ip);
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listener_binds_on_an_ephemeral_port() {
        let sessions = Arc::new(SessionTable::new());
        spawn("127.0.0.1:0", sessions).await.unwrap();
    }

    #[test]
    fn registration_deserializes_from_json() {
        let body = r#"{"dest_ip":"1.2.3.4","secondary_addr":"127.0.0.1:9000"}"#;
        let reg: Registration = serde_json::from_str(body).unwrap();
        assert_eq!(reg.dest_ip, "1.2.3.4".parse::<Ipv4Addr>().unwrap());
        assert_eq!(reg.secondary_addr, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
    }
}
