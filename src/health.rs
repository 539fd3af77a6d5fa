use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::ConfigStore;
use crate::engine::TunnelEngine;
use crate::session::SessionTable;

/// How often the health line is logged (§4.6).
const HEALTH_INTERVAL: Duration = Duration::from_secs(30);

/// Read-only periodic summary: current primary peer, route count, intent
/// count, session table size. Touches no mutable state of its own.
pub async fn run(engine: Arc<TunnelEngine>, config: Arc<ConfigStore>, sessions: Arc<SessionTable>) {
    let mut interval = tokio::time::interval(HEALTH_INTERVAL);
    interval.tick().await; // first tick fires immediately, skip it

    loop {
        interval.tick().await;
        let snapshot = config.snapshot();
        let peer = engine
            .primary_peer()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "none".to_string());

        info!(
            peer = %peer,
            routes = snapshot.routes.len(),
            intents = snapshot.intents.len(),
            sessions = sessions.len(),
            "health"
        );
    }
}
