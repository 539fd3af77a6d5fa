use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error};

/// Grace period a config-file event sits quiet before a reload fires.
/// Mirrors the debounce shape used by similar file-watching daemons: the
/// timer is re-armed on every qualifying event and only elapses once
/// nothing new has arrived for the full window.
const DEBOUNCE: Duration = Duration::from_secs(2);

/// Watches the parent directory of `config_path` (non-recursive) and
/// emits a debounced reload signal whenever the config file itself is
/// written to or renamed. The returned watcher must be kept alive for the
/// life of the process; dropping it stops delivery.
pub fn spawn(config_path: &Path) -> Result<(RecommendedWatcher, mpsc::Receiver<()>)> {
    let config_path = config_path
        .canonicalize()
        .with_context(|| format!("failed to canonicalize {}", config_path.display()))?;
    let parent = config_path
        .parent()
        .with_context(|| format!("config path {} has no parent directory", config_path.display()))?
        .to_path_buf();

    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<notify::Event>();
    let handle = tokio::runtime::Handle::current();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
        Ok(event) => {
            let tx = raw_tx.clone();
            handle.spawn(async move {
                let _ = tx.send(event);
            });
        }
        Err(e) => error!(error = ?e, "config watcher error"),
    })
    .context("failed to create config watcher")?;

    watcher
        .watch(&parent, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", parent.display()))?;

    let (debounced_tx, debounced_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        while let Some(event) = raw_rx.recv().await {
            if !is_relevant(&event, &config_path) {
                continue;
            }
            debug!(?event, "config file change detected, arming debounce timer");

            loop {
                tokio::select! {
                    _ = sleep(DEBOUNCE) => break,
                    maybe_next = raw_rx.recv() => match maybe_next {
                        Some(next) if is_relevant(&next, &config_path) => continue,
                        Some(_) => continue,
                        None => return,
                    },
                }
            }

            if debounced_tx.send(()).await.is_err() {
                break;
            }
        }
    });

    Ok((watcher, debounced_rx))
}

fn is_relevant(event: &notify::Event, config_path: &Path) -> bool {
    use notify::event::{CreateKind, DataChange, EventKind, ModifyKind, RemoveKind};
    let kind_matches = matches!(
        event.kind,
        EventKind::Create(CreateKind::File)
            | EventKind::Modify(ModifyKind::Data(DataChange::Any))
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Remove(RemoveKind::File)
    );
    kind_matches && event.paths.iter().any(|p| p == config_path)
}
