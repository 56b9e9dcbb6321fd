use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use buildlink_core::BuildService;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::Result;

struct FsWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
}

impl FsWatcher {
    fn new(root: &Path) -> notify::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    async fn next_event(&mut self) -> Option<Event> {
        match self.rx.recv().await {
            Some(Ok(event)) => Some(event),
            _ => None,
        }
    }
}

/// Watches a directory tree and feeds change/delete notifications into the
/// build service's dirty-file state. Events are debounced so a burst of
/// saves turns into one sweep. The task exits when the token is cancelled.
pub fn spawn_watcher(
    root: PathBuf,
    service: Arc<BuildService>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut watcher = FsWatcher::new(&root)?;

    tokio::spawn(async move {
        tracing::info!("watching {} for source changes", root.display());
        let debounce = Duration::from_millis(500);
        // path -> seen-as-deleted; later events for the same path win
        let mut pending: HashMap<PathBuf, bool> = HashMap::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = watcher.next_event() => {
                    match event {
                        Some(event) => {
                            let deleted = matches!(event.kind, EventKind::Remove(_));
                            for path in event.paths {
                                pending.insert(path, deleted);
                            }
                        }
                        None => break,
                    }
                }
                _ = tokio::time::sleep(debounce), if !pending.is_empty() => {
                    for (path, deleted) in pending.drain() {
                        service.route_file_event(&path, deleted);
                    }
                }
            }
        }
        tracing::info!("file watcher stopped for {}", root.display());
    });

    Ok(())
}
