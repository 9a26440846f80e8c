//! Change feed: filesystem events become single-file index updates.
//!
//! The notify callback pushes changed paths onto a bounded queue; one worker
//! task drains it and runs each update on the blocking pool. Stopping
//! cancels the worker between updates, so an update already running always
//! completes.

use std::{path::PathBuf, sync::Arc};

use notify::{
    Event,
    EventKind,
    RecommendedWatcher,
    RecursiveMode,
    Watcher,
    recommended_watcher,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{error::Result, indexer::Indexer};

/// Pending path updates before the event thread waits for the worker.
pub const QUEUE_CAPACITY: usize = 1024;

/// A running watcher and its worker.
pub struct WatchHandle {
    watcher: RecommendedWatcher,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

/// Start watching the indexer's root recursively.
///
/// Must be called from within a Tokio runtime.
pub fn start(indexer: Arc<Indexer>) -> Result<WatchHandle> {
    let root = indexer.root().to_path_buf();
    let (tx, rx) = mpsc::channel::<PathBuf>(QUEUE_CAPACITY);

    let mut watcher = recommended_watcher(move |res: notify::Result<Event>| {
        match res {
            Ok(event) => {
                for path in changed_paths(event) {
                    if tx.blocking_send(path).is_err() {
                        debug!("watch queue closed; dropping event");
                        break;
                    }
                }
            }
            Err(e) => error!("file watch error: {e}"),
        }
    })?;
    watcher.watch(&root, RecursiveMode::Recursive)?;

    let cancel = CancellationToken::new();
    let worker = tokio::spawn(run_worker(indexer, rx, cancel.clone()));

    info!("watching {}", root.display());
    Ok(WatchHandle {
        watcher,
        cancel,
        worker,
    })
}

impl WatchHandle {
    /// Stop receiving events and wait for the worker to exit.
    pub async fn stop(self) {
        let Self {
            watcher,
            cancel,
            worker,
        } = self;

        // Dropping the watcher joins its event thread, which may be waiting
        // on the queue; the worker keeps draining until then.
        let _ = tokio::task::spawn_blocking(move || drop(watcher)).await;
        cancel.cancel();
        if let Err(e) = worker.await {
            error!("watch worker failed: {e}");
        }
        info!("stopped watching");
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Paths touched by a create, modify, or remove event.
fn changed_paths(event: Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {
            event.paths
        }
        _ => Vec::new(),
    }
}

async fn run_worker(
    indexer: Arc<Indexer>,
    mut rx: mpsc::Receiver<PathBuf>,
    cancel: CancellationToken,
) {
    loop {
        let path = tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(path) => path,
                None => break,
            },
        };

        let indexer = Arc::clone(&indexer);
        let task = tokio::task::spawn_blocking(move || {
            let outcome = indexer.sync_path(&path);
            debug!("change at {}: {outcome:?}", path.display());
        });
        if let Err(e) = task.await {
            error!("file update task failed: {e}");
        }
    }
    debug!("watch worker exited");
}

#[cfg(test)]
mod tests {
    use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind};

    use super::*;

    fn event(kind: EventKind) -> Event {
        Event::new(kind).add_path(PathBuf::from("/t/a.md"))
    }

    #[test]
    fn content_events_yield_paths() {
        for kind in [
            EventKind::Create(CreateKind::File),
            EventKind::Modify(ModifyKind::Any),
            EventKind::Remove(RemoveKind::File),
        ] {
            assert_eq!(
                changed_paths(event(kind)),
                vec![PathBuf::from("/t/a.md")]
            );
        }
    }

    #[test]
    fn access_events_are_ignored() {
        assert!(
            changed_paths(event(EventKind::Access(AccessKind::Any))).is_empty()
        );
        assert!(changed_paths(event(EventKind::Other)).is_empty());
    }
}
