use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    error::{Error, Result},
    indexer::{IndexStats, Indexer, ScanSummary},
    progress::{ScanMonitor, ScanState},
    watcher::{self, WatchHandle},
};

/// Stats document served to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    #[serde(flatten)]
    pub index: IndexStats,
    pub scan: ScanState,
}

/// Long-running owner of the indexer, its change feed, and background
/// scans. Blocking indexer work always runs on Tokio's blocking pool.
pub struct Service {
    indexer: Arc<Indexer>,
    monitor: Arc<ScanMonitor>,
    /// Held across a whole reindex so watcher changes cannot interleave.
    watcher: Mutex<Option<WatchHandle>>,
    /// Stops the scan started by `run` or `reindex`.
    scan_cancel: std::sync::Mutex<CancellationToken>,
}

impl Service {
    /// `monitor` should be the progress sink the indexer reports to.
    pub fn new(indexer: Arc<Indexer>, monitor: Arc<ScanMonitor>) -> Self {
        Self {
            indexer,
            monitor,
            watcher: Mutex::new(None),
            scan_cancel: std::sync::Mutex::new(CancellationToken::new()),
        }
    }

    pub fn indexer(&self) -> &Arc<Indexer> {
        &self.indexer
    }

    /// Cancel the running scan, if any, and hand out a token for the next.
    fn renew_scan_token(&self) -> CancellationToken {
        let mut current =
            self.scan_cancel.lock().unwrap_or_else(|e| e.into_inner());
        current.cancel();
        *current = CancellationToken::new();
        current.clone()
    }

    /// Start the change feed and an incremental scan in the background.
    pub async fn run(&self) -> Result<()> {
        self.start_watching().await?;

        let indexer = Arc::clone(&self.indexer);
        let cancel = self.renew_scan_token();
        tokio::task::spawn_blocking(move || {
            let summary = indexer.index_directory_until(&cancel);
            if summary.cancelled {
                info!(
                    "background scan stopped early: {} indexed",
                    summary.indexed
                );
            } else {
                info!(
                    "background scan done: {} indexed, {} failed",
                    summary.indexed, summary.failed
                );
            }
        });
        Ok(())
    }

    pub async fn start_watching(&self) -> Result<()> {
        let mut slot = self.watcher.lock().await;
        if slot.is_none() {
            *slot = Some(watcher::start(Arc::clone(&self.indexer))?);
        }
        Ok(())
    }

    pub async fn stop_watching(&self) {
        let handle = self.watcher.lock().await.take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    pub async fn is_watching(&self) -> bool {
        self.watcher.lock().await.is_some()
    }

    /// Stop the change feed and any background scan, rebuild the index
    /// from scratch, then resume watching if it was running. Concurrent
    /// calls run one after another.
    pub async fn reindex(&self) -> Result<ScanSummary> {
        let mut slot = self.watcher.lock().await;
        let cancel = self.renew_scan_token();
        let was_watching = match slot.take() {
            Some(handle) => {
                handle.stop().await;
                true
            }
            None => false,
        };

        let indexer = Arc::clone(&self.indexer);
        let rebuild = move || indexer.rebuild_until(&cancel);
        let result = tokio::task::spawn_blocking(rebuild)
            .await
            .map_err(|e| Error::Config(format!("reindex task failed: {e}")));

        if was_watching {
            match watcher::start(Arc::clone(&self.indexer)) {
                Ok(handle) => *slot = Some(handle),
                Err(e) => error!("cannot resume watching: {e}"),
            }
        }

        let summary = result??;
        info!("reindex complete: {} files indexed", summary.indexed);
        Ok(summary)
    }

    /// Formatted excerpts for `query`; empty on any failure.
    pub async fn search(&self, query: String, limit: usize) -> Vec<String> {
        let indexer = Arc::clone(&self.indexer);
        tokio::task::spawn_blocking(move || indexer.search(&query, limit))
            .await
            .unwrap_or_else(|e| {
                error!("search task failed: {e}");
                Vec::new()
            })
    }

    pub async fn stats(&self) -> Result<ServiceStats> {
        let indexer = Arc::clone(&self.indexer);
        let index = tokio::task::spawn_blocking(move || indexer.stats())
            .await
            .map_err(|e| Error::Config(format!("stats task failed: {e}")))?;
        Ok(ServiceStats {
            index,
            scan: self.monitor.snapshot(),
        })
    }

    /// Stop the change feed and cancel any scan in progress. The scan
    /// thread finishes the file it is on and releases the scan lock.
    pub async fn shutdown(&self) {
        self.scan_cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cancel();
        debug!("scan cancellation requested");
        self.stop_watching().await;
        info!("service stopped");
    }
}
