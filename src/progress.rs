use std::sync::Mutex;

use kdam::{Bar, BarExt, tqdm};
use serde::Serialize;

/// Receives indexing lifecycle events.
///
/// Purely observational: implementations must not block for long and
/// cannot fail the caller.
pub trait ProgressSink: Send + Sync {
    fn scan_started(&self, to_index: usize, skipped: usize);
    fn file_started(&self, name: &str);
    fn file_indexed(&self, chunks: usize);
    fn file_failed(&self);
    fn scan_finished(&self, index_size_mb: f64);

    /// Aggregate figures restored from the manifest when a scan finds
    /// nothing to do.
    fn totals(
        &self,
        _files_discovered: usize,
        _files_indexed: usize,
        _total_chunks: usize,
    ) {
    }
}

/// Ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn scan_started(&self, _to_index: usize, _skipped: usize) {}
    fn file_started(&self, _name: &str) {}
    fn file_indexed(&self, _chunks: usize) {}
    fn file_failed(&self) {}
    fn scan_finished(&self, _index_size_mb: f64) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Initializing,
    Indexing,
    Ready,
}

/// Snapshot of scan progress. Not authoritative for correctness.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanState {
    pub status: ScanStatus,
    pub files_discovered: usize,
    pub files_indexed: usize,
    pub files_failed: usize,
    pub files_skipped: usize,
    pub total_chunks: usize,
    pub index_size_mb: f64,
    pub current_file: Option<String>,
    pub indexing_active: bool,
}

impl Default for ScanState {
    fn default() -> Self {
        Self {
            status: ScanStatus::Initializing,
            files_discovered: 0,
            files_indexed: 0,
            files_failed: 0,
            files_skipped: 0,
            total_chunks: 0,
            index_size_mb: 0.0,
            current_file: None,
            indexing_active: false,
        }
    }
}

/// Keeps a [`ScanState`] that readers can copy at any time.
#[derive(Debug, Default)]
pub struct ScanMonitor {
    state: Mutex<ScanState>,
}

impl ScanMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ScanState {
        self.state.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn update(&self, f: impl FnOnce(&mut ScanState)) {
        if let Ok(mut state) = self.state.lock() {
            f(&mut state);
        }
    }
}

impl ProgressSink for ScanMonitor {
    fn scan_started(&self, to_index: usize, skipped: usize) {
        self.update(|s| {
            *s = ScanState {
                status: ScanStatus::Indexing,
                files_discovered: to_index,
                files_skipped: skipped,
                indexing_active: true,
                index_size_mb: s.index_size_mb,
                ..ScanState::default()
            };
        });
    }

    fn file_started(&self, name: &str) {
        self.update(|s| s.current_file = Some(name.to_string()));
    }

    fn file_indexed(&self, chunks: usize) {
        self.update(|s| {
            s.files_indexed += 1;
            s.total_chunks += chunks;
            s.current_file = None;
        });
    }

    fn file_failed(&self) {
        self.update(|s| {
            s.files_failed += 1;
            s.current_file = None;
        });
    }

    fn scan_finished(&self, index_size_mb: f64) {
        self.update(|s| {
            s.status = ScanStatus::Ready;
            s.indexing_active = false;
            s.current_file = None;
            s.index_size_mb = index_size_mb;
        });
    }

    fn totals(
        &self,
        files_discovered: usize,
        files_indexed: usize,
        total_chunks: usize,
    ) {
        self.update(|s| {
            s.files_discovered = files_discovered;
            s.files_indexed = files_indexed;
            s.total_chunks = total_chunks;
        });
    }
}

/// Progress bar on stderr for the one-shot `index` command.
pub struct TerminalProgress {
    bar: Mutex<Option<Bar>>,
}

impl TerminalProgress {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn with_bar(&self, f: impl FnOnce(&mut Bar)) {
        if let Ok(mut guard) = self.bar.lock()
            && let Some(bar) = guard.as_mut()
        {
            f(bar);
        }
    }
}

impl Default for TerminalProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for TerminalProgress {
    fn scan_started(&self, to_index: usize, _skipped: usize) {
        if to_index == 0 {
            return;
        }
        if let Ok(mut guard) = self.bar.lock() {
            *guard = Some(tqdm!(total = to_index, desc = "Indexing"));
        }
    }

    fn file_started(&self, name: &str) {
        self.with_bar(|bar| {
            bar.set_postfix(name);
            let _ = bar.refresh();
        });
    }

    fn file_indexed(&self, _chunks: usize) {
        self.with_bar(|bar| {
            let _ = bar.update(1);
        });
    }

    fn file_failed(&self) {
        self.with_bar(|bar| {
            let _ = bar.update(1);
        });
    }

    fn scan_finished(&self, _index_size_mb: f64) {
        if let Ok(mut guard) = self.bar.lock()
            && let Some(mut bar) = guard.take()
        {
            bar.set_postfix("");
            let _ = bar.refresh();
            eprintln!();
        }
    }
}
