mod common;

use std::{
    path::Path,
    sync::{Arc, atomic::Ordering},
};

use common::HashEmbedder;
use srcbert::{
    Error,
    Indexer,
    Settings,
    chunking::ChunkingConfig,
    config::ProviderConfig,
    embedding::EmbedProvider,
    progress::{ScanMonitor, ScanStatus},
};

fn open(
    root: &Path,
    embedder: Arc<HashEmbedder>,
    monitor: Arc<ScanMonitor>,
) -> Indexer {
    let settings = Settings::resolve(
        root,
        None,
        ProviderConfig::local(None),
        ChunkingConfig::default(),
        false,
    )
    .unwrap();
    Indexer::open(settings, embedder, None, monitor).unwrap()
}

fn write_fixture(root: &Path) {
    std::fs::write(root.join("a.txt"), "The secret token is NEEDLE_42.")
        .unwrap();
    std::fs::write(
        root.join("b.md"),
        "# Deployment Guide\n\nShip the binary and restart the service.",
    )
    .unwrap();
    std::fs::write(
        root.join("c.json"),
        "{\n  \"host\": \"server-3.local\",\n  \"port\": 8080\n}",
    )
    .unwrap();
}

#[test]
fn index_and_search_small_tree() {
    let tmp = tempfile::tempdir().unwrap();
    write_fixture(tmp.path());
    std::fs::create_dir(tmp.path().join("node_modules")).unwrap();
    std::fs::write(tmp.path().join("node_modules/dep.js"), "NEEDLE_42")
        .unwrap();

    let monitor = Arc::new(ScanMonitor::new());
    let indexer =
        open(tmp.path(), Arc::new(HashEmbedder::new(64)), monitor.clone());

    let summary = indexer.index_directory();
    assert_eq!(summary.indexed, 3);
    assert_eq!(summary.failed, 0);

    let state = monitor.snapshot();
    assert_eq!(state.status, ScanStatus::Ready);
    assert_eq!(state.files_indexed, 3);
    assert!(!state.indexing_active);

    let results = indexer.search("NEEDLE_42", 5);
    assert!(results[0].starts_with("[a.txt] "));
    assert!(results.iter().all(|r| !r.starts_with("[dep.js]")));

    let results = indexer.search("deployment", 5);
    assert!(results.iter().any(|r| r.contains("# Deployment Guide")));

    let results = indexer.search("deployment guide", 1);
    assert_eq!(results.len(), 1);
    assert!(results[0].starts_with("[b.md] # Deployment Guide"));

    let results = indexer.search("server-3.local", 1);
    assert!(results[0].starts_with("[c.json] "));
    assert!(results[0].contains("\"host\": \"server-3.local\""));
}

#[test]
fn rescan_after_restart_embeds_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    write_fixture(tmp.path());

    {
        let indexer = open(
            tmp.path(),
            Arc::new(HashEmbedder::new(64)),
            Arc::new(ScanMonitor::new()),
        );
        assert_eq!(indexer.index_directory().indexed, 3);
    }

    let embedder = Arc::new(HashEmbedder::new(64));
    let monitor = Arc::new(ScanMonitor::new());
    let indexer = open(tmp.path(), embedder.clone(), monitor.clone());

    let summary = indexer.index_directory();
    assert_eq!(summary.indexed, 0);
    assert_eq!(summary.unchanged, 3);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);

    let state = monitor.snapshot();
    assert_eq!(state.status, ScanStatus::Ready);
    assert_eq!(state.files_discovered, 3);
    assert_eq!(state.files_indexed, 3);
    assert_eq!(state.total_chunks, 3);
}

#[test]
fn changed_embedding_dimension_rebuilds_from_scratch() {
    let tmp = tempfile::tempdir().unwrap();
    write_fixture(tmp.path());

    {
        let indexer = open(
            tmp.path(),
            Arc::new(HashEmbedder::new(64)),
            Arc::new(ScanMonitor::new()),
        );
        indexer.index_directory();
        assert_eq!(indexer.stats().total_vectors, 3);
    }

    let embedder = Arc::new(HashEmbedder::new(32));
    let indexer =
        open(tmp.path(), embedder.clone(), Arc::new(ScanMonitor::new()));
    assert_eq!(indexer.stats().total_vectors, 0);
    assert_eq!(indexer.stats().indexed_files, 0);

    assert_eq!(indexer.index_directory().indexed, 3);
    assert!(embedder.calls.load(Ordering::SeqCst) > 0);
    assert_eq!(indexer.stats().total_vectors, 3);
}

#[test]
fn removed_and_ignored_files_leave_the_index() {
    let tmp = tempfile::tempdir().unwrap();
    write_fixture(tmp.path());

    {
        let indexer = open(
            tmp.path(),
            Arc::new(HashEmbedder::new(64)),
            Arc::new(ScanMonitor::new()),
        );
        indexer.index_directory();
    }

    // Ignore patterns are read when the indexer opens.
    std::fs::remove_file(tmp.path().join("a.txt")).unwrap();
    std::fs::write(tmp.path().join(".srcbertignore"), "c.json\n").unwrap();

    let indexer = open(
        tmp.path(),
        Arc::new(HashEmbedder::new(64)),
        Arc::new(ScanMonitor::new()),
    );
    let summary = indexer.index_directory();
    assert_eq!(summary.removed, 2);
    // The ignore file itself is indexable.
    assert_eq!(summary.indexed, 1);
    assert_eq!(indexer.stats().indexed_files, 2);
    assert_eq!(indexer.stats().total_vectors, 2);

    let results = indexer.search("NEEDLE_42", 5);
    assert!(results.iter().all(|r| !r.starts_with("[a.txt]")));
    assert!(results.iter().all(|r| !r.starts_with("[c.json]")));
}

#[test]
fn empty_query_returns_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    write_fixture(tmp.path());

    let embedder = Arc::new(HashEmbedder::new(64));
    let indexer =
        open(tmp.path(), embedder.clone(), Arc::new(ScanMonitor::new()));
    indexer.index_directory();
    let calls = embedder.calls.load(Ordering::SeqCst);

    assert!(indexer.search("", 5).is_empty());
    assert!(indexer.search("   ", 5).is_empty());
    assert_eq!(embedder.calls.load(Ordering::SeqCst), calls);
}

#[test]
fn unreachable_remote_provider_fails_at_open() {
    let tmp = tempfile::tempdir().unwrap();
    write_fixture(tmp.path());

    let provider = ProviderConfig::remote(
        Some("http://127.0.0.1:9/v1".to_string()),
        None,
        Some("sk-test".to_string()),
        None,
    )
    .unwrap();
    let settings = Settings::resolve(
        tmp.path(),
        None,
        provider,
        ChunkingConfig::default(),
        false,
    )
    .unwrap();
    let embedder = Arc::new(EmbedProvider::from_config(&settings.provider));
    let collection = settings.data_dir.collection_dir();

    let err =
        Indexer::open(settings, embedder, None, Arc::new(ScanMonitor::new()))
            .unwrap_err();
    assert!(matches!(err, Error::Config(_)), "{err}");
    assert!(!collection.exists());
}
