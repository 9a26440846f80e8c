use std::sync::Arc;

use clap::Parser;
use srcbert::{
    Indexer,
    Settings,
    embedding::{EmbedProvider, Embedder},
    error,
    mcp,
    progress::{NoProgress, ProgressSink, ScanMonitor, TerminalProgress},
    reranker::{ColbertReranker, Reranker},
    search::SearchParams,
};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, SearchArgs};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("SRCBERT_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    init_tracing(cli.verbose, cli.quiet);

    let settings = Settings::resolve(
        &cli.root,
        cli.data_dir.as_deref(),
        cli.embedding.provider_config()?,
        cli.chunking(),
        cli.rerank,
    )?;

    match cli.command {
        Command::Serve => {
            let monitor = Arc::new(ScanMonitor::new());
            let indexer = open_indexer(settings, monitor.clone())?;
            mcp::run_mcp(Arc::new(indexer), monitor)?;
        }
        Command::Index => {
            let indexer =
                open_indexer(settings, Arc::new(TerminalProgress::new()))?;
            let summary = indexer.index_directory();
            println!(
                "Indexed {} files ({} chunks), {} unchanged, {} removed, {} failed",
                summary.indexed,
                summary.chunks,
                summary.unchanged,
                summary.removed,
                summary.failed
            );
        }
        Command::Search(args) => {
            let indexer = open_indexer(settings, Arc::new(NoProgress))?;
            cmd_search(&indexer, &args)?;
        }
        Command::Reindex => {
            let indexer =
                open_indexer(settings, Arc::new(TerminalProgress::new()))?;
            let summary = indexer.rebuild()?;
            println!(
                "Rebuilt index: {} files ({} chunks), {} failed",
                summary.indexed, summary.chunks, summary.failed
            );
        }
        Command::Status(args) => {
            let data_dir = settings.data_dir.root().to_path_buf();
            let indexer = open_indexer(settings, Arc::new(NoProgress))?;
            cmd_status(&indexer, &data_dir, args.json)?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

/// Build the configured embedder (and reranker, when asked for) and open
/// the index.
fn open_indexer(
    settings: Settings,
    progress: Arc<dyn ProgressSink>,
) -> error::Result<Indexer> {
    let provider = EmbedProvider::from_config(&settings.provider);

    let reranker: Option<Arc<dyn Reranker>> = match &provider {
        EmbedProvider::Local(local) if settings.rerank => {
            Some(Arc::new(ColbertReranker::new(local.manager())))
        }
        _ => None,
    };
    if settings.rerank && reranker.is_none() {
        tracing::warn!("--rerank needs the local provider; reranking disabled");
    }

    let embedder: Arc<dyn Embedder> = Arc::new(provider);
    Indexer::open(settings, embedder, reranker, progress)
}

fn cmd_search(indexer: &Indexer, args: &SearchArgs) -> error::Result<()> {
    let params = SearchParams {
        score_threshold: args.min_score,
        ..SearchParams::new(args.query.clone(), args.count)
    };
    let hits = indexer.search_hits(&params);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for hit in &hits {
        println!("{}. {} (score: {:.3})", hit.rank, hit.file_path, hit.score);
        println!("   {}", hit.formatted());
    }
    Ok(())
}

fn cmd_status(
    indexer: &Indexer,
    data_dir: &std::path::Path,
    json: bool,
) -> error::Result<()> {
    let stats = indexer.stats();
    let schema = indexer.schema();

    if json {
        let doc = serde_json::json!({
            "root": indexer.root(),
            "dataDir": data_dir,
            "provider": schema.provider,
            "model": schema.model,
            "dimension": schema.dimension,
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        println!("Root: {}", indexer.root().display());
        println!("Data directory: {}", data_dir.display());
        println!(
            "Embedding: {} / {} (dim {})",
            schema.provider, schema.model, schema.dimension
        );
        println!("Indexed files: {}", stats.indexed_files);
        println!("Vectors: {} ({})", stats.total_vectors, stats.backend);
        println!("Index size: {:.2} MB", stats.index_size_mb);
    }
    Ok(())
}
