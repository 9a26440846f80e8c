use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use srcbert::{
    chunking::{ChunkingConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE},
    config::ProviderConfig,
    error::Result,
};

#[derive(Debug, Parser)]
#[command(
    name = "srcbert",
    about = "Semantic search over a local directory tree, served over MCP"
)]
pub struct Cli {
    /// Directory tree to index
    #[arg(long, env = "SRCBERT_ROOT", default_value = ".", global = true)]
    pub root: PathBuf,

    /// Where the manifest and vector collection live (default: <root>/.srcbert)
    #[arg(long, env = "SRCBERT_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(flatten)]
    pub embedding: EmbeddingArgs,

    /// Target chunk length in characters
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, global = true)]
    pub chunk_size: usize,

    /// Characters shared between consecutive chunks
    #[arg(long, default_value_t = DEFAULT_CHUNK_OVERLAP, global = true)]
    pub chunk_overlap: usize,

    /// Rerank the best candidates with ColBERT MaxSim (local provider only)
    #[arg(long, global = true)]
    pub rerank: bool,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn chunking(&self) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: self.chunk_size,
            overlap: self.chunk_overlap,
            ..ChunkingConfig::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderArg {
    /// ColBERT model run in-process
    Local,
    /// OpenAI-compatible embeddings endpoint
    Openai,
}

#[derive(Debug, Args)]
pub struct EmbeddingArgs {
    /// Embedding backend
    #[arg(
        long,
        env = "EMBEDDING_PROVIDER",
        value_enum,
        default_value = "local",
        global = true
    )]
    pub provider: ProviderArg,

    /// Model ID, HuggingFace repo, or local model path
    #[arg(long, env = "EMBEDDING_MODEL", global = true)]
    pub model: Option<String>,

    /// API key for the openai provider
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// Base URL of the embeddings API
    #[arg(long, env = "OPENAI_BASE_URL", global = true)]
    pub base_url: Option<String>,

    /// Vector length for remote models, when not derivable from the name
    #[arg(long, env = "EMBEDDING_DIMENSION", global = true)]
    pub dimension: Option<usize>,
}

impl EmbeddingArgs {
    pub fn provider_config(&self) -> Result<ProviderConfig> {
        match self.provider {
            ProviderArg::Local => Ok(ProviderConfig::local(self.model.clone())),
            ProviderArg::Openai => ProviderConfig::remote(
                self.base_url.clone(),
                self.model.clone(),
                self.api_key.clone(),
                self.dimension,
            ),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the MCP server on stdio, watching the tree for changes
    Serve,
    /// Bring the index up to date with the tree (incremental)
    Index,
    /// Search the index
    Search(SearchArgs),
    /// Discard the index and rebuild it from scratch
    Reindex,
    /// Show index statistics
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "5")]
    pub count: usize,

    /// Minimum vector similarity
    #[arg(long, default_value = "0.0")]
    pub min_score: f32,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "srcbert",
            &mut std::io::stdout(),
        );
    }
}
