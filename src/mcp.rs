use std::sync::Arc;

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::{error, indexer::Indexer, progress::ScanMonitor, service::Service};

const DEFAULT_SEARCH_LIMIT: usize = 5;
const NO_RESULTS: &str =
    "No relevant information found in the local knowledge base.";
const RESULT_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Clone)]
pub struct SrcbertMcpServer {
    service: Arc<Service>,
    tool_router: ToolRouter<Self>,
}

impl SrcbertMcpServer {
    pub fn new(service: Arc<Service>) -> Self {
        Self {
            service,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl SrcbertMcpServer {
    /// Semantic search over the indexed tree.
    #[tool(
        name = "search_knowledge_base",
        description = "Search the local knowledge base for passages relevant to a natural-language query. Returns the best matching excerpts, each prefixed with its file name."
    )]
    pub async fn search_knowledge_base(
        &self,
        params: Parameters<SearchKnowledgeBaseParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let limit = params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);

        let results = self.service.search(params.query.clone(), limit).await;
        let summary = format_results(&results);
        let structured = serde_json::to_value(SearchResponse {
            query: params.query,
            result_count: results.len(),
            results,
        })
        .map_err(|e| mcp_error("failed to serialize search results", e))?;

        Ok(CallToolResult {
            content: vec![Content::text(summary)],
            structured_content: Some(structured),
            is_error: Some(false),
            meta: None,
        })
    }

    /// Collection size and scan progress.
    #[tool(
        name = "get_index_stats",
        description = "Report how many chunks are indexed, which backend stores them, and the progress of the current scan."
    )]
    pub async fn get_index_stats(
        &self,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let stats = self
            .service
            .stats()
            .await
            .map_err(|e| mcp_error("failed to read index stats", e))?;
        let structured = serde_json::to_value(&stats)
            .map_err(|e| mcp_error("failed to serialize index stats", e))?;
        let text = serde_json::to_string_pretty(&structured)
            .map_err(|e| mcp_error("failed to serialize index stats", e))?;

        Ok(CallToolResult {
            content: vec![Content::text(text)],
            structured_content: Some(structured),
            is_error: Some(false),
            meta: None,
        })
    }

    /// Full rebuild, with the change feed paused.
    #[tool(
        name = "reindex_knowledge_base",
        description = "Wipe the index and rebuild it from the files on disk. Returns when the rebuild has finished."
    )]
    pub async fn reindex_knowledge_base(
        &self,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let summary = self
            .service
            .reindex()
            .await
            .map_err(|e| mcp_error("reindex failed", e))?;
        let structured = serde_json::to_value(summary)
            .map_err(|e| mcp_error("failed to serialize reindex summary", e))?;
        let text = format!(
            "Reindexed {} files into {} chunks ({} failed).",
            summary.indexed, summary.chunks, summary.failed
        );

        Ok(CallToolResult {
            content: vec![Content::text(text)],
            structured_content: Some(structured),
            is_error: Some(false),
            meta: None,
        })
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for SrcbertMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "srcbert".to_string(),
                title: Some("srcbert MCP".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Use search_knowledge_base to find relevant passages in the local files. Use get_index_stats to check whether indexing has finished. Use reindex_knowledge_base only when the index looks stale or corrupt."
                    .to_string(),
            ),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchKnowledgeBaseParams {
    /// Natural-language search query.
    pub query: String,
    /// Maximum number of excerpts (default: 5).
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    query: String,
    result_count: usize,
    results: Vec<String>,
}

fn format_results(results: &[String]) -> String {
    if results.is_empty() {
        return NO_RESULTS.to_string();
    }
    format!(
        "Found {} relevant chunks:\n\n{}",
        results.len(),
        results.join(RESULT_SEPARATOR)
    )
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

/// Serve MCP over stdio while watching the tree and catching up in the
/// background. Returns when the client disconnects.
pub fn run_mcp(
    indexer: Arc<Indexer>,
    monitor: Arc<ScanMonitor>,
) -> error::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let service = Arc::new(Service::new(indexer, monitor));
        service.run().await?;

        let server = SrcbertMcpServer::new(Arc::clone(&service));
        let result = serve_stdio(server).await;
        if let Err(e) = &result {
            error!("{e}");
        }

        service.shutdown().await;
        info!("MCP session ended");
        result
    })
}

async fn serve_stdio(server: SrcbertMcpServer) -> error::Result<()> {
    let transport = rmcp::transport::stdio();
    let running = server.serve(transport).await.map_err(|e| {
        error::Error::Config(format!("MCP server initialization failed: {e}"))
    })?;
    running
        .waiting()
        .await
        .map_err(|e| error::Error::Config(format!("MCP server error: {e}")))?;
    Ok(())
}
