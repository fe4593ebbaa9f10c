//! Catalog MCP Server implementation

use anyhow::Result;
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use product_finder::{FusionWeights, RankedResult, RetrievalConfig, RetrievalEngine, RetrievalError};

const MAX_TOP_K: usize = 100;

/// Parameters for catalog_search_text tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct TextSearchParams {
    /// Product description (e.g., "black quilted leather bag")
    #[schemars(description = "Product description to search for")]
    pub query: String,
    #[schemars(description = "Maximum number of results (default from retrieval.yaml, 10 if unset)")]
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// Parameters for catalog_search_image tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ImageSearchParams {
    #[schemars(description = "Path to a PNG, JPEG or WebP image on the server's filesystem")]
    pub image_path: String,
    #[schemars(description = "Maximum number of results (default from retrieval.yaml, 10 if unset)")]
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// Parameters for catalog_search_combined tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CombinedSearchParams {
    #[schemars(description = "Path to a PNG, JPEG or WebP image on the server's filesystem")]
    pub image_path: String,
    #[schemars(description = "Product description to search for")]
    pub query: String,
    #[schemars(description = "Weight of image similarity (default from retrieval.yaml, 0.5 if unset)")]
    #[serde(default)]
    pub weight_image: Option<f32>,
    #[schemars(description = "Weight of text similarity (default from retrieval.yaml, 0.5 if unset)")]
    #[serde(default)]
    pub weight_text: Option<f32>,
    #[schemars(description = "Maximum number of results (default from retrieval.yaml, 10 if unset)")]
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// Parameters for catalog_product tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ProductParams {
    #[schemars(description = "Product index as returned by a search")]
    pub index: usize,
}

/// Search hit for JSON output
#[derive(Debug, Serialize)]
struct SearchHitJson {
    rank: usize,
    index: usize,
    score: f32,
    title: String,
    price: String,
    category: String,
    product_code: String,
    image_url: String,
}

/// Catalog MCP Service
#[derive(Clone)]
pub struct CatalogService {
    engine: Arc<RetrievalEngine>,
    config: Arc<RetrievalConfig>,
    tool_router: ToolRouter<Self>,
}

impl CatalogService {
    pub fn new(engine: RetrievalEngine, config: RetrievalConfig) -> Self {
        Self {
            engine: Arc::new(engine),
            config: Arc::new(config),
            tool_router: Self::tool_router(),
        }
    }

    fn hits(&self, results: &[RankedResult]) -> Result<CallToolResult, McpError> {
        let hits: Vec<SearchHitJson> = self
            .engine
            .resolve(results)
            .into_iter()
            .map(|r| SearchHitJson {
                rank: r.rank,
                index: r.record.index,
                score: r.score,
                title: r.record.title,
                price: r.record.price,
                category: r.record.category,
                product_code: r.record.product_code,
                image_url: r.record.image_url,
            })
            .collect();

        json_result(&hits)
    }
}

/// Requested top_k, else the configured default. 0 means default, max 100.
fn clamp_top_k(top_k: Option<usize>, config: &RetrievalConfig) -> usize {
    let top_k = match top_k {
        Some(k) if k > 0 => k,
        _ => config.default_top_k,
    };
    top_k.min(MAX_TOP_K)
}

/// Requested weights, each falling back to the configured one
fn fusion_weights(image: Option<f32>, text: Option<f32>, config: &RetrievalConfig) -> FusionWeights {
    FusionWeights::new(
        image.unwrap_or(config.weights.image),
        text.unwrap_or(config.weights.text),
    )
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let output = serde_json::to_string_pretty(value).map_err(|e| {
        McpError::internal_error(format!("JSON serialization failed: {}", e), None)
    })?;
    Ok(CallToolResult::success(vec![Content::text(output)]))
}

fn to_mcp_error(err: RetrievalError) -> McpError {
    match err {
        RetrievalError::EmptyQuery(_) | RetrievalError::IndexOutOfRange { .. } => {
            McpError::invalid_params(err.to_string(), None)
        }
        other => McpError::internal_error(format!("Search failed: {}", other), None),
    }
}

fn open_image(path: &str) -> Result<image::DynamicImage, McpError> {
    image::open(path)
        .map_err(|e| McpError::invalid_params(format!("Failed to read image {}: {}", path, e), None))
}

#[tool_router]
impl CatalogService {
    #[tool(description = "Search the product catalog by text description. Returns products whose titles are most similar to the query.")]
    async fn catalog_search_text(
        &self,
        params: Parameters<TextSearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let top_k = clamp_top_k(params.0.top_k, &self.config);
        let results = self
            .engine
            .search_by_text(&params.0.query, top_k)
            .map_err(to_mcp_error)?;
        self.hits(&results)
    }

    #[tool(description = "Search the product catalog by image. Returns products that look most similar to the image file.")]
    async fn catalog_search_image(
        &self,
        params: Parameters<ImageSearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let top_k = clamp_top_k(params.0.top_k, &self.config);
        let image = open_image(&params.0.image_path)?;
        let results = self
            .engine
            .search_by_image(&image, top_k)
            .map_err(to_mcp_error)?;
        self.hits(&results)
    }

    #[tool(description = "Search the product catalog with an image and a text description together. Scores are a weighted sum of image and text similarity; weights are used as given.")]
    async fn catalog_search_combined(
        &self,
        params: Parameters<CombinedSearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let top_k = clamp_top_k(p.top_k, &self.config);
        let weights = fusion_weights(p.weight_image, p.weight_text, &self.config);
        let image = open_image(&p.image_path)?;
        let results = self
            .engine
            .combined_search(&image, &p.query, weights, top_k)
            .map_err(to_mcp_error)?;
        self.hits(&results)
    }

    #[tool(description = "Get catalog details (title, price, category, code, image URL) for a product index.")]
    async fn catalog_product(
        &self,
        params: Parameters<ProductParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.engine.product_info(params.0.index) {
            Some(record) => json_result(record),
            None => Ok(CallToolResult::success(vec![Content::text(format!(
                "No product at index {} (catalog has {} products)",
                params.0.index,
                self.engine.catalog().len()
            ))])),
        }
    }

    #[tool(description = "Get catalog size, loaded embedding variants and the selected image/text models.")]
    async fn catalog_status(&self) -> Result<CallToolResult, McpError> {
        json_result(&self.engine.status())
    }
}

#[tool_handler]
impl ServerHandler for CatalogService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Product catalog retrieval server. Finds products by image, text description, or both.".to_string()
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Run the MCP server over stdio
pub async fn run_mcp_server(engine: RetrievalEngine, config: RetrievalConfig) -> Result<()> {
    use tokio::io::{stdin, stdout};

    tracing::info!(
        products = engine.catalog().len(),
        default_top_k = config.default_top_k,
        "starting MCP server on stdio"
    );
    let service = CatalogService::new(engine, config);
    let transport = (stdin(), stdout());
    let server = service.serve(transport).await?;
    server.waiting().await?;

    Ok(())
}
