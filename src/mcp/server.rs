use std::sync::Arc;

use rmcp::handler::server::ServerHandler;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, Implementation, ListToolsResult,
    PaginatedRequestParams, ServerCapabilities, ServerInfo, Tool, ToolsCapability,
};
use rmcp::service::RequestContext;
use rmcp::{ErrorData as McpError, RoleServer};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use api_indexer::server::QueryServer;

#[derive(Clone)]
pub struct McpServer {
    server: Arc<QueryServer>,
}

impl McpServer {
    pub fn new(server: Arc<QueryServer>) -> Self {
        Self { server }
    }

    async fn dispatch(
        &self,
        name: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<CallToolResult, McpError> {
        let result = match name {
            "list_modules" => {
                let params: ListModulesParams = parse_params(arguments)?;
                let page = params.page.unwrap_or(1);
                to_result(
                    self.server
                        .list_modules(params.repository.as_deref(), page)
                        .await,
                )
            }
            "inspect_symbol" => {
                let params: InspectSymbolParams = parse_params(arguments)?;
                to_result(
                    self.server
                        .inspect_symbol(params.repository.as_deref(), &params.fqn)
                        .await,
                )
            }
            "read_source_code" => {
                let params: ReadSourceCodeParams = parse_params(arguments)?;
                to_result(
                    self.server
                        .read_source_code(params.repository.as_deref(), &params.fqn)
                        .await,
                )
            }
            "search_knowledge" => {
                let params: SearchKnowledgeParams = parse_params(arguments)?;
                let queries = params.all_queries();
                if queries.is_empty() {
                    return Err(McpError::invalid_params(
                        "at least one query is required",
                        None,
                    ));
                }
                to_result(
                    self.server
                        .search_knowledge(params.repository.as_deref(), &queries, params.limit)
                        .await,
                )
            }
            _ => {
                return Err(McpError::invalid_params(
                    format!("Unknown tool: {}", name),
                    None,
                ));
            }
        };

        Ok(result)
    }
}

fn parse_params<T: DeserializeOwned>(
    arguments: serde_json::Map<String, serde_json::Value>,
) -> Result<T, McpError> {
    serde_json::from_value(serde_json::Value::Object(arguments))
        .map_err(|e| McpError::invalid_params(e.to_string(), None))
}

fn to_result<T: Serialize>(result: api_indexer::Result<T>) -> CallToolResult {
    match result {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(json) => CallToolResult::success(vec![Content::text(json)]),
            Err(e) => CallToolResult::error(vec![Content::text(e.to_string())]),
        },
        Err(e) => CallToolResult::error(vec![Content::text(e.to_string())]),
    }
}

fn schema_for<T: JsonSchema>() -> Arc<serde_json::Map<String, serde_json::Value>> {
    let schema = schemars::schema_for!(T);
    match serde_json::to_value(&schema) {
        Ok(serde_json::Value::Object(map)) => Arc::new(map),
        _ => Arc::new(serde_json::Map::new()),
    }
}

fn tool<T: JsonSchema>(name: &'static str, title: &str, description: &str) -> Tool {
    Tool {
        name: name.into(),
        title: Some(title.to_string()),
        description: Some(description.to_string().into()),
        input_schema: schema_for::<T>(),
        output_schema: None,
        annotations: None,
        icons: None,
        meta: None,
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ListModulesParams {
    /// Repository name (optional when only one is configured)
    #[serde(default)]
    pub repository: Option<String>,
    /// 1-indexed page number (default: 1)
    #[serde(default)]
    pub page: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct InspectSymbolParams {
    /// Fully-qualified name, e.g. package.module.Class.method
    pub fqn: String,
    #[serde(default)]
    pub repository: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ReadSourceCodeParams {
    /// Fully-qualified name of a class, function or method
    pub fqn: String,
    #[serde(default)]
    pub repository: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchKnowledgeParams {
    /// One or more sub-queries; scores are summed across them
    #[serde(default)]
    pub queries: Vec<String>,
    /// Single query, merged with `queries`
    #[serde(default)]
    pub query: Option<String>,
    /// Maximum number of results
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub repository: Option<String>,
}

impl SearchKnowledgeParams {
    fn all_queries(&self) -> Vec<String> {
        self.query
            .iter()
            .chain(self.queries.iter())
            .map(|q| q.trim())
            .filter(|q| !q.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
                ..Default::default()
            },
            server_info: Implementation {
                name: "api-indexer".to_string(),
                title: Some("API Indexer".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Ranked knowledge of a Python library's public API. \
                 Start with list_modules, then inspect_symbol or read_source_code \
                 for details, and search_knowledge to find symbols by intent."
                    .to_string(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let tools = vec![
            tool::<ListModulesParams>(
                "list_modules",
                "List Modules",
                "Paginated list of the library's most important classes and functions, ranked by real-world usage",
            ),
            tool::<InspectSymbolParams>(
                "inspect_symbol",
                "Inspect Symbol",
                "Signature, docstring, bases and members of a symbol by fully-qualified name",
            ),
            tool::<ReadSourceCodeParams>(
                "read_source_code",
                "Read Source Code",
                "Exact source text of a symbol from the indexed checkout",
            ),
            tool::<SearchKnowledgeParams>(
                "search_knowledge",
                "Search Knowledge",
                "Search indexed symbols with one or more natural-language or identifier queries",
            ),
        ];

        Ok(ListToolsResult {
            next_cursor: None,
            tools,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.dispatch(request.name.as_ref(), request.arguments.unwrap_or_default())
            .await
    }
}
