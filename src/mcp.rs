//! MCP server over stdio.
//!
//! Exposes two tools to MCP clients such as Cursor:
//!
//! * `get_motoko_context` returns ranked Motoko samples for a query.
//! * `generate_motoko_code` retrieves samples and asks the model to write code.
//!
//! stdout carries the JSON-RPC stream, so all logging goes to stderr.
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "motoko-coder": {
//!       "command": "mrag",
//!       "args": ["--config", "/path/to/mrag.toml", "serve", "mcp"]
//!     }
//!   }
//! }
//! ```

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler};
use serde_json::{json, Map, Value};

use crate::config::Config;
use crate::db;
use crate::error::Error;
use crate::prompt::format_code_context;
use crate::rag::RagEngine;
use crate::store::SqliteVectorStore;

pub const SERVER_NAME: &str = "motoko-coder-mcp";

const CONTEXT_TOOL: &str = "get_motoko_context";
const CODEGEN_TOOL: &str = "generate_motoko_code";

#[derive(Clone)]
pub struct MotokoMcp {
    rag: Arc<RagEngine>,
    default_results: usize,
}

impl MotokoMcp {
    pub fn new(rag: Arc<RagEngine>, default_results: usize) -> Self {
        Self {
            rag,
            default_results,
        }
    }

    fn tools() -> Vec<Tool> {
        vec![
            make_tool(
                CONTEXT_TOOL,
                "Retrieve relevant Motoko code context for the given query using RAG",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "The query or code context to search for relevant Motoko examples"
                        },
                        "max_results": {
                            "type": "integer",
                            "description": "Maximum number of context results to return (default: 5)",
                            "default": 5
                        }
                    },
                    "required": ["query"]
                }),
            ),
            make_tool(
                CODEGEN_TOOL,
                "Generate Motoko code with retrieved example context",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "The request for Motoko code generation"
                        },
                        "max_context_results": {
                            "type": "integer",
                            "description": "Maximum number of context results to retrieve (default: 5)",
                            "default": 5
                        }
                    },
                    "required": ["query"]
                }),
            ),
        ]
    }

    /// Run a tool by name and return its text output.
    pub async fn call_named_tool(&self, name: &str, args: &Map<String, Value>) -> Result<String, McpError> {
        match name {
            CONTEXT_TOOL => {
                let query = required_query(args)?;
                let max = count_arg(args, "max_results", self.default_results);
                let items = self.rag.code_context(query, max).await;
                Ok(format_code_context(query, &items))
            }
            CODEGEN_TOOL => {
                let query = required_query(args)?;
                let max = count_arg(args, "max_context_results", self.default_results);
                self.rag.generate_code(query, max).await.map_err(to_mcp_error)
            }
            other => Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("Method '{}' not found", other),
                None,
            )),
        }
    }
}

fn make_tool(name: &str, description: &str, schema: Value) -> Tool {
    let input_schema = match schema {
        Value::Object(map) => Arc::new(map),
        _ => Arc::new(Map::new()),
    };
    Tool {
        name: Cow::Owned(name.to_string()),
        title: None,
        description: Some(Cow::Owned(description.to_string())),
        input_schema,
        output_schema: None,
        annotations: Some(ToolAnnotations::new().read_only(true)),
        execution: None,
        icons: None,
        meta: None,
    }
}

fn required_query(args: &Map<String, Value>) -> Result<&str, McpError> {
    args.get("query")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| {
            McpError::new(
                ErrorCode::INVALID_PARAMS,
                "Query parameter is required".to_string(),
                None,
            )
        })
}

fn count_arg(args: &Map<String, Value>, key: &str, default: usize) -> usize {
    args.get(key)
        .and_then(Value::as_u64)
        .map(|n| n as usize)
        .unwrap_or(default)
}

fn to_mcp_error(err: Error) -> McpError {
    let code = ErrorCode(err.jsonrpc_code());
    let message = if code == ErrorCode::INTERNAL_ERROR {
        format!("Internal error: {}", err)
    } else {
        err.to_string()
    };
    McpError::new(code, message, None)
}

impl ServerHandler for MotokoMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                title: Some("Motoko Coder".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some(
                    "MCP server for Motoko code generation with RAG context retrieval".to_string(),
                ),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Use get_motoko_context to fetch example Motoko code for a task, \
                 or generate_motoko_code to have code written from those examples."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult::with_all_items(Self::tools())))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        Self::tools().into_iter().find(|t| t.name == name)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let args = request.arguments.unwrap_or_default();
        tracing::info!(tool = %request.name, "tool call");
        let text = self.call_named_tool(&request.name, &args).await?;
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}

/// Serve MCP on stdin/stdout until the client disconnects.
pub async fn run_mcp_stdio(config: &Config) -> anyhow::Result<()> {
    use rmcp::ServiceExt;

    let pool = db::connect(config).await?;
    let store = Arc::new(SqliteVectorStore::new(pool.clone()));
    let rag = Arc::new(RagEngine::from_config(config, store)?);
    let handler = MotokoMcp::new(rag, config.retrieval.mcp_default_results);

    tracing::info!(server = SERVER_NAME, "MCP server ready on stdio");
    handler
        .serve(rmcp::transport::stdio())
        .await?
        .waiting()
        .await?;

    pool.close().await;
    Ok(())
}
