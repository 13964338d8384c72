//! MCP (Model Context Protocol) server implementation

use async_trait::async_trait;
use rust_mcp_schema::{
    schema_utils::CallToolError, CallToolRequest, CallToolResult, ContentBlock, Implementation,
    InitializeResult, ListToolsRequest, ListToolsResult, RpcError, ServerCapabilities,
    ServerCapabilitiesTools, TextContent, Tool, ToolInputSchema, LATEST_PROTOCOL_VERSION,
};
use rust_mcp_sdk::{mcp_server::ServerHandler, McpServer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, Instrument};
use uuid::Uuid;

use crate::query::{self, QueryService, EXAMPLE_QUESTIONS};
use crate::translate::QueryTranslator;

/// hsaql MCP Server Handler
pub struct HsaqlServerHandler {
    translator: QueryTranslator,
    queries: QueryService,
}

fn string_property(description: &str) -> Map<String, Value> {
    let mut prop = Map::new();
    prop.insert("type".to_string(), Value::String("string".to_string()));
    prop.insert("description".to_string(), Value::String(description.to_string()));
    prop
}

fn tool(name: &str, description: &str, properties: &[(&str, &str)], required: &[&str]) -> Tool {
    let properties: HashMap<String, Map<String, Value>> = properties
        .iter()
        .map(|(prop, desc)| (prop.to_string(), string_property(desc)))
        .collect();

    Tool {
        name: name.to_string(),
        description: Some(description.to_string()),
        input_schema: ToolInputSchema::new(
            required.iter().map(|r| r.to_string()).collect(),
            Some(properties),
        ),
        title: None,
        annotations: None,
        meta: None,
        output_schema: None,
    }
}

fn text_result(text: String) -> CallToolResult {
    CallToolResult {
        content: vec![ContentBlock::TextContent(TextContent::new(text, None, None))],
        is_error: None,
        meta: None,
        structured_content: None,
    }
}

fn required_str(arguments: &Option<Map<String, Value>>, key: &str) -> Result<String, CallToolError> {
    arguments
        .as_ref()
        .and_then(|args| args.get(key))
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| CallToolError::from_message(format!("Missing required argument: {}", key)))
}

impl HsaqlServerHandler {
    pub fn new(translator: QueryTranslator, queries: QueryService) -> Self {
        Self {
            translator,
            queries,
        }
    }

    /// Create server initialization details
    pub fn server_info() -> InitializeResult {
        InitializeResult {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ServerCapabilitiesTools { list_changed: None }),
                ..Default::default()
            },
            server_info: Implementation {
                name: "hsaql-server".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("HSA Text-to-SQL Server".to_string()),
            },
            instructions: Some(
                "Text-to-SQL over the Tennessee hospital service area dataset (table hsa_data). \
                 Use 'translate' to turn a question into SQL, 'execute' to run SQL, \
                 or 'ask' to do both."
                    .to_string(),
            ),
            meta: None,
        }
    }

    /// Define available MCP tools
    fn tools() -> Vec<Tool> {
        vec![
            tool(
                "translate",
                "Convert a natural language question about the hsa_data table into a SQL query. \
                 The SQL is returned without being executed so it can be reviewed or edited.",
                &[("question", "Natural language question (e.g., 'average total_charges by zip')")],
                &["question"],
            ),
            tool(
                "execute",
                "Execute a SQL query against the hsa_data table and return the result rows as JSON.",
                &[("sql", "SQL statement to run against hsa_data")],
                &["sql"],
            ),
            tool(
                "ask",
                "Answer a question end to end. Input starting with SELECT runs as-is; \
                 anything else is translated to SQL first. Returns the SQL and the results.",
                &[("query", "Natural language question or SELECT statement")],
                &["query"],
            ),
            tool(
                "schema",
                "Describe the hsa_data table: column names and types.",
                &[],
                &[],
            ),
            tool(
                "examples",
                "List example questions that work well with the 'ask' tool.",
                &[],
                &[],
            ),
        ]
    }

    /// Dispatch a tool call by name
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> std::result::Result<CallToolResult, CallToolError> {
        match name {
            "translate" => self.handle_translate_tool(arguments).await,
            "execute" => self.handle_execute_tool(arguments).await,
            "ask" => self.handle_ask_tool(arguments).await,
            "schema" => Ok(self.handle_schema_tool()),
            "examples" => Ok(Self::handle_examples_tool()),
            _ => Err(CallToolError::unknown_tool(name.to_string())),
        }
    }

    async fn handle_translate_tool(
        &self,
        arguments: Option<Map<String, Value>>,
    ) -> std::result::Result<CallToolResult, CallToolError> {
        let question = required_str(&arguments, "question")?;

        info!("Translating question: {}", question);

        let sql = self.translator.translate(&question).await.map_err(|e| {
            error!("Failed to translate question: {}", e);
            CallToolError::from_message(e.to_string())
        })?;

        Ok(text_result(sql))
    }

    async fn handle_execute_tool(
        &self,
        arguments: Option<Map<String, Value>>,
    ) -> std::result::Result<CallToolResult, CallToolError> {
        let sql = required_str(&arguments, "sql")?;

        info!("Executing SQL: {}", sql);

        let table = self.queries.execute(&sql).await.map_err(|e| {
            error!("Failed to execute query: {}", e);
            CallToolError::from_message(format!("Error executing query: {}", e))
        })?;

        let results = query::table_to_json(&table);
        Ok(text_result(
            serde_json::to_string_pretty(&results).unwrap_or_default(),
        ))
    }

    async fn handle_ask_tool(
        &self,
        arguments: Option<Map<String, Value>>,
    ) -> std::result::Result<CallToolResult, CallToolError> {
        let input = required_str(&arguments, "query")?;

        info!("Answering: {}", input);

        let answer = query::ask(&self.translator, &self.queries, &input)
            .await
            .map_err(|e| {
                error!("Failed to answer query: {}", e);
                match &e {
                    query::AskError::Execution { sql, .. } => {
                        CallToolError::from_message(format!("{}\n\nSQL:\n{}", e, sql))
                    }
                    query::AskError::Translation(_) => CallToolError::from_message(e.to_string()),
                }
            })?;

        info!("Query results: {} rows", answer.table.row_count());

        let response_text = format!(
            "Query: {}\n\nSQL:\n{}\n\nResults:\n{}",
            input,
            answer.sql,
            serde_json::to_string_pretty(&query::table_to_json(&answer.table)).unwrap_or_default()
        );

        Ok(text_result(response_text))
    }

    fn handle_schema_tool(&self) -> CallToolResult {
        let schema = self.translator.schema();

        text_result(format!(
            "{}\nJSON:\n{}",
            schema.to_markdown(),
            schema.to_prompt_json()
        ))
    }

    fn handle_examples_tool() -> CallToolResult {
        let lines: Vec<String> = EXAMPLE_QUESTIONS.iter().map(|q| format!("- {}", q)).collect();
        text_result(lines.join("\n"))
    }
}

#[async_trait]
impl ServerHandler for HsaqlServerHandler {
    async fn handle_list_tools_request(
        &self,
        _request: ListToolsRequest,
        _runtime: Arc<dyn McpServer>,
    ) -> std::result::Result<ListToolsResult, RpcError> {
        info!("Listing available tools");

        Ok(ListToolsResult {
            tools: Self::tools(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn handle_call_tool_request(
        &self,
        request: CallToolRequest,
        _runtime: Arc<dyn McpServer>,
    ) -> std::result::Result<CallToolResult, CallToolError> {
        let request_id = Uuid::new_v4();
        let name = request.params.name;
        let arguments = request.params.arguments;
        let span = tracing::info_span!("tool_call", %request_id, tool = %name);

        async move {
            info!("Tool called");
            self.call_tool(&name, arguments).await
        }
        .instrument(span)
        .await
    }
}
