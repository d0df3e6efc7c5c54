//! Tool contract and per-generation tool sets.
//!
//! The host registers local tools, MCP servers and an optional search
//! backend once. Before each generation the registry assembles the tools
//! the assistant opted into; every tool in the resulting [`ToolSet`]
//! reports failures as a JSON `{"error": ...}` result instead of aborting
//! the generation.

use std::collections::HashMap;
use std::sync::Arc;

use parley_domain::config::{AssistantSetting, SearchServiceSetting, Settings};
use parley_domain::error::{Error, Result};
use parley_domain::tool::{mcp_tool_name, ToolCall, ToolDefinition};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Collaborator traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A callable tool.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn execute(&self, arguments: Value) -> Result<Value>;
}

/// One connected MCP server.
#[async_trait::async_trait]
pub trait McpToolSource: Send + Sync {
    /// Server name used in the `mcp__{server}__{tool}` prefix.
    fn server(&self) -> &str;

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>>;

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value>;
}

/// Web search backend.
#[async_trait::async_trait]
pub trait SearchService: Send + Sync {
    async fn search(&self, service: &SearchServiceSetting, query: &str) -> Result<Value>;

    async fn scrape(&self, service: &SearchServiceSetting, url: &str) -> Result<Value>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct McpTool {
    source: Arc<dyn McpToolSource>,
    /// Name on the server, without the prefix.
    remote_name: String,
    definition: ToolDefinition,
}

#[async_trait::async_trait]
impl Tool for McpTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn execute(&self, arguments: Value) -> Result<Value> {
        self.source.call_tool(&self.remote_name, arguments).await
    }
}

const SEARCH_TOOL: &str = "search_web";
const SCRAPE_TOOL: &str = "scrape_web";

struct SearchTool {
    backend: Arc<dyn SearchService>,
    service: SearchServiceSetting,
}

#[async_trait::async_trait]
impl Tool for SearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            SEARCH_TOOL,
            format!(
                "Search the web and return up to {} results with titles, URLs and snippets.",
                self.service.result_size
            ),
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search keywords" }
                },
                "required": ["query"]
            }),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<Value> {
        let query = arguments
            .get("query")
            .and_then(Value::as_str)
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| Error::tool(SEARCH_TOOL, "missing \"query\""))?;
        self.backend.search(&self.service, query).await
    }
}

struct ScrapeTool {
    backend: Arc<dyn SearchService>,
    service: SearchServiceSetting,
}

#[async_trait::async_trait]
impl Tool for ScrapeTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            SCRAPE_TOOL,
            "Fetch a web page and return its readable content.",
            json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "Absolute URL to fetch" }
                },
                "required": ["url"]
            }),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<Value> {
        let url = arguments
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::tool(SCRAPE_TOOL, "missing \"url\""))?;
        self.backend.scrape(&self.service, url).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct ToolRegistry {
    local: HashMap<String, Arc<dyn Tool>>,
    mcp: HashMap<String, Arc<dyn McpToolSource>>,
    search: Option<Arc<dyn SearchService>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_local(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        tracing::debug!(tool = %name, "registered local tool");
        self.local.insert(name, tool);
    }

    pub fn register_mcp(&mut self, source: Arc<dyn McpToolSource>) {
        tracing::debug!(server = %source.server(), "registered MCP server");
        self.mcp.insert(source.server().to_owned(), source);
    }

    pub fn set_search(&mut self, backend: Arc<dyn SearchService>) {
        self.search = Some(backend);
    }

    pub fn with_local(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register_local(tool);
        self
    }

    pub fn with_mcp(mut self, source: Arc<dyn McpToolSource>) -> Self {
        self.register_mcp(source);
        self
    }

    pub fn with_search(mut self, backend: Arc<dyn SearchService>) -> Self {
        self.set_search(backend);
        self
    }

    /// Assemble the tools `assistant` opted into.
    ///
    /// Unknown local tool names and unreachable MCP servers are skipped
    /// with a warning. `Err(Cancelled)` once `cancel` fires.
    pub async fn tool_set(
        &self,
        settings: &Settings,
        assistant: &AssistantSetting,
        cancel: &CancellationToken,
    ) -> Result<ToolSet> {
        let mut tools: Vec<Arc<dyn Tool>> = Vec::new();

        if assistant.search_enabled {
            match (&self.search, settings.search.selected_service()) {
                (Some(backend), Some(service)) => {
                    tools.push(Arc::new(SearchTool {
                        backend: backend.clone(),
                        service: service.clone(),
                    }));
                    if service.scrape {
                        tools.push(Arc::new(ScrapeTool {
                            backend: backend.clone(),
                            service: service.clone(),
                        }));
                    }
                }
                _ => tracing::warn!(
                    assistant_id = %assistant.id,
                    "search enabled but no search service is available"
                ),
            }
        }

        for name in &assistant.local_tools {
            match self.local.get(name) {
                Some(tool) => tools.push(tool.clone()),
                None => tracing::warn!(tool = %name, "assistant references unknown local tool"),
            }
        }

        for server in &assistant.mcp_servers {
            let Some(source) = self.mcp.get(server) else {
                tracing::warn!(server = %server, "assistant references unknown MCP server");
                continue;
            };
            let listed = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                listed = source.list_tools() => listed,
            };
            match listed {
                Ok(defs) => {
                    for def in defs {
                        let remote_name = def.name.clone();
                        let definition = ToolDefinition {
                            name: mcp_tool_name(server, &def.name),
                            ..def
                        };
                        tools.push(Arc::new(McpTool {
                            source: source.clone(),
                            remote_name,
                            definition,
                        }));
                    }
                }
                Err(e) => {
                    tracing::warn!(server = %server, error = %e, "listing MCP tools failed")
                }
            }
        }

        Ok(ToolSet::new(tools))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolSet
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The tools offered to the model for one generation.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self { tools }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    fn find(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.definition().name == name)
    }

    /// Run one call. Never fails: errors become the textual result.
    pub async fn execute(&self, call: &ToolCall) -> Value {
        let Some(tool) = self.find(&call.tool_name) else {
            return json!({ "error": format!("tool \"{}\" is not available", call.tool_name) });
        };
        let span = tracing::info_span!("tool.call", tool_name = %call.tool_name);
        match tool.execute(call.arguments.clone()).instrument(span).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(tool = %call.tool_name, error = %e, "tool call failed");
                json!({ "error": e.to_string() })
            }
        }
    }

    /// Run all calls concurrently; results keep the input order.
    pub async fn execute_all(&self, calls: &[ToolCall]) -> Vec<Value> {
        futures_util::future::join_all(calls.iter().map(|c| self.execute(c))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait::async_trait]
    impl Tool for Echo {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("echo", "Echo arguments", json!({"type": "object"}))
        }

        async fn execute(&self, arguments: Value) -> Result<Value> {
            Ok(arguments)
        }
    }

    struct Broken;

    #[async_trait::async_trait]
    impl Tool for Broken {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("broken", "Always fails", json!({"type": "object"}))
        }

        async fn execute(&self, _arguments: Value) -> Result<Value> {
            Err(Error::tool("broken", "disk on fire"))
        }
    }

    struct Files;

    #[async_trait::async_trait]
    impl McpToolSource for Files {
        fn server(&self) -> &str {
            "files"
        }

        async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
            Ok(vec![ToolDefinition::new("read", "Read a file", json!({}))])
        }

        async fn call_tool(&self, tool: &str, _arguments: Value) -> Result<Value> {
            Ok(json!({ "called": tool }))
        }
    }

    struct Stalled;

    #[async_trait::async_trait]
    impl McpToolSource for Stalled {
        fn server(&self) -> &str {
            "stalled"
        }

        async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
            std::future::pending().await
        }

        async fn call_tool(&self, _tool: &str, _arguments: Value) -> Result<Value> {
            std::future::pending().await
        }
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            call_id: "c1".into(),
            tool_name: name.into(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn failures_become_error_results() {
        let set = ToolSet::new(vec![Arc::new(Echo), Arc::new(Broken)]);
        let results = set
            .execute_all(&[
                call("echo", json!({"x": 1})),
                call("broken", json!({})),
                call("missing", json!({})),
            ])
            .await;
        assert_eq!(results[0], json!({"x": 1}));
        assert_eq!(results[1]["error"], "tool broken: disk on fire");
        assert!(results[2]["error"].as_str().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn mcp_tools_are_prefixed_and_routed() {
        let registry = ToolRegistry::new()
            .with_local(Arc::new(Echo))
            .with_mcp(Arc::new(Files));
        let mut assistant = AssistantSetting::new("Ada");
        assistant.local_tools = vec!["echo".into(), "nope".into()];
        assistant.mcp_servers = vec!["files".into()];

        let set = registry
            .tool_set(&Settings::default(), &assistant, &CancellationToken::new())
            .await
            .unwrap();
        let names: Vec<_> = set.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["echo", "mcp__files__read"]);

        let out = set.execute(&call("mcp__files__read", json!({}))).await;
        assert_eq!(out, json!({"called": "read"}));
    }

    #[tokio::test]
    async fn search_without_backend_is_skipped() {
        let registry = ToolRegistry::new();
        let mut assistant = AssistantSetting::new("Ada");
        assistant.search_enabled = true;
        let set = registry
            .tool_set(&Settings::default(), &assistant, &CancellationToken::new())
            .await
            .unwrap();
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn cancel_interrupts_a_stalled_mcp_listing() {
        let registry = ToolRegistry::new().with_mcp(Arc::new(Stalled));
        let mut assistant = AssistantSetting::new("Ada");
        assistant.mcp_servers = vec!["stalled".into()];
        let cancel = CancellationToken::new();

        let settings = Settings::default();
        let listing = registry.tool_set(&settings, &assistant, &cancel);
        let canceller = async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            tokio::join!(listing, canceller)
        })
        .await
        .expect("listing ignored cancellation");
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
