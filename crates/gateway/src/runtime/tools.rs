//! Tool registry: named callables the model may invoke mid-turn.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use cg_domain::error::{Error, Result};
use cg_domain::memory::{MemoryCategory, MemoryScope};
use cg_domain::tool::{ToolCall, ToolDefinition};
use cg_memory::{MemoryIngestRequest, MemoryStore};

/// Who a tool call runs on behalf of.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub principal: String,
    pub app_id: Option<String>,
    pub thread_id: String,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Run the tool. The returned string is fed back to the model.
    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<String>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in tools.
    pub fn with_builtins(memory: Arc<dyn MemoryStore>) -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(SaveMemoryTool::new(memory)));
        reg
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.definition().name, tool);
    }

    /// Definitions sent to the model, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute one call. Failures are reported back to the model as an
    /// error result rather than aborting the turn.
    pub async fn dispatch(&self, ctx: &ToolContext, call: &ToolCall) -> (String, bool) {
        let Some(tool) = self.tools.get(&call.tool_name) else {
            tracing::warn!(tool = %call.tool_name, "model called an unknown tool");
            return (format!("unknown tool: {}", call.tool_name), true);
        };
        match tool.call(ctx, call.arguments.clone()).await {
            Ok(out) => (out, false),
            Err(e) => {
                tracing::warn!(tool = %call.tool_name, error = %e, "tool call failed");
                (format!("tool failed: {}", e.public_message()), true)
            }
        }
    }
}

// ── save_memory ─────────────────────────────────────────────────────

pub struct SaveMemoryTool {
    memory: Arc<dyn MemoryStore>,
}

#[derive(Deserialize)]
struct SaveMemoryArgs {
    content: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    importance: Option<u8>,
    #[serde(default)]
    scope: Option<MemoryScope>,
}

impl SaveMemoryTool {
    pub fn new(memory: Arc<dyn MemoryStore>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for SaveMemoryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "save_memory".into(),
            description: "Remember a durable fact or preference about the user for future conversations."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "content": { "type": "string", "description": "The fact to remember, in one sentence" },
                    "category": {
                        "type": "string",
                        "enum": ["preference", "fact", "context", "instruction", "relationship", "goal"]
                    },
                    "importance": { "type": "integer", "minimum": 0, "maximum": 10 },
                    "scope": { "type": "string", "enum": ["user", "app"] }
                },
                "required": ["content"]
            }),
        }
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<String> {
        let args: SaveMemoryArgs = serde_json::from_value(args)
            .map_err(|e| Error::Validation(format!("save_memory arguments: {e}")))?;
        let content = args.content.trim();
        if content.is_empty() {
            return Err(Error::Validation("save_memory needs non-empty content".into()));
        }

        let scope = args.scope.unwrap_or(MemoryScope::User);
        let owner = match scope {
            MemoryScope::User => ctx.principal.clone(),
            MemoryScope::App => ctx
                .app_id
                .clone()
                .ok_or_else(|| Error::Validation("no app in scope for an app memory".into()))?,
        };
        let category = args
            .category
            .as_deref()
            .and_then(MemoryCategory::parse)
            .unwrap_or(MemoryCategory::Fact);

        let item = self
            .memory
            .ingest(MemoryIngestRequest {
                owner,
                scope,
                content: content.to_owned(),
                category,
                importance: args.importance.unwrap_or(5).min(10),
                source_thread_id: Some(ctx.thread_id.clone()),
            })
            .await?;
        Ok(format!("saved memory {}", item.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_memory::InMemoryStore;

    fn ctx() -> ToolContext {
        ToolContext {
            principal: "m1".into(),
            app_id: None,
            thread_id: "th".into(),
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
    async fn save_memory_ingests_for_principal() {
        let store = Arc::new(InMemoryStore::new());
        let reg = ToolRegistry::with_builtins(store.clone());
        let (out, is_error) = reg
            .dispatch(
                &ctx(),
                &call("save_memory", serde_json::json!({"content": "likes green tea", "category": "preference"})),
            )
            .await;
        assert!(!is_error, "{out}");
        assert!(out.starts_with("saved memory "));

        let mems = store.personal_memories("m1", "other", 10).await.unwrap();
        assert_eq!(mems.len(), 1);
        assert_eq!(mems[0].category, MemoryCategory::Preference);
    }

    #[tokio::test]
    async fn app_scope_without_app_is_an_error_result() {
        let reg = ToolRegistry::with_builtins(Arc::new(InMemoryStore::new()));
        let (out, is_error) = reg
            .dispatch(&ctx(), &call("save_memory", serde_json::json!({"content": "x", "scope": "app"})))
            .await;
        assert!(is_error);
        assert!(out.contains("no app in scope"));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported() {
        let reg = ToolRegistry::new();
        let (out, is_error) = reg.dispatch(&ctx(), &call("launch", Value::Null)).await;
        assert!(is_error);
        assert_eq!(out, "unknown tool: launch");
        assert!(reg.definitions().is_empty());
    }
}
