//! Tool trait, registry, and model-facing schemas.
//!
//! The three virtual shell operations are registered as [`Tool`]s and
//! dispatched by name from the agent loop. Each tool declares an OpenAI
//! function-calling parameter schema; the same registry builds the schema
//! list sent to the model provider and resolves incoming calls, so the two
//! can never drift apart.

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::error::ToolError;
use crate::shell;

/// Per-session execution context: the shared store plus the repository this
/// conversation is scoped to. All tools are pure reads.
#[derive(Clone)]
pub struct ToolContext {
    pub pool: SqlitePool,
    pub repo_id: String,
}

impl ToolContext {
    pub fn new(pool: SqlitePool, repo_id: impl Into<String>) -> Self {
        Self {
            pool,
            repo_id: repo_id.into(),
        }
    }
}

/// A virtual shell operation the model can call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier used in tool-call requests.
    fn name(&self) -> &str;

    /// One-line description for the model's tool list.
    fn description(&self) -> &str;

    /// OpenAI function-calling JSON Schema for parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute with parsed parameters. Returns rendered text for the model.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String, ToolError>;
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing required parameter: {}", key)))
}

// ============ list_files ============

pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files and directories in the repository. Pass a directory path to list its \
         contents (like `ls`), or use glob patterns (*, **, ?) to search recursively \
         (like `find`). Use '' for the repo root, '**/*.py' for all Python files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory path to list, or glob pattern to search. \
                        Use '' for repo root. Use ** for recursive matching; * and ? \
                        do not cross directory separators."
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let path = required_str(&params, "path")?;
        shell::list_files(&ctx.pool, &ctx.repo_id, path).await
    }
}

// ============ read_file ============

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file, optionally a specific line range. Omit bounds for \
         the whole file, pass end_line alone for the first N lines, a negative \
         start_line for the last N lines, or both bounds for an inclusive range."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to read."
                },
                "start_line": {
                    "type": "integer",
                    "description": "Start line (1-indexed). Negative values count from \
                        the end: -10 means last 10 lines."
                },
                "end_line": {
                    "type": "integer",
                    "description": "End line (1-indexed, inclusive)."
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let path = required_str(&params, "path")?;
        let start_line = params.get("start_line").and_then(|v| v.as_i64());
        let end_line = params.get("end_line").and_then(|v| v.as_i64());
        shell::read_file(&ctx.pool, &ctx.repo_id, path, start_line, end_line).await
    }
}

// ============ search_code ============

pub struct SearchCodeTool;

#[async_trait]
impl Tool for SearchCodeTool {
    fn name(&self) -> &str {
        "search_code"
    }

    fn description(&self) -> &str {
        "Search for a regex pattern across all files in the repository. Returns matching \
         lines with file paths and line numbers, formatted like ripgrep output \
         (path:line:content). Matching is case-sensitive and line-by-line."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regex pattern to search for in file contents."
                },
                "glob": {
                    "type": "string",
                    "description": "Optional file filter. Use '*.py' for Python files, \
                        'test_*' for test files, etc."
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let pattern = required_str(&params, "pattern")?;
        let glob = params.get("glob").and_then(|v| v.as_str());
        shell::search_code(&ctx.pool, &ctx.repo_id, pattern, glob).await
    }
}

// ============ Registry ============

/// Registry of callable tools. The agent loop resolves calls through
/// [`find`](ToolRegistry::find) and advertises [`schemas`](ToolRegistry::schemas).
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry pre-loaded with the three virtual shell tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ListFilesTool));
        registry.register(Box::new(ReadFileTool));
        registry.register(Box::new(SearchCodeTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Tool declarations in OpenAI function-calling format.
    pub fn schemas(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name(),
                        "description": t.description(),
                        "parameters": t.parameters_schema(),
                    }
                })
            })
            .collect()
    }

    /// Dispatch one call by name.
    pub async fn execute(
        &self,
        name: &str,
        params: Value,
        ctx: &ToolContext,
    ) -> Result<String, ToolError> {
        let tool = self
            .find(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.execute(params, ctx).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = ToolRegistry::with_builtins();
        assert!(registry.find("list_files").is_some());
        assert!(registry.find("read_file").is_some());
        assert!(registry.find("search_code").is_some());
        assert!(registry.find("rm_rf").is_none());
    }

    #[test]
    fn test_schemas_shape() {
        let registry = ToolRegistry::with_builtins();
        let schemas = registry.schemas();
        assert_eq!(schemas.len(), 3);
        for schema in &schemas {
            assert_eq!(schema["type"], "function");
            assert_eq!(schema["function"]["parameters"]["type"], "object");
        }
    }
}
