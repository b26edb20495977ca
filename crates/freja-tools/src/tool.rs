// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Raw JSON argument text.  Kept verbatim because the conversation log
    /// deduplicates identical calls by string equality on `(name, args)`.
    pub args: String,
}

impl ToolCall {
    /// Parse the raw argument text into a JSON value.
    pub fn parsed_args(&self) -> anyhow::Result<Value> {
        if self.args.is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        Ok(serde_json::from_str(&self.args)?)
    }

    /// Convenience accessor for a required string argument.
    pub fn str_arg(&self, key: &str) -> anyhow::Result<String> {
        let value = self.parsed_args()?;
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("missing required parameter: {key}"))
    }
}

/// The result of executing a tool.  Outputs are always strings; tools that
/// produce structured data embed JSON in the text.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    /// If true, the tool execution failed non-fatally (the content is an
    /// error message the model is expected to recover from).
    pub is_error: bool,
}

impl ToolOutput {
    /// Successful plain-text result.
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Error result containing a plain-text error message.
    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: msg.into(),
            is_error: true,
        }
    }
}

/// The slice of command context that decides which tools are offered and
/// how far they may reach.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Tool calls touching paths outside this directory are refused.
    pub project_root: Option<PathBuf>,
    /// How many delegation levels below the root this agent runs at.
    pub delegation_depth: u32,
    /// Names of enabled external integrations (jira, basecamp, …).
    pub integrations: Vec<String>,
}

impl ToolContext {
    pub fn has_integration(&self, name: &str) -> bool {
        self.integrations.iter().any(|i| i == name)
    }
}

/// Trait that every tool must implement.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;
    /// Whether this tool is offered under the given context.
    /// Default: always available.
    fn available(&self, _ctx: &ToolContext) -> bool {
        true
    }
    /// Execute the tool.  Failures should be wrapped in [`ToolOutput::err`];
    /// the run loop never propagates tool errors.
    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
