// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use crate::{Tool, ToolCall, ToolContext, ToolOutput};

/// A tool schema as offered to the model; mirrors the model crate's shape
/// but keeps the tools crate independent from it.
#[derive(Debug, Clone)]
pub struct SchemaEntry {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Registry holding every available tool.  Which subset is offered for a
/// given turn depends on the [`ToolContext`] passed to [`Toolbox::schemas`].
pub struct Toolbox {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl Toolbox {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Produce schemas for the tools available under `ctx`, sorted by name
    /// so the catalog sent to the model is stable across turns.
    pub fn schemas(&self, ctx: &ToolContext) -> Vec<SchemaEntry> {
        let mut schemas: Vec<SchemaEntry> = self
            .tools
            .values()
            .filter(|t| t.available(ctx))
            .map(|t| SchemaEntry {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub fn names(&self, ctx: &ToolContext) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .values()
            .filter(|t| t.available(ctx))
            .map(|t| t.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Execute one call.  Unknown or unavailable tools produce an error
    /// output rather than failing the run.
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        match self.tools.get(&call.name) {
            Some(tool) if tool.available(ctx) => tool.execute(call, ctx).await,
            Some(_) => ToolOutput::err(
                &call.id,
                format!("tool not available in this context: {}", call.name),
            ),
            None => ToolOutput::err(&call.id, format!("unknown tool: {}", call.name)),
        }
    }
}

impl Default for Toolbox {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
