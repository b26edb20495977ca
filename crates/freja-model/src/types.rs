// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

use freja_thread::ThreadEvent;

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: serde_json::Value,
}

/// Thread identity forwarded with every completion so providers can key
/// prompt caches and telemetry on the conversation.
#[derive(Debug, Clone, Default)]
pub struct ThreadMeta {
    pub thread_id: String,
    pub thread_name: String,
    pub username: String,
}

/// Request sent to a model provider.
///
/// `events` is the already-budgeted chronological slice of the conversation
/// log; the provider maps it into its wire format.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub events: Vec<ThreadEvent>,
    pub system_prompt: Option<String>,
    pub tools: Vec<ToolSchema>,
    /// Model selector forwarded verbatim to the provider API.
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub meta: ThreadMeta,
}

/// A single streamed event from the model.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    /// A text chunk streamed from the model
    TextDelta(String),
    /// The model wants to call a tool
    ToolCall {
        /// Parallel-call slot; providers that interleave argument chunks
        /// key them by this index.
        index: u32,
        id: String,
        name: String,
        /// Accumulated raw JSON arguments (may arrive across multiple deltas)
        arguments: String,
    },
    /// Incremental usage statistics.  Streams must surface these so the run
    /// loop can enforce price and iteration limits mid-turn.
    Usage {
        input_tokens: u64,
        output_tokens: u64,
        cache_read_tokens: u64,
        cache_write_tokens: u64,
    },
    /// The stream finished normally
    Done,
    /// A recoverable error (non-fatal warning)
    Error(String),
}

/// Token usage from one turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, input: u64, output: u64, cache_read: u64, cache_write: u64) {
        self.input_tokens += input;
        self.output_tokens += output;
        self.cache_read_tokens += cache_read;
        self.cache_write_tokens += cache_write;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_add_accumulates() {
        let mut u = Usage::default();
        u.add(10, 2, 0, 0);
        u.add(5, 1, 3, 4);
        assert_eq!(u.input_tokens, 15);
        assert_eq!(u.output_tokens, 3);
        assert_eq!(u.cache_read_tokens, 3);
        assert_eq!(u.cache_write_tokens, 4);
    }

    #[test]
    fn tool_schema_serialises_correctly() {
        let ts = ToolSchema {
            name: "my_tool".into(),
            description: "desc".into(),
            parameters: serde_json::json!({ "type": "object" }),
        };
        let json = serde_json::to_string(&ts).unwrap();
        assert!(json.contains("my_tool"));
        assert!(json.contains("desc"));
    }

    #[test]
    fn completion_request_default_is_empty() {
        let req = CompletionRequest::default();
        assert!(req.events.is_empty());
        assert!(req.tools.is_empty());
        assert!(req.model.is_none());
    }
}
