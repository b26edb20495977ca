// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// Who authored a message event.  Tool traffic carries no role; system
/// prompts never enter the log (they are injected per-request).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Label used when rendering the event to text.
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single content part in a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    /// Reference to an image by URL or data URL; the provider layer decides
    /// how (and whether) to transmit it.
    ImageRef { url: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self::ImageRef { url: url.into() }
    }

    fn char_len(&self) -> usize {
        match self {
            ContentPart::Text { text } => text.chars().count(),
            ContentPart::ImageRef { url } => url.chars().count(),
        }
    }
}

/// One record in the persisted conversation log.
///
/// `timestamp` is a per-thread monotonic sequence number assigned on append;
/// it is the event's stable identity and survives forks and persistence.
/// Only these four variants are ever written to disk; UI traffic uses a
/// separate, non-historical event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThreadEvent {
    Message {
        role: Role,
        name: String,
        parts: Vec<ContentPart>,
        timestamp: u64,
    },
    ToolRequest {
        request_id: String,
        name: String,
        /// Raw JSON argument text, kept verbatim.  Deduplication compares
        /// this string byte-for-byte, so callers must pass textually stable
        /// arguments.
        args: String,
        timestamp: u64,
    },
    ToolResponse {
        request_id: String,
        output: String,
        timestamp: u64,
    },
    /// Produced by the compactor; replaces an overflowing prefix of the log.
    Summary {
        summary_of: Vec<u64>,
        text: String,
        timestamp: u64,
    },
}

impl ThreadEvent {
    pub fn timestamp(&self) -> u64 {
        match self {
            ThreadEvent::Message { timestamp, .. }
            | ThreadEvent::ToolRequest { timestamp, .. }
            | ThreadEvent::ToolResponse { timestamp, .. }
            | ThreadEvent::Summary { timestamp, .. } => *timestamp,
        }
    }

    pub fn is_message(&self) -> bool {
        matches!(self, ThreadEvent::Message { .. })
    }

    /// Rendered length in code points.  This is the budget metric: role
    /// label + author name + content parts for messages, tool name + raw
    /// args for requests, output for responses, text for summaries.
    pub fn char_len(&self) -> usize {
        match self {
            ThreadEvent::Message { role, name, parts, .. } => {
                role.label().chars().count()
                    + name.chars().count()
                    + parts.iter().map(ContentPart::char_len).sum::<usize>()
            }
            ThreadEvent::ToolRequest { name, args, .. } => {
                name.chars().count() + args.chars().count()
            }
            ThreadEvent::ToolResponse { output, .. } => output.chars().count(),
            ThreadEvent::Summary { text, .. } => text.chars().count(),
        }
    }

    /// Plain-text rendering used for compaction prompts and debug output.
    pub fn render(&self) -> String {
        match self {
            ThreadEvent::Message { role, name, parts, .. } => {
                let body = parts
                    .iter()
                    .map(|p| match p {
                        ContentPart::Text { text } => text.clone(),
                        ContentPart::ImageRef { url } => format!("[image: {url}]"),
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                format!("{} {name}: {body}", role.label())
            }
            ThreadEvent::ToolRequest { name, args, .. } => {
                format!("[tool_request: {name}({args})]")
            }
            ThreadEvent::ToolResponse { output, .. } => {
                format!("[tool_response: {output}]")
            }
            ThreadEvent::Summary { text, .. } => format!("[summary: {text}]"),
        }
    }
}

/// Unvalidated tool request as it arrives from the model stream.  Entries
/// with an empty id, name, or args are dropped on append.
#[derive(Debug, Clone)]
pub struct ToolRequestDraft {
    pub request_id: String,
    pub name: String,
    pub args: String,
}

/// Unvalidated tool response as it arrives from the dispatcher.  Entries
/// whose id matches no logged request are dropped on append.
#[derive(Debug, Clone)]
pub struct ToolResponseDraft {
    pub request_id: String,
    pub output: String,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_char_len_counts_role_name_and_parts() {
        let ev = ThreadEvent::Message {
            role: Role::User,
            name: "bob".into(),
            parts: vec![ContentPart::text("hello")],
            timestamp: 1,
        };
        // "user" (4) + "bob" (3) + "hello" (5)
        assert_eq!(ev.char_len(), 12);
    }

    #[test]
    fn char_len_counts_code_points_not_bytes() {
        let ev = ThreadEvent::ToolResponse {
            request_id: "r1".into(),
            output: "héllo".into(), // 5 code points, 6 bytes
            timestamp: 1,
        };
        assert_eq!(ev.char_len(), 5);
    }

    #[test]
    fn tool_request_char_len_is_name_plus_args() {
        let ev = ThreadEvent::ToolRequest {
            request_id: "id".into(),
            name: "grep".into(),
            args: r#"{"q":"x"}"#.into(),
            timestamp: 3,
        };
        assert_eq!(ev.char_len(), 4 + 9);
    }

    #[test]
    fn summary_char_len_is_text_only() {
        let ev = ThreadEvent::Summary {
            summary_of: vec![1, 2, 3],
            text: "short".into(),
            timestamp: 4,
        };
        assert_eq!(ev.char_len(), 5);
    }

    #[test]
    fn serde_round_trip_preserves_variant_and_fields() {
        let ev = ThreadEvent::ToolRequest {
            request_id: "abc".into(),
            name: "shell".into(),
            args: r#"{"command":"ls"}"#.into(),
            timestamp: 9,
        };
        let json = serde_json::to_string(&ev).unwrap();
        let back: ThreadEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn serde_tag_is_snake_case() {
        let ev = ThreadEvent::ToolResponse {
            request_id: "x".into(),
            output: "y".into(),
            timestamp: 1,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains(r#""type":"tool_response""#), "{json}");
    }

    #[test]
    fn unknown_tag_fails_to_decode() {
        let json = r#"{"type":"telemetry","timestamp":1}"#;
        assert!(serde_json::from_str::<ThreadEvent>(json).is_err());
    }

    #[test]
    fn render_includes_tool_name_and_args() {
        let ev = ThreadEvent::ToolRequest {
            request_id: "id".into(),
            name: "shell".into(),
            args: r#"{"command":"ls"}"#.into(),
            timestamp: 1,
        };
        let text = ev.render();
        assert!(text.contains("shell"));
        assert!(text.contains("ls"));
    }
}
