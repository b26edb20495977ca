// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;

use freja_thread::{ContentPart, Role, ThreadEvent};

use crate::{provider::ResponseStream, CompletionRequest, ProviderClient, ResponseEvent};

/// Split at the midpoint on a char boundary.  Replies and tool arguments
/// are streamed in two pieces so consumers must reassemble chunks the way
/// they would for a real provider.
fn halves(s: &str) -> (&str, &str) {
    let mid = s.chars().count() / 2;
    let at = s.char_indices().nth(mid).map(|(i, _)| i).unwrap_or(s.len());
    s.split_at(at)
}

/// Fallback provider wired in when no real model client is configured.
///
/// Answers deterministically so the interactive loop and the tests work
/// without network access: the reply quotes the latest user turn and
/// reports how much context arrived.  Usage follows the same
/// chars-per-token heuristic the thread budget uses, so cost accounting
/// stays exercised even offline.
pub struct OfflineProvider;

impl OfflineProvider {
    fn latest_user_text(events: &[ThreadEvent]) -> Option<String> {
        events.iter().rev().find_map(|ev| match ev {
            ThreadEvent::Message {
                role: Role::User,
                parts,
                ..
            } => Some(
                parts
                    .iter()
                    .filter_map(|p| match p {
                        ContentPart::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            _ => None,
        })
    }
}

#[async_trait]
impl ProviderClient for OfflineProvider {
    fn name(&self) -> &str {
        "offline"
    }
    fn model_name(&self) -> &str {
        "offline-echo"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let view_chars: usize = req.events.iter().map(ThreadEvent::char_len).sum();
        let quoted =
            Self::latest_user_text(&req.events).unwrap_or_else(|| "nothing yet".to_string());
        let reply = format!("offline: saw {view_chars} chars of context; you said: {quoted}");
        let output_tokens = (reply.chars().count() / 4).max(1) as u64;
        let events = vec![
            Ok(ResponseEvent::TextDelta(reply)),
            Ok(ResponseEvent::Usage {
                input_tokens: (view_chars / 4).max(1) as u64,
                output_tokens,
                cache_read_tokens: 0,
                cache_write_tokens: 0,
            }),
            Ok(ResponseEvent::Done),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// One scripted model turn, written in the runtime's own vocabulary:
/// reply text, tool requests with raw argument JSON, and token usage.
/// Converted into wire events when the turn is played.
#[derive(Debug, Clone, Default)]
pub struct ReplayTurn {
    reply: Option<String>,
    requests: Vec<(String, String, String)>,
    input_tokens: u64,
    output_tokens: u64,
}

impl ReplayTurn {
    /// A turn that streams `reply` and nothing else.
    pub fn text(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            ..Default::default()
        }
    }

    /// A turn that requests one tool call.  `args` is the raw JSON text
    /// forwarded to the run loop unparsed.
    pub fn tool_call(
        id: impl Into<String>,
        tool: impl Into<String>,
        args: impl Into<String>,
    ) -> Self {
        Self {
            requests: vec![(id.into(), tool.into(), args.into())],
            ..Default::default()
        }
    }

    /// Add a further tool request to the same turn (parallel calls).
    pub fn and_tool_call(
        mut self,
        id: impl Into<String>,
        tool: impl Into<String>,
        args: impl Into<String>,
    ) -> Self {
        self.requests.push((id.into(), tool.into(), args.into()));
        self
    }

    /// Report this usage at the end of the turn.  Turns without usage
    /// stay silent about tokens.
    pub fn usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self
    }

    fn into_events(self) -> Vec<ResponseEvent> {
        let mut out = Vec::new();
        if let Some(reply) = self.reply {
            let (head, tail) = halves(&reply);
            for piece in [head, tail] {
                if !piece.is_empty() {
                    out.push(ResponseEvent::TextDelta(piece.to_string()));
                }
            }
        }
        for (slot, (id, tool, args)) in self.requests.into_iter().enumerate() {
            // Arguments arrive across two chunks keyed by the call index;
            // id and name are only present on the first chunk.
            let (head, tail) = halves(&args);
            out.push(ResponseEvent::ToolCall {
                index: slot as u32,
                id,
                name: tool,
                arguments: head.to_string(),
            });
            if !tail.is_empty() {
                out.push(ResponseEvent::ToolCall {
                    index: slot as u32,
                    id: String::new(),
                    name: String::new(),
                    arguments: tail.to_string(),
                });
            }
        }
        if self.input_tokens > 0 || self.output_tokens > 0 {
            out.push(ResponseEvent::Usage {
                input_tokens: self.input_tokens,
                output_tokens: self.output_tokens,
                cache_read_tokens: 0,
                cache_write_tokens: 0,
            });
        }
        out.push(ResponseEvent::Done);
        out
    }
}

/// Pre-scripted provider: every `complete` call consumes the next
/// [`ReplayTurn`] and records the event view it was asked to answer, so
/// tests can assert on what the run loop actually sent.
///
/// When the script runs dry the provider goes silent (a bare `Done`),
/// which the run loop treats as a natural stop.
pub struct ReplayProvider {
    turns: Mutex<VecDeque<ReplayTurn>>,
    views: Mutex<Vec<Vec<ThreadEvent>>>,
}

impl ReplayProvider {
    pub fn new(turns: impl IntoIterator<Item = ReplayTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into_iter().collect()),
            views: Mutex::new(Vec::new()),
        }
    }

    /// Script with a single text turn.
    pub fn replying(reply: impl Into<String>) -> Self {
        Self::new([ReplayTurn::text(reply)])
    }

    /// Every event view received so far, in call order.
    pub fn views(&self) -> Vec<Vec<ThreadEvent>> {
        self.views.lock().unwrap().clone()
    }

    pub fn last_view(&self) -> Option<Vec<ThreadEvent>> {
        self.views.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ProviderClient for ReplayProvider {
    fn name(&self) -> &str {
        "replay"
    }
    fn model_name(&self) -> &str {
        "replay-fixture"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        self.views.lock().unwrap().push(req.events);
        let turn = self.turns.lock().unwrap().pop_front().unwrap_or_default();
        let events: Vec<anyhow::Result<ResponseEvent>> =
            turn.into_events().into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(events)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
