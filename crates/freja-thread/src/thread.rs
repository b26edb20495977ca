// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::event::{ContentPart, Role, ThreadEvent, ToolRequestDraft, ToolResponseDraft};
use crate::store::ThreadHandle;

#[derive(Debug, thiserror::Error)]
pub enum ThreadError {
    #[error("thread not found: {0}")]
    NotFound(String),
    #[error("delegation depth {0} exceeds the configured maximum {1}")]
    DepthExceeded(u32, u32),
    #[error("event {0} is not a truncatable message")]
    NotAMessage(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunStatus {
    #[default]
    Stopped,
    Running,
}

/// Which run limit was breached, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Breach {
    Iterations,
    Price,
}

/// Per-run usage counters plus the limits they are checked against.
/// Reset between runs; the thread's `price` field survives resets.
#[derive(Debug, Clone, Default)]
pub struct RunUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub iterations: u32,
    pub price: f64,
    pub iteration_limit: u32,
    pub price_limit: f64,
}

impl RunUsage {
    /// Check the run counters against their limits.  A limit of zero is
    /// treated as "unlimited" so freshly constructed threads never trip.
    pub fn breached(&self) -> Option<Breach> {
        if self.iteration_limit > 0 && self.iterations >= self.iteration_limit {
            return Some(Breach::Iterations);
        }
        if self.price_limit > 0.0 && self.price >= self.price_limit {
            return Some(Breach::Price);
        }
        None
    }
}

/// One turn's contribution to the run counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageDelta {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub price: f64,
}

/// The append-only, deduplicated conversation log.
///
/// Threads live in a [`crate::ThreadStore`] arena; parent/child links are
/// handles into that arena rather than pointers, which keeps the cyclic
/// fork graph out of the ownership system.
#[derive(Debug)]
pub struct ConversationThread {
    /// Stable across forks: every thread in a fork family shares this id.
    pub id: String,
    pub username: String,
    pub name: String,
    pub summary: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    /// Cost accumulated by runs on this thread (children roll up on merge).
    pub price: f64,
    pub usage: RunUsage,
    pub run_status: RunStatus,
    /// 0 at the root, parent + 1 on forks.  Not persisted.
    pub delegation_depth: u32,
    pub(crate) events: Vec<ThreadEvent>,
    pub(crate) next_seq: u64,
    pub(crate) parent: Option<ThreadHandle>,
    pub(crate) forks: HashMap<String, ThreadHandle>,
}

impl ConversationThread {
    pub fn new(username: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            username: username.into(),
            name: name.into(),
            summary: String::new(),
            created: now,
            modified: now,
            price: 0.0,
            usage: RunUsage::default(),
            run_status: RunStatus::Stopped,
            delegation_depth: 0,
            events: Vec::new(),
            next_seq: 1,
            parent: None,
            forks: HashMap::new(),
        }
    }

    pub fn events(&self) -> &[ThreadEvent] {
        &self.events
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn touch(&mut self) {
        self.modified = Utc::now();
    }

    /// Append a user message, coalescing with the previous event when it is
    /// a message with the same role and author.
    pub fn append_user_message(&mut self, name: impl Into<String>, part: ContentPart) {
        self.append_message(Role::User, name.into(), part);
    }

    /// Append an assistant message, coalescing like [`append_user_message`].
    pub fn append_agent_message(&mut self, name: impl Into<String>, part: ContentPart) {
        self.append_message(Role::Assistant, name.into(), part);
    }

    fn append_message(&mut self, role: Role, name: String, part: ContentPart) {
        if let Some(ThreadEvent::Message {
            role: last_role,
            name: last_name,
            parts,
            ..
        }) = self.events.last_mut()
        {
            if *last_role == role && *last_name == name {
                parts.push(part);
                self.touch();
                return;
            }
        }
        let timestamp = self.next_seq();
        self.events.push(ThreadEvent::Message {
            role,
            name,
            parts: vec![part],
            timestamp,
        });
        self.touch();
    }

    /// Append the given tool requests, dropping malformed entries (empty
    /// id, name, or args).  Returns the number of requests appended.
    pub fn append_tool_requests(&mut self, requests: Vec<ToolRequestDraft>) -> usize {
        let mut appended = 0;
        for req in requests {
            if req.request_id.is_empty() || req.name.is_empty() || req.args.is_empty() {
                warn!(
                    request_id = %req.request_id,
                    tool = %req.name,
                    "dropping malformed tool request"
                );
                continue;
            }
            let timestamp = self.next_seq();
            self.events.push(ThreadEvent::ToolRequest {
                request_id: req.request_id,
                name: req.name,
                args: req.args,
                timestamp,
            });
            appended += 1;
        }
        if appended > 0 {
            self.touch();
        }
        appended
    }

    /// Append tool responses in list order.  For each response with a known
    /// matching request, every earlier request sharing the same `(name,
    /// args)`, and any response pointing at one, is removed first, so only
    /// the most recent execution of an identical call survives.  Responses
    /// with no matching request are dropped.
    pub fn append_tool_responses(&mut self, responses: Vec<ToolResponseDraft>) -> usize {
        let mut appended = 0;
        for resp in responses {
            if resp.request_id.is_empty() {
                warn!("dropping tool response without request id");
                continue;
            }
            let Some((name, args)) = self.request_signature(&resp.request_id) else {
                warn!(request_id = %resp.request_id, "dropping orphan tool response");
                continue;
            };
            self.remove_similar_requests(&name, &args, &resp.request_id);
            let timestamp = self.next_seq();
            self.events.push(ThreadEvent::ToolResponse {
                request_id: resp.request_id,
                output: resp.output,
                timestamp,
            });
            appended += 1;
        }
        if appended > 0 {
            self.touch();
        }
        appended
    }

    /// `(name, args)` of the logged request with the given id.
    fn request_signature(&self, request_id: &str) -> Option<(String, String)> {
        self.events.iter().find_map(|ev| match ev {
            ThreadEvent::ToolRequest {
                request_id: id,
                name,
                args,
                ..
            } if id == request_id => Some((name.clone(), args.clone())),
            _ => None,
        })
    }

    /// Remove every request with the same signature but a different id,
    /// together with any responses pointing at the removed requests.
    fn remove_similar_requests(&mut self, name: &str, args: &str, keep_id: &str) {
        let stale: Vec<String> = self
            .events
            .iter()
            .filter_map(|ev| match ev {
                ThreadEvent::ToolRequest {
                    request_id,
                    name: n,
                    args: a,
                    ..
                } if n == name && a == args && request_id != keep_id => {
                    Some(request_id.clone())
                }
                _ => None,
            })
            .collect();
        if stale.is_empty() {
            return;
        }
        self.events.retain(|ev| match ev {
            ThreadEvent::ToolRequest { request_id, .. }
            | ThreadEvent::ToolResponse { request_id, .. } => {
                !stale.iter().any(|s| s == request_id)
            }
            _ => true,
        });
    }

    /// Replace the log with the prefix ending just before `event_id` plus
    /// `shift` further events.  Only message events that are not the first
    /// event qualify.
    pub fn truncate_at_message(&mut self, event_id: u64, shift: usize) -> Result<(), ThreadError> {
        let index = self
            .events
            .iter()
            .position(|ev| ev.timestamp() == event_id)
            .ok_or_else(|| ThreadError::NotFound(event_id.to_string()))?;
        if index == 0 || !self.events[index].is_message() {
            return Err(ThreadError::NotAMessage(event_id));
        }
        self.events.truncate(index + shift);
        self.touch();
        Ok(())
    }

    /// Name on the most recent assistant message, if any.
    pub fn last_agent_name(&self) -> Option<&str> {
        self.events.iter().rev().find_map(|ev| match ev {
            ThreadEvent::Message {
                role: Role::Assistant,
                name,
                ..
            } => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn event_by_id(&self, event_id: u64) -> Option<&ThreadEvent> {
        self.events.iter().find(|ev| ev.timestamp() == event_id)
    }

    pub fn user_message_count(&self) -> usize {
        self.events
            .iter()
            .filter(|ev| matches!(ev, ThreadEvent::Message { role: Role::User, .. }))
            .count()
    }

    /// Fold one turn's usage into the run counters and the thread price.
    /// Bumps the iteration count by one.
    pub fn add_usage(&mut self, delta: UsageDelta) {
        self.usage.input_tokens += delta.input_tokens;
        self.usage.output_tokens += delta.output_tokens;
        self.usage.cache_read_tokens += delta.cache_read_tokens;
        self.usage.cache_write_tokens += delta.cache_write_tokens;
        self.usage.iterations += 1;
        self.usage.price += delta.price;
        self.price += delta.price;
    }

    /// Zero the run counters.  The thread price is left untouched.
    pub fn reset_usage_for_run(&mut self) {
        let iteration_limit = self.usage.iteration_limit;
        let price_limit = self.usage.price_limit;
        self.usage = RunUsage {
            iteration_limit,
            price_limit,
            ..RunUsage::default()
        };
    }

    /// Replace the log wholesale (budget commit, persistence restore).
    /// The sequence counter is advanced past every restored timestamp so
    /// future appends stay monotonic.
    pub fn replace_events(&mut self, events: Vec<ThreadEvent>) {
        let max_ts = events.iter().map(ThreadEvent::timestamp).max().unwrap_or(0);
        if max_ts >= self.next_seq {
            self.next_seq = max_ts + 1;
        }
        self.events = events;
        self.touch();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
