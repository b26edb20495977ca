// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use freja_thread::{ConversationThread, ThreadEvent};

/// Persisted form of a conversation thread: identity, accounting, and the
/// historical events only.  Fork links and delegation depth are runtime
/// state and are not stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub id: String,
    pub username: String,
    pub name: String,
    #[serde(default)]
    pub summary: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub price: f64,
    /// Entries with an unknown tag or missing fields are skipped on load so
    /// records written by newer versions still open.
    #[serde(default, deserialize_with = "tolerant_events")]
    pub events: Vec<ThreadEvent>,
}

fn tolerant_events<'de, D>(deserializer: D) -> Result<Vec<ThreadEvent>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<serde_yaml::Value> = Deserialize::deserialize(deserializer)?;
    let total = raw.len();
    let events: Vec<ThreadEvent> = raw
        .into_iter()
        .filter_map(|value| serde_yaml::from_value(value).ok())
        .collect();
    if events.len() < total {
        debug!(skipped = total - events.len(), "skipped unreadable thread events");
    }
    Ok(events)
}

impl ThreadRecord {
    pub fn from_thread(thread: &ConversationThread) -> Self {
        Self {
            id: thread.id.clone(),
            username: thread.username.clone(),
            name: thread.name.clone(),
            summary: thread.summary.clone(),
            created: thread.created,
            modified: thread.modified,
            price: thread.price,
            events: thread.events().to_vec(),
        }
    }

    /// Rebuild a root thread from this record.
    pub fn into_thread(self) -> ConversationThread {
        let mut thread = ConversationThread::new(self.username, self.name);
        thread.id = self.id;
        thread.summary = self.summary;
        thread.created = self.created;
        thread.price = self.price;
        thread.replace_events(self.events);
        thread.modified = self.modified;
        thread
    }
}

/// A stored prompt: a named chain of command templates executed by the
/// `/name` CLI syntax, with `{{key}}` placeholders filled from user input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptChain {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub commands: Vec<String>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
