// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;

use freja_model::{CompletionRequest, ProviderClient, ResponseEvent};
use freja_thread::{Compactor, ContentPart, Role, ThreadEvent};

const SUMMARIZE_PROMPT: &str =
    "You are a context compaction assistant. Summarise the following conversation history \
     in a concise, information-dense way. Preserve all technical details, decisions, names, \
     tool calls and tool outputs that may be relevant to future work. \
     The summary will replace the original history to free up context space.";

/// Compactor backed by a model provider: renders the overflowing events to
/// plain text, asks the model for a dense summary, and returns its text.
pub struct ModelCompactor {
    provider: Arc<dyn ProviderClient>,
    model: Option<String>,
}

impl ModelCompactor {
    pub fn new(provider: Arc<dyn ProviderClient>, model: Option<String>) -> Self {
        Self { provider, model }
    }
}

#[async_trait]
impl Compactor for ModelCompactor {
    async fn summarize(&self, events: &[ThreadEvent]) -> anyhow::Result<String> {
        let history = events
            .iter()
            .map(ThreadEvent::render)
            .collect::<Vec<_>>()
            .join("\n\n");
        let request = CompletionRequest {
            events: vec![ThreadEvent::Message {
                role: Role::User,
                name: "compactor".into(),
                parts: vec![ContentPart::text(format!(
                    "{SUMMARIZE_PROMPT}\n\n---\n\n{history}"
                ))],
                timestamp: 1,
            }],
            model: self.model.clone(),
            ..Default::default()
        };

        let mut stream = self.provider.complete(request).await?;
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                ResponseEvent::TextDelta(delta) => text.push_str(&delta),
                ResponseEvent::Done => break,
                _ => {}
            }
        }
        if text.is_empty() {
            anyhow::bail!("compaction model returned an empty summary");
        }
        Ok(text)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
