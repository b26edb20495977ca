// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{CompletionRequest, ResponseEvent};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

/// Contract every AI provider client fulfils.
///
/// Implementations stream incremental tokens, tool-call requests, and usage
/// deltas; the run loop consumes the stream and may drop it early when the
/// run is cancelled, so providers must tolerate an abandoned stream.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;

    /// Character budget the provider suggests for the event view, derived
    /// from its context window.  `None` means the caller decides.
    fn char_budget(&self) -> Option<usize> {
        None
    }
}
