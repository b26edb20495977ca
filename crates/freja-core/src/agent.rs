// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use tokio::sync::oneshot;
use tracing::warn;

use freja_config::AgentDefinition;
use freja_model::{
    CompletionRequest, ProviderClient, ResponseEvent, ThreadMeta, ToolSchema, Usage,
};
use freja_thread::{
    budgeted_view, Breach, ContentPart, RunStatus, ThreadHandle, ToolRequestDraft,
    ToolResponseDraft, UsageDelta,
};
use freja_tools::ToolCall;

use crate::{compact::ModelCompactor, context::CommandContext, dispatch, UiEvent};

/// A named agent: definition plus provider binding.  Running it drives the
/// model ↔ tool loop over one conversation thread.
#[derive(Clone)]
pub struct Agent {
    pub name: String,
    pub definition: AgentDefinition,
    pub provider: Arc<dyn ProviderClient>,
}

impl Agent {
    pub fn new(definition: AgentDefinition, provider: Arc<dyn ProviderClient>) -> Self {
        Self {
            name: definition.name.clone(),
            definition,
            provider,
        }
    }

    /// Run one user input to completion.  See [`Agent::run_with_cancel`].
    pub async fn run(
        &self,
        input: &str,
        thread: ThreadHandle,
        ctx: &Arc<CommandContext>,
    ) -> anyhow::Result<()> {
        // The sender half stays alive for the whole run so the receiver
        // never reports a spurious cancellation.
        let (_keep_alive, mut cancel) = oneshot::channel::<()>();
        self.run_with_cancel(input, thread, ctx, &mut cancel).await
    }

    /// The agent run loop.
    ///
    /// Appends `input` as a user message, then alternates between model
    /// turns and tool dispatch: each tool response is appended before the
    /// next model call so the model always sees its own results.  The run
    /// ends on the first turn without tool calls, on a breached run limit
    /// (a `Warn` event names the limit), or on an external kill through
    /// `cancel`, in which case the partial assistant text is discarded.
    ///
    /// Provider and compactor failures abort the run with an `Error` event;
    /// tool failures never do (they become tool response strings).
    pub async fn run_with_cancel(
        &self,
        input: &str,
        thread: ThreadHandle,
        ctx: &Arc<CommandContext>,
        cancel: &mut oneshot::Receiver<()>,
    ) -> anyhow::Result<()> {
        // Both an explicit kill and a dropped sender count as cancelled.
        if !matches!(cancel.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
            return Ok(());
        }

        let delegation_depth = {
            let mut store = ctx.store.lock().unwrap();
            let t = store.thread_mut(thread);
            t.run_status = RunStatus::Running;
            t.reset_usage_for_run();
            t.append_user_message(ctx.username(), ContentPart::text(input));
            t.delegation_depth
        };
        let tool_ctx = ctx.tool_context(delegation_depth);

        let result = loop {
            match cancel.try_recv() {
                Err(oneshot::error::TryRecvError::Empty) => {}
                _ => break Ok(()),
            }

            ctx.interactor.thinking(&self.name);

            // Budget-bounded view; the compactor summarizes whatever falls
            // off the end.  A compactor failure leaves the log untouched
            // and aborts the run.
            let compactor =
                ModelCompactor::new(Arc::clone(&self.provider), self.definition.model.clone());
            let budget = ctx
                .config
                .limits
                .char_budget
                .or_else(|| self.provider.char_budget());
            let view = match budgeted_view(&ctx.store, thread, budget, Some(&compactor)).await {
                Ok(view) => view,
                Err(e) => {
                    ctx.interactor.error(format!("context compaction failed: {e}"));
                    break Err(e);
                }
            };
            if view.compacted {
                ctx.interactor.debug("conversation view was compacted to fit the budget");
            }

            let request = self.build_request(view.events, thread, ctx, &tool_ctx);
            let turn = tokio::select! {
                biased;
                _ = &mut *cancel => None,
                result = self.stream_one_turn(request) => Some(result),
            };
            let (text, tool_calls, usage) = match turn {
                // Killed mid-stream: the partial assistant message is
                // discarded, not committed to the thread.
                None => break Ok(()),
                Some(Err(e)) => {
                    ctx.interactor.error(format!("{}: {e:#}", self.name));
                    break Err(e);
                }
                Some(Ok(turn)) => turn,
            };

            if !text.is_empty() {
                let mut store = ctx.store.lock().unwrap();
                store
                    .thread_mut(thread)
                    .append_agent_message(&self.name, ContentPart::text(&text));
                drop(store);
                ctx.interactor.display_text(&self.name, &text);
            }

            // Dispatch sequentially; every response lands in the thread
            // before the next model call sees the log.
            let had_tool_calls = !tool_calls.is_empty();
            for call in &tool_calls {
                {
                    let mut store = ctx.store.lock().unwrap();
                    store.thread_mut(thread).append_tool_requests(vec![ToolRequestDraft {
                        request_id: call.id.clone(),
                        name: call.name.clone(),
                        args: call.args.clone(),
                    }]);
                }
                let output = dispatch::dispatch(self, call, thread, ctx, &tool_ctx).await;
                let mut store = ctx.store.lock().unwrap();
                store.thread_mut(thread).append_tool_responses(vec![ToolResponseDraft {
                    request_id: call.id.clone(),
                    output: output.content,
                }]);
            }

            let price = self.definition.pricing.cost(
                usage.input_tokens,
                usage.output_tokens,
                usage.cache_read_tokens,
            );
            let breach_message = {
                let mut store = ctx.store.lock().unwrap();
                let t = store.thread_mut(thread);
                t.add_usage(UsageDelta {
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                    cache_read_tokens: usage.cache_read_tokens,
                    cache_write_tokens: usage.cache_write_tokens,
                    price,
                });
                t.usage.breached().map(|breach| match breach {
                    Breach::Iterations => format!(
                        "{}: stopping, iteration limit reached ({} of {})",
                        self.name, t.usage.iterations, t.usage.iteration_limit
                    ),
                    Breach::Price => format!(
                        "{}: stopping, price limit reached (${:.4} of ${:.2})",
                        self.name, t.usage.price, t.usage.price_limit
                    ),
                })
            };
            if let Some(message) = breach_message {
                ctx.interactor.warn(message);
                break Ok(());
            }

            if !had_tool_calls {
                break Ok(());
            }
        };

        let (thread_id, thread_name) = {
            let mut store = ctx.store.lock().unwrap();
            let t = store.thread_mut(thread);
            t.run_status = RunStatus::Stopped;
            (t.id.clone(), t.name.clone())
        };
        ctx.interactor.send_event(UiEvent::ThreadUpdate {
            thread_id,
            name: thread_name,
        });
        result
    }

    fn build_request(
        &self,
        events: Vec<freja_thread::ThreadEvent>,
        thread: ThreadHandle,
        ctx: &Arc<CommandContext>,
        tool_ctx: &freja_tools::ToolContext,
    ) -> CompletionRequest {
        let mut tools = dispatch::special_tool_schemas();
        tools.extend(ctx.toolbox.schemas(tool_ctx).into_iter().map(|s| ToolSchema {
            name: s.name,
            description: s.description,
            parameters: s.parameters,
        }));

        let meta = {
            let store = ctx.store.lock().unwrap();
            let t = store.thread(thread);
            ThreadMeta {
                thread_id: t.id.clone(),
                thread_name: t.name.clone(),
                username: t.username.clone(),
            }
        };

        CompletionRequest {
            events,
            system_prompt: self.definition.system_prompt.clone(),
            tools,
            model: self.definition.model.clone(),
            temperature: self.definition.temperature,
            max_output_tokens: None,
            meta,
        }
    }

    /// Consume one model stream: buffer text, accumulate parallel tool-call
    /// chunks by index, and sum usage deltas.
    async fn stream_one_turn(
        &self,
        request: CompletionRequest,
    ) -> anyhow::Result<(String, Vec<ToolCall>, Usage)> {
        let mut stream = self
            .provider
            .complete(request)
            .await
            .context("model completion failed")?;

        let mut full_text = String::new();
        let mut usage = Usage::default();
        // Keyed by the parallel-tool-call index from the provider; chunks
        // for different calls may interleave.
        let mut pending: HashMap<u32, PendingToolCall> = HashMap::new();

        while let Some(event) = stream.next().await {
            match event? {
                ResponseEvent::TextDelta(delta) if !delta.is_empty() => {
                    full_text.push_str(&delta);
                }
                ResponseEvent::ToolCall {
                    index,
                    id,
                    name,
                    arguments,
                } => {
                    let slot = pending.entry(index).or_insert_with(PendingToolCall::default);
                    if !id.is_empty() {
                        slot.id = id;
                    }
                    if !name.is_empty() {
                        slot.name = name;
                    }
                    slot.args_buf.push_str(&arguments);
                }
                ResponseEvent::Usage {
                    input_tokens,
                    output_tokens,
                    cache_read_tokens,
                    cache_write_tokens,
                } => {
                    usage.add(input_tokens, output_tokens, cache_read_tokens, cache_write_tokens);
                }
                ResponseEvent::Done => break,
                ResponseEvent::Error(e) => {
                    warn!(agent = %self.name, "model stream error: {e}");
                }
                _ => {}
            }
        }

        // Flush accumulated calls ordered by index.  A call with no name
        // cannot be dispatched and is dropped; an empty id gets a synthetic
        // fallback so the pair can still be logged.
        let mut sorted: Vec<(u32, PendingToolCall)> = pending.into_iter().collect();
        sorted.sort_by_key(|(index, _)| *index);
        let mut tool_calls = Vec::new();
        for (i, (_, slot)) in sorted.into_iter().enumerate() {
            if slot.name.is_empty() {
                warn!(
                    agent = %self.name,
                    request_id = %slot.id,
                    "dropping tool call with empty name from model"
                );
                continue;
            }
            let mut call = slot.finish();
            if call.id.is_empty() {
                call.id = format!("call_synthetic_{i}");
                warn!(
                    agent = %self.name,
                    tool = %call.name,
                    "tool call from model had empty id; generated synthetic id"
                );
            }
            tool_calls.push(call);
        }

        Ok((full_text, tool_calls, usage))
    }
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

impl PendingToolCall {
    fn finish(self) -> ToolCall {
        // The argument text is forwarded raw; deduplication in the thread
        // compares it byte-for-byte.  An empty buffer becomes the empty
        // object so the call is still dispatchable.
        let args = if self.args_buf.is_empty() {
            "{}".to_string()
        } else {
            self.args_buf
        };
        ToolCall {
            id: self.id,
            name: self.name,
            args,
        }
    }
}
