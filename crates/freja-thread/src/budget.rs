// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;

use crate::event::ThreadEvent;

/// A view of the log that fits under a character budget while preserving
/// the tool-pairing invariant.
#[derive(Debug, Clone)]
pub struct BudgetedView {
    pub events: Vec<ThreadEvent>,
    /// True when events were dropped or summarized to fit the budget.
    pub compacted: bool,
}

/// Condenses an overflowing prefix of the log into one summary text.
/// Typically backed by a model call; any error is propagated to the caller
/// and leaves the thread log unchanged.
#[async_trait]
pub trait Compactor: Send + Sync {
    async fn summarize(&self, events: &[ThreadEvent]) -> anyhow::Result<String>;
}

/// Split from the tail: the returned `kept` holds the longest suffix whose
/// running total stays strictly below `budget`.  When not even the final
/// event fits, the view degenerates to exactly that event: an oversized
/// event is emitted rather than dropped.
///
/// Returns `(overflow, kept)`, both in chronological order.
pub(crate) fn partition_tail(
    mut events: Vec<ThreadEvent>,
    budget: usize,
) -> (Vec<ThreadEvent>, Vec<ThreadEvent>) {
    let mut acc = 0usize;
    let mut split = events.len();
    for (i, ev) in events.iter().enumerate().rev() {
        let len = ev.char_len();
        if acc + len >= budget {
            break;
        }
        acc += len;
        split = i;
    }
    if split == events.len() && !events.is_empty() {
        split = events.len() - 1;
    }
    let kept = events.split_off(split);
    (events, kept)
}

/// Split from the head: `head` takes leading events while the running total
/// stays strictly below `budget`, but always at least two events (or all of
/// them) so that iterative summarization makes progress even when a summary
/// from the previous round leads the list.
fn partition_head(
    mut events: Vec<ThreadEvent>,
    budget: usize,
) -> (Vec<ThreadEvent>, Vec<ThreadEvent>) {
    let mut acc = 0usize;
    let mut split = 0usize;
    for ev in &events {
        let len = ev.char_len();
        if split >= 2 && acc + len >= budget {
            break;
        }
        acc += len;
        split += 1;
    }
    let tail = events.split_off(split);
    (events, tail)
}

/// Move every response in `kept` whose matching request is absent from
/// `kept` into `overflow`.  Orphan requests are tolerated here; the pairing
/// scan removes them afterwards.
fn move_orphan_responses(kept: &mut Vec<ThreadEvent>, overflow: &mut Vec<ThreadEvent>) {
    let request_ids: Vec<String> = kept
        .iter()
        .filter_map(|ev| match ev {
            ThreadEvent::ToolRequest { request_id, .. } => Some(request_id.clone()),
            _ => None,
        })
        .collect();
    let mut moved = Vec::new();
    kept.retain(|ev| match ev {
        ThreadEvent::ToolResponse { request_id, .. } => {
            if request_ids.iter().any(|id| id == request_id) {
                true
            } else {
                moved.push(ev.clone());
                false
            }
        }
        _ => true,
    });
    // Orphan responses carry larger timestamps than everything already in
    // the overflow prefix, so appending keeps chronological order.
    overflow.extend(moved);
}

/// Enforce the pairing invariant inside a view: drop requests with no later
/// response and responses with no earlier request.
pub(crate) fn enforce_pairing(events: &mut Vec<ThreadEvent>) {
    let snapshot = events.clone();
    let mut index = 0usize;
    events.retain(|ev| {
        let i = index;
        index += 1;
        match ev {
            ThreadEvent::ToolRequest { request_id, .. } => {
                snapshot[i + 1..].iter().any(|later| {
                    matches!(later, ThreadEvent::ToolResponse { request_id: rid, .. } if rid == request_id)
                })
            }
            ThreadEvent::ToolResponse { request_id, .. } => {
                snapshot[..i].iter().any(|earlier| {
                    matches!(earlier, ThreadEvent::ToolRequest { request_id: rid, .. } if rid == request_id)
                })
            }
            _ => true,
        }
    });
}

/// Timestamps covered by a summary.  Nested summaries are flattened so the
/// provenance list always points at original events.
fn summarized_ids(events: &[ThreadEvent]) -> Vec<u64> {
    let mut ids = Vec::new();
    for ev in events {
        match ev {
            ThreadEvent::Summary { summary_of, .. } => ids.extend_from_slice(summary_of),
            other => ids.push(other.timestamp()),
        }
    }
    ids
}

/// Build the budget-bounded view: partition, restore pairing, and, when a
/// compactor is available, iteratively summarize the overflow until a
/// single summary remains.  Returns the new log and whether anything was
/// compacted away.
pub(crate) async fn build_view(
    events: Vec<ThreadEvent>,
    budget: usize,
    compactor: Option<&dyn Compactor>,
) -> anyhow::Result<(Vec<ThreadEvent>, bool)> {
    if events.is_empty() {
        return Ok((events, false));
    }
    let (mut overflow, mut kept) = partition_tail(events, budget);
    move_orphan_responses(&mut kept, &mut overflow);
    enforce_pairing(&mut kept);

    if overflow.is_empty() {
        return Ok((kept, false));
    }
    let Some(compactor) = compactor else {
        return Ok((kept, true));
    };

    let mut last_summary = None;
    while !overflow.is_empty() {
        let (head, tail) = partition_head(overflow, budget);
        let text = compactor.summarize(&head).await?;
        let summary = ThreadEvent::Summary {
            summary_of: summarized_ids(&head),
            text,
            timestamp: head.iter().map(ThreadEvent::timestamp).max().unwrap_or(0),
        };
        if tail.is_empty() {
            last_summary = Some(summary);
            overflow = Vec::new();
        } else {
            let mut next = Vec::with_capacity(tail.len() + 1);
            next.push(summary);
            next.extend(tail);
            overflow = next;
        }
    }

    let mut log = Vec::with_capacity(kept.len() + 1);
    if let Some(summary) = last_summary {
        log.push(summary);
    }
    log.extend(kept);
    Ok((log, true))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
