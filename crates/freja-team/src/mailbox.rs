// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::debug;

/// Sentinel delivered to cancelled waiters so a suspended teammate can tell
/// a shutdown apart from a real message.
pub const SHUTDOWN: &str = "__SHUTDOWN__";

#[derive(Debug, Clone, PartialEq)]
pub struct MailMessage {
    pub id: u64,
    pub from: String,
    pub to: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl MailMessage {
    /// The string handed to waiters and tool outputs.
    pub fn formatted(&self) -> String {
        format!("Message from {}: {}", self.from, self.content)
    }
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    queues: HashMap<String, VecDeque<MailMessage>>,
    waiters: HashMap<String, VecDeque<oneshot::Sender<String>>>,
}

/// Per-recipient FIFO queues with single-shot waiters.
///
/// The mailbox is the only rendezvous primitive between teammates.  The
/// mutex guards short synchronous sections only; `wait_for_message`
/// registers its waiter under the lock and suspends outside it.
///
/// FIFO holds on both sides: queued messages drain oldest-first, and when
/// several waiters are suspended the oldest waiter receives the next
/// message.
#[derive(Default)]
pub struct Mailbox {
    inner: Mutex<Inner>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `content` to `to`.  A suspended waiter is woken directly;
    /// otherwise the message is queued.
    pub fn send(
        &self,
        from: impl Into<String>,
        to: impl Into<String>,
        content: impl Into<String>,
    ) -> MailMessage {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let msg = MailMessage {
            id: inner.next_id,
            from: from.into(),
            to: to.into(),
            content: content.into(),
            timestamp: Utc::now(),
        };
        if let Some(waiters) = inner.waiters.get_mut(&msg.to) {
            // A waiter whose receiver was dropped is skipped, not counted
            // as a delivery.
            while let Some(waiter) = waiters.pop_front() {
                if waiter.send(msg.formatted()).is_ok() {
                    debug!(to = %msg.to, id = msg.id, "mailbox delivered to waiter");
                    return msg;
                }
            }
        }
        debug!(to = %msg.to, id = msg.id, "mailbox queued");
        inner
            .queues
            .entry(msg.to.clone())
            .or_default()
            .push_back(msg.clone());
        msg
    }

    /// Send `content` to every name except the sender.
    pub fn broadcast(&self, from: &str, content: &str, all_names: &[String]) {
        for name in all_names {
            if name != from {
                self.send(from, name.clone(), content);
            }
        }
    }

    /// Take and clear the whole queue for `name`.
    pub fn receive(&self, name: &str) -> Vec<MailMessage> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .queues
            .remove(name)
            .map(|q| q.into_iter().collect())
            .unwrap_or_default()
    }

    /// Copy the queue for `name` without removing anything.
    pub fn peek(&self, name: &str) -> Vec<MailMessage> {
        let inner = self.inner.lock().unwrap();
        inner
            .queues
            .get(name)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Resolve with the oldest queued message, or suspend until one arrives
    /// (or the waiter is cancelled with [`SHUTDOWN`]).
    pub async fn wait_for_message(&self, name: &str) -> String {
        let rx = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(queue) = inner.queues.get_mut(name) {
                if let Some(msg) = queue.pop_front() {
                    return msg.formatted();
                }
            }
            let (tx, rx) = oneshot::channel();
            inner
                .waiters
                .entry(name.to_string())
                .or_default()
                .push_back(tx);
            rx
        };
        // A dropped sender (mailbox torn down) counts as a shutdown.
        rx.await.unwrap_or_else(|_| SHUTDOWN.to_string())
    }

    /// Resolve every waiter for `name` with the shutdown sentinel.
    pub fn cancel_waiters(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(waiters) = inner.waiters.remove(name) {
            for waiter in waiters {
                let _ = waiter.send(SHUTDOWN.to_string());
            }
        }
    }

    /// Resolve every waiter of every recipient with the shutdown sentinel.
    pub fn cancel_all_waiters(&self) {
        let mut inner = self.inner.lock().unwrap();
        for (_, waiters) in inner.waiters.drain() {
            for waiter in waiters {
                let _ = waiter.send(SHUTDOWN.to_string());
            }
        }
    }

    /// Number of waiters currently suspended for `name`.
    pub fn waiter_count(&self, name: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.waiters.get(name).map(VecDeque::len).unwrap_or(0)
    }

    /// Total waiters across all recipients.
    pub fn total_waiters(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.waiters.values().map(VecDeque::len).sum()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
