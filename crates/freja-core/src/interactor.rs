// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::UiEvent;

/// Bidirectional event bus between the core and front-ends.
///
/// Outbound: the core publishes [`UiEvent`]s with [`Interactor::send_event`]
/// and every subscriber sees them in publication order (the subscriber list
/// is walked under one lock).  Inbound: answers, choice selections, and
/// OAuth callbacks flow back through [`Interactor::send_feedback`].
///
/// Subscribers whose receiver was dropped are pruned on the next publish.
#[derive(Default)]
pub struct Interactor {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<UiEvent>>>,
    feedback: Mutex<Vec<mpsc::UnboundedSender<UiEvent>>>,
    debug_enabled: AtomicBool,
}

impl Interactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive events published by the core.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<UiEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Publish an event to every live subscriber.
    pub fn send_event(&self, event: UiEvent) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Receive events flowing from the front-end back into the core.
    pub fn feedback(&self) -> mpsc::UnboundedReceiver<UiEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.feedback.lock().unwrap().push(tx);
        rx
    }

    /// Deliver a front-end event (Answer, Choice answer, OAuthCallback).
    pub fn send_feedback(&self, event: UiEvent) {
        let mut subs = self.feedback.lock().unwrap();
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn set_debug(&self, enabled: bool) {
        self.debug_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug_enabled.load(Ordering::Relaxed)
    }

    // ── Helpers — all reduce to send_event ────────────────────────────────────

    pub fn display_text(&self, agent: &str, text: &str) {
        self.send_event(UiEvent::Text {
            agent: agent.to_string(),
            text: text.to_string(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.send_event(UiEvent::Warn(message.into()));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send_event(UiEvent::Error(message.into()));
    }

    /// No-op unless debug is enabled.
    pub fn debug(&self, message: impl Into<String>) {
        if self.debug_enabled() {
            self.send_event(UiEvent::Debug(message.into()));
        }
    }

    pub fn thinking(&self, agent: &str) {
        self.send_event(UiEvent::Thinking {
            agent: agent.to_string(),
        });
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_sees_events_in_publication_order() {
        let bus = Interactor::new();
        let mut rx = bus.subscribe();
        bus.display_text("dev", "one");
        bus.warn("two");
        bus.error("three");
        assert!(matches!(rx.recv().await.unwrap(), UiEvent::Text { text, .. } if text == "one"));
        assert!(matches!(rx.recv().await.unwrap(), UiEvent::Warn(m) if m == "two"));
        assert!(matches!(rx.recv().await.unwrap(), UiEvent::Error(m) if m == "three"));
    }

    #[tokio::test]
    async fn all_subscribers_receive_each_event() {
        let bus = Interactor::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.warn("shared");
        assert!(matches!(a.recv().await.unwrap(), UiEvent::Warn(_)));
        assert!(matches!(b.recv().await.unwrap(), UiEvent::Warn(_)));
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned() {
        let bus = Interactor::new();
        let rx = bus.subscribe();
        drop(rx);
        bus.warn("into the void");
        assert_eq!(bus.subscribers.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn debug_is_gated() {
        let bus = Interactor::new();
        let mut rx = bus.subscribe();
        bus.debug("hidden");
        bus.set_debug(true);
        bus.debug("visible");
        assert!(matches!(rx.recv().await.unwrap(), UiEvent::Debug(m) if m == "visible"));
    }

    #[tokio::test]
    async fn feedback_flows_the_other_way() {
        let bus = Interactor::new();
        let mut rx = bus.feedback();
        bus.send_feedback(UiEvent::Answer {
            id: "q1".into(),
            text: "yes".into(),
        });
        assert!(matches!(rx.recv().await.unwrap(), UiEvent::Answer { id, .. } if id == "q1"));
    }
}
