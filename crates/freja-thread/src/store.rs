// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use crate::budget::{build_view, enforce_pairing, BudgetedView, Compactor};
use crate::thread::{ConversationThread, RunStatus, ThreadError};

/// Index of a thread inside the arena.  Handles are created by the store,
/// never freed, and stay valid for the store's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadHandle(usize);

/// Arena owning every thread of a session.
///
/// Parent/child fork links are handles into this arena, which sidesteps the
/// cyclic ownership a pointer graph would need.  The store is shared behind
/// `Arc<Mutex<…>>`; the lock guards short synchronous sections only and is
/// never held across an await point.
#[derive(Debug)]
pub struct ThreadStore {
    threads: Vec<ConversationThread>,
    max_delegation_depth: u32,
}

pub type SharedThreadStore = Arc<Mutex<ThreadStore>>;

pub fn shared_store(max_delegation_depth: u32) -> SharedThreadStore {
    Arc::new(Mutex::new(ThreadStore::new(max_delegation_depth)))
}

impl ThreadStore {
    pub fn new(max_delegation_depth: u32) -> Self {
        Self {
            threads: Vec::new(),
            max_delegation_depth,
        }
    }

    /// Create a new root thread.
    pub fn create(
        &mut self,
        username: impl Into<String>,
        name: impl Into<String>,
    ) -> ThreadHandle {
        self.threads.push(ConversationThread::new(username, name));
        ThreadHandle(self.threads.len() - 1)
    }

    /// Register an already-built thread (persistence restore).
    pub fn insert(&mut self, thread: ConversationThread) -> ThreadHandle {
        self.threads.push(thread);
        ThreadHandle(self.threads.len() - 1)
    }

    pub fn thread(&self, handle: ThreadHandle) -> &ConversationThread {
        &self.threads[handle.0]
    }

    pub fn thread_mut(&mut self, handle: ThreadHandle) -> &mut ConversationThread {
        &mut self.threads[handle.0]
    }

    /// Handle of the first root thread with the given family id.
    pub fn find_by_id(&self, id: &str) -> Option<ThreadHandle> {
        self.threads
            .iter()
            .position(|t| t.id == id && t.parent.is_none())
            .map(ThreadHandle)
    }

    pub fn roots(&self) -> Vec<ThreadHandle> {
        self.threads
            .iter()
            .enumerate()
            .filter(|(_, t)| t.parent.is_none())
            .map(|(i, _)| ThreadHandle(i))
            .collect()
    }

    /// Fork `parent` under `agent_name`.  Idempotent per key: an existing
    /// fork is marked running and returned.  A new fork shares the family
    /// id, deep-copies the current log, starts with zero price, and sits
    /// one delegation level below its parent.
    pub fn fork(
        &mut self,
        parent: ThreadHandle,
        agent_name: &str,
    ) -> Result<ThreadHandle, ThreadError> {
        if let Some(&existing) = self.thread(parent).forks.get(agent_name) {
            self.thread_mut(existing).run_status = RunStatus::Running;
            return Ok(existing);
        }

        let p = self.thread(parent);
        let depth = p.delegation_depth + 1;
        if depth > self.max_delegation_depth {
            return Err(ThreadError::DepthExceeded(depth, self.max_delegation_depth));
        }

        let mut child = ConversationThread::new(p.username.clone(), p.name.clone());
        child.id = p.id.clone();
        child.delegation_depth = depth;
        child.parent = Some(parent);
        child.run_status = RunStatus::Running;
        child.next_seq = p.next_seq;
        child.usage.iteration_limit = p.usage.iteration_limit;
        child.usage.price_limit = p.usage.price_limit;
        child.replace_events(p.events().to_vec());

        self.threads.push(child);
        let handle = ThreadHandle(self.threads.len() - 1);
        self.thread_mut(parent)
            .forks
            .insert(agent_name.to_string(), handle);
        Ok(handle)
    }

    /// Fork registered under `agent_name`, if one exists.
    pub fn fork_of(&self, parent: ThreadHandle, agent_name: &str) -> Option<ThreadHandle> {
        self.thread(parent).forks.get(agent_name).copied()
    }

    /// Roll the child's accumulated price into the parent and reset the
    /// child's.  The fork stays registered and can be re-entered later;
    /// merging is pure price bookkeeping and may happen while the child is
    /// still running (non-final merge).
    pub fn merge(&mut self, parent: ThreadHandle, child: ThreadHandle) {
        let price = {
            let c = self.thread_mut(child);
            let price = c.price;
            c.price = 0.0;
            price
        };
        self.thread_mut(parent).price += price;
    }

    /// Price of this thread plus every ancestor up the fork chain.
    pub fn total_price(&self, handle: ThreadHandle) -> f64 {
        let mut total = 0.0;
        let mut current = Some(handle);
        while let Some(h) = current {
            let t = self.thread(h);
            total += t.price;
            current = t.parent;
        }
        total
    }
}

/// Budget-bounded view over a thread's log.
///
/// Without a budget this returns a pairing-clean copy of the log and leaves
/// the thread untouched.  With a budget the view algorithm runs on a
/// snapshot (the store lock is released while the compactor awaits) and
/// the resulting log is committed back, so repeated calls are idempotent.
/// A compactor failure propagates and leaves the log unchanged.
pub async fn budgeted_view(
    store: &SharedThreadStore,
    handle: ThreadHandle,
    budget: Option<usize>,
    compactor: Option<&dyn Compactor>,
) -> anyhow::Result<BudgetedView> {
    let snapshot = {
        let guard = store.lock().unwrap();
        guard.thread(handle).events().to_vec()
    };

    let Some(budget) = budget else {
        let mut events = snapshot;
        enforce_pairing(&mut events);
        return Ok(BudgetedView {
            events,
            compacted: false,
        });
    };

    let (log, compacted) = build_view(snapshot, budget, compactor).await?;
    {
        let mut guard = store.lock().unwrap();
        guard.thread_mut(handle).replace_events(log.clone());
    }
    Ok(BudgetedView {
        events: log,
        compacted,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ContentPart, ThreadEvent, ToolRequestDraft};
    use crate::thread::UsageDelta;

    fn store() -> ThreadStore {
        ThreadStore::new(3)
    }

    // ── Fork semantics ────────────────────────────────────────────────────────

    #[test]
    fn fork_same_key_returns_same_thread() {
        let mut s = store();
        let root = s.create("u", "main");
        let a1 = s.fork(root, "a").unwrap();
        let a2 = s.fork(root, "a").unwrap();
        assert_eq!(a1, a2);
    }

    #[test]
    fn fork_distinct_keys_return_distinct_threads() {
        let mut s = store();
        let root = s.create("u", "main");
        let a = s.fork(root, "a").unwrap();
        let b = s.fork(root, "b").unwrap();
        assert_ne!(a, b);
        assert_eq!(s.thread(a).id, s.thread(b).id, "family id is shared");
    }

    #[test]
    fn fork_logs_are_independent() {
        let mut s = store();
        let root = s.create("u", "main");
        s.thread_mut(root)
            .append_user_message("u", ContentPart::text("shared"));
        let child = s.fork(root, "a").unwrap();
        s.thread_mut(child)
            .append_agent_message("a", ContentPart::text("private"));
        assert_eq!(s.thread(root).events().len(), 1);
        assert_eq!(s.thread(child).events().len(), 2);
    }

    #[test]
    fn fork_copies_current_log() {
        let mut s = store();
        let root = s.create("u", "main");
        s.thread_mut(root)
            .append_user_message("u", ContentPart::text("hello"));
        let child = s.fork(root, "a").unwrap();
        assert_eq!(s.thread(child).events(), s.thread(root).events());
    }

    #[test]
    fn fork_marks_child_running_and_sets_depth() {
        let mut s = store();
        let root = s.create("u", "main");
        let child = s.fork(root, "a").unwrap();
        assert_eq!(s.thread(child).run_status, RunStatus::Running);
        assert_eq!(s.thread(child).delegation_depth, 1);
    }

    #[test]
    fn refork_returns_same_thread_marked_running() {
        let mut s = store();
        let root = s.create("u", "main");
        let child = s.fork(root, "a").unwrap();
        s.merge(root, child);
        s.thread_mut(child).run_status = RunStatus::Stopped;
        let again = s.fork(root, "a").unwrap();
        assert_eq!(again, child);
        assert_eq!(s.thread(child).run_status, RunStatus::Running);
    }

    #[test]
    fn fork_depth_is_capped() {
        let mut s = ThreadStore::new(2);
        let root = s.create("u", "main");
        let d1 = s.fork(root, "a").unwrap();
        let d2 = s.fork(d1, "b").unwrap();
        let err = s.fork(d2, "c").unwrap_err();
        assert!(matches!(err, ThreadError::DepthExceeded(3, 2)));
    }

    // ── Price roll-up ─────────────────────────────────────────────────────────

    #[test]
    fn merge_rolls_child_price_into_parent() {
        // S4: parent at 1.5, child earns 0.5, merge → parent 2.0, child 0.
        let mut s = store();
        let root = s.create("u", "main");
        s.thread_mut(root).price = 1.5;
        let child = s.fork(root, "a").unwrap();
        s.thread_mut(child).add_usage(UsageDelta {
            price: 0.5,
            ..Default::default()
        });
        s.merge(root, child);
        assert!((s.thread(root).price - 2.0).abs() < 1e-9);
        assert!((s.total_price(root) - 2.0).abs() < 1e-9);
        assert_eq!(s.thread(child).price, 0.0);
    }

    #[test]
    fn total_price_walks_the_parent_chain() {
        let mut s = store();
        let root = s.create("u", "main");
        s.thread_mut(root).price = 1.0;
        let mid = s.fork(root, "a").unwrap();
        s.thread_mut(mid).price = 0.25;
        let leaf = s.fork(mid, "b").unwrap();
        s.thread_mut(leaf).price = 0.05;
        assert!((s.total_price(leaf) - 1.30).abs() < 1e-9);
        assert!((s.total_price(mid) - 1.25).abs() < 1e-9);
        assert!((s.total_price(root) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn merge_twice_does_not_double_count() {
        let mut s = store();
        let root = s.create("u", "main");
        let child = s.fork(root, "a").unwrap();
        s.thread_mut(child).price = 0.4;
        s.merge(root, child);
        s.merge(root, child);
        assert!((s.thread(root).price - 0.4).abs() < 1e-9);
    }

    // ── Lookup ────────────────────────────────────────────────────────────────

    #[test]
    fn find_by_id_returns_root_not_fork() {
        let mut s = store();
        let root = s.create("u", "main");
        let _child = s.fork(root, "a").unwrap();
        let id = s.thread(root).id.clone();
        assert_eq!(s.find_by_id(&id), Some(root));
    }

    #[test]
    fn roots_excludes_forks() {
        let mut s = store();
        let r1 = s.create("u", "one");
        let r2 = s.create("u", "two");
        let _f = s.fork(r1, "a").unwrap();
        assert_eq!(s.roots(), vec![r1, r2]);
    }

    // ── Budgeted view over the shared store ───────────────────────────────────

    #[tokio::test]
    async fn nil_budget_returns_copy_without_mutation() {
        let shared = shared_store(3);
        let h = shared.lock().unwrap().create("u", "main");
        {
            let mut guard = shared.lock().unwrap();
            let t = guard.thread_mut(h);
            t.append_user_message("u", ContentPart::text("hello"));
            // An unanswered request sits in the raw log…
            t.append_tool_requests(vec![ToolRequestDraft {
                request_id: "pending".into(),
                name: "f".into(),
                args: "{}".into(),
            }]);
        }
        let view = budgeted_view(&shared, h, None, None).await.unwrap();
        // …but is filtered out of the returned view,
        assert_eq!(view.events.len(), 1);
        assert!(!view.compacted);
        // while the log itself keeps it for the response still to come.
        assert_eq!(shared.lock().unwrap().thread(h).events().len(), 2);
    }

    #[tokio::test]
    async fn budgeted_view_commits_and_is_idempotent() {
        let shared = shared_store(3);
        let h = shared.lock().unwrap().create("u", "main");
        {
            let mut guard = shared.lock().unwrap();
            let t = guard.thread_mut(h);
            for i in 0..5 {
                t.append_user_message("u", ContentPart::text(format!("message {i} {}", "x".repeat(40))));
                t.append_agent_message("dev", ContentPart::text(format!("reply {i} {}", "y".repeat(40))));
            }
        }
        let first = budgeted_view(&shared, h, Some(120), None).await.unwrap();
        assert!(first.compacted);
        let committed = shared.lock().unwrap().thread(h).events().to_vec();
        assert_eq!(committed, first.events, "view must be committed as the log");

        let second = budgeted_view(&shared, h, Some(120), None).await.unwrap();
        assert_eq!(second.events, first.events);
        assert!(!second.compacted, "second pass has nothing left to drop");
    }

    #[tokio::test]
    async fn failing_compactor_leaves_log_unchanged() {
        struct Failing;
        #[async_trait::async_trait]
        impl Compactor for Failing {
            async fn summarize(&self, _: &[ThreadEvent]) -> anyhow::Result<String> {
                anyhow::bail!("no model")
            }
        }
        let shared = shared_store(3);
        let h = shared.lock().unwrap().create("u", "main");
        {
            let mut guard = shared.lock().unwrap();
            let t = guard.thread_mut(h);
            for i in 0..5 {
                t.append_user_message("other", ContentPart::text(format!("long message {i} {}", "z".repeat(60))));
                t.append_agent_message("dev", ContentPart::text(format!("long reply {i} {}", "w".repeat(60))));
            }
        }
        let before = shared.lock().unwrap().thread(h).events().to_vec();
        let result = budgeted_view(&shared, h, Some(100), Some(&Failing)).await;
        assert!(result.is_err());
        let after = shared.lock().unwrap().thread(h).events().to_vec();
        assert_eq!(before, after);
    }
}
