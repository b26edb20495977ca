// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::{Mailbox, TaskList, SHUTDOWN};

#[derive(Debug, thiserror::Error)]
pub enum TeamError {
    #[error("teammate already exists: {0}")]
    DuplicateMember(String),
    #[error("no such teammate: {0}")]
    UnknownMember(String),
    #[error("no such team: {0}")]
    UnknownTeam(String),
}

/// Lifecycle state of a teammate.  `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeammateStatus {
    Idle,
    Working,
    Stopped,
}

/// Invoked on every status transition with the teammate's name; the core
/// wires this to a TeamEvent on the interactor.
pub type StatusCallback = Arc<dyn Fn(&str, TeammateStatus) + Send + Sync>;

/// The body of one teammate iteration: run the agent to completion on the
/// given input.  Injected by the caller so this crate stays independent of
/// the agent loop.  Errors are reported and swallowed; the session keeps
/// waiting for the next message.
pub type Worker = Box<dyn FnMut(String) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// A long-lived teammate: an independent task alternating between working
/// on an input and waiting on its mailbox.
pub struct TeammateSession {
    pub name: String,
    status: Arc<Mutex<TeammateStatus>>,
    should_stop: Arc<AtomicBool>,
    mailbox: Arc<Mailbox>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TeammateSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeammateSession")
            .field("name", &self.name)
            .field("status", &*self.status.lock().unwrap())
            .finish()
    }
}

impl TeammateSession {
    /// Start the run loop on a fresh tokio task.  The session processes
    /// `initial_task` immediately, then loops on `mailbox.wait_for_message`
    /// until it is shut down or receives the shutdown sentinel.
    pub fn spawn(
        name: impl Into<String>,
        initial_task: String,
        mailbox: Arc<Mailbox>,
        mut worker: Worker,
        on_status: StatusCallback,
    ) -> Self {
        let name = name.into();
        let status = Arc::new(Mutex::new(TeammateStatus::Idle));
        let should_stop = Arc::new(AtomicBool::new(false));

        let loop_name = name.clone();
        let loop_status = Arc::clone(&status);
        let loop_stop = Arc::clone(&should_stop);
        let loop_mailbox = Arc::clone(&mailbox);
        let handle = tokio::spawn(async move {
            let set_status = |next: TeammateStatus| {
                let mut current = loop_status.lock().unwrap();
                if *current != TeammateStatus::Stopped {
                    *current = next;
                    drop(current);
                    on_status(&loop_name, next);
                }
            };

            let mut input = initial_task;
            loop {
                if loop_stop.load(Ordering::SeqCst) {
                    break;
                }
                set_status(TeammateStatus::Working);
                if let Err(e) = worker(input.clone()).await {
                    warn!(teammate = %loop_name, error = %e, "teammate run failed; waiting for next message");
                }
                if loop_stop.load(Ordering::SeqCst) {
                    break;
                }
                set_status(TeammateStatus::Idle);
                input = loop_mailbox.wait_for_message(&loop_name).await;
                if input == SHUTDOWN {
                    break;
                }
            }
            set_status(TeammateStatus::Stopped);
        });

        Self {
            name,
            status,
            should_stop,
            mailbox,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn status(&self) -> TeammateStatus {
        *self.status.lock().unwrap()
    }

    /// Set the stop flag without waking the session.  The loop exits after
    /// the current iteration.
    pub fn request_stop(&self) {
        self.should_stop.store(true, Ordering::SeqCst);
    }

    /// Stop the session and wait for its run loop to finish: sets the stop
    /// flag, cancels the mailbox waiter, and joins the task.
    pub async fn shutdown(&self) {
        self.should_stop.store(true, Ordering::SeqCst);
        self.mailbox.cancel_waiters(&self.name);
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// A team: shared task list and mailbox plus the registered teammates.
pub struct Team {
    pub id: String,
    pub lead_agent_name: String,
    pub task_list: Arc<TaskList>,
    pub mailbox: Arc<Mailbox>,
    members: Mutex<HashMap<String, Arc<TeammateSession>>>,
}

impl Team {
    pub fn new(id: impl Into<String>, lead_agent_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            lead_agent_name: lead_agent_name.into(),
            task_list: Arc::new(TaskList::new()),
            mailbox: Arc::new(Mailbox::new()),
            members: Mutex::new(HashMap::new()),
        }
    }

    /// Register a spawned session.  Refuses duplicates by name.
    pub fn register(&self, session: TeammateSession) -> Result<Arc<TeammateSession>, TeamError> {
        let mut members = self.members.lock().unwrap();
        if members.contains_key(&session.name) {
            return Err(TeamError::DuplicateMember(session.name.clone()));
        }
        let session = Arc::new(session);
        members.insert(session.name.clone(), Arc::clone(&session));
        Ok(session)
    }

    pub fn member(&self, name: &str) -> Option<Arc<TeammateSession>> {
        self.members.lock().unwrap().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.lock().unwrap().contains_key(name)
    }

    pub fn member_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.members.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Every addressable name in the team: members plus the lead.
    pub fn roster(&self) -> Vec<String> {
        let mut names = self.member_names();
        names.push(self.lead_agent_name.clone());
        names.sort();
        names.dedup();
        names
    }

    /// Cancel every waiter, shut all members down in parallel, and clear
    /// the member table.  Afterwards every session is `Stopped` and no
    /// waiter remains registered.
    pub async fn cleanup(&self) {
        self.mailbox.cancel_all_waiters();
        let members: Vec<Arc<TeammateSession>> =
            self.members.lock().unwrap().values().cloned().collect();
        futures::future::join_all(members.iter().map(|m| m.shutdown())).await;
        self.members.lock().unwrap().clear();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
