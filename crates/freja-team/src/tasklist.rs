// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("unknown dependency id: {0}")]
    UnknownDependency(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: u64,
    pub description: String,
    pub dependencies: Vec<u64>,
    pub assignee: Option<String>,
    pub status: TaskStatus,
    pub result: Option<String>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    tasks: Vec<Task>,
}

impl Inner {
    fn get(&self, id: u64) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    fn get_mut(&mut self, id: u64) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    fn deps_completed(&self, task: &Task) -> bool {
        task.dependencies
            .iter()
            .all(|d| matches!(self.get(*d), Some(t) if t.status == TaskStatus::Completed))
    }
}

/// Shared task list with a dependency DAG and per-agent assignment.
///
/// Dependencies may only reference tasks that already exist, which makes
/// cycles unconstructible.  All transitions run under one mutex, so claim
/// is linearizable: of two racing claims on the same task exactly one
/// succeeds.
#[derive(Default)]
pub struct TaskList {
    inner: Mutex<Inner>,
}

impl TaskList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pending task.  Every dependency must name an existing task.
    pub fn create_task(
        &self,
        description: impl Into<String>,
        dependencies: Vec<u64>,
        assignee: Option<String>,
    ) -> Result<Task, TaskError> {
        let mut inner = self.inner.lock().unwrap();
        for dep in &dependencies {
            if inner.get(*dep).is_none() {
                return Err(TaskError::UnknownDependency(*dep));
            }
        }
        inner.next_id += 1;
        let task = Task {
            id: inner.next_id,
            description: description.into(),
            dependencies,
            assignee,
            status: TaskStatus::Pending,
            result: None,
        };
        inner.tasks.push(task.clone());
        Ok(task)
    }

    /// Move a task `pending → in_progress`.  Succeeds only when every
    /// dependency is completed and the task is unassigned or assigned to
    /// `agent`.
    pub fn claim(&self, task_id: u64, agent: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(task) = inner.get(task_id).cloned() else {
            return false;
        };
        if task.status != TaskStatus::Pending
            || !inner.deps_completed(&task)
            || task.assignee.as_deref().is_some_and(|a| a != agent)
        {
            return false;
        }
        let task = inner.get_mut(task_id).unwrap();
        task.status = TaskStatus::InProgress;
        task.assignee = Some(agent.to_string());
        true
    }

    /// Move a task `in_progress → completed`.  Only the claiming agent may
    /// complete it.
    pub fn complete(&self, task_id: u64, agent: &str, result: Option<String>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(task) = inner.get_mut(task_id) else {
            return false;
        };
        if task.status != TaskStatus::InProgress || task.assignee.as_deref() != Some(agent) {
            return false;
        }
        task.status = TaskStatus::Completed;
        task.result = result;
        true
    }

    /// Pending tasks whose dependencies are all completed.
    pub fn available(&self) -> Vec<Task> {
        let inner = self.inner.lock().unwrap();
        inner
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending && inner.deps_completed(t))
            .cloned()
            .collect()
    }

    /// Every task assigned to `agent`, regardless of status.
    pub fn for_agent(&self, agent: &str) -> Vec<Task> {
        let inner = self.inner.lock().unwrap();
        inner
            .tasks
            .iter()
            .filter(|t| t.assignee.as_deref() == Some(agent))
            .cloned()
            .collect()
    }

    pub fn list(&self) -> Vec<Task> {
        self.inner.lock().unwrap().tasks.clone()
    }

    pub fn get(&self, id: u64) -> Option<Task> {
        self.inner.lock().unwrap().get(id).cloned()
    }

    pub fn all_completed(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .tasks
            .iter()
            .all(|t| t.status == TaskStatus::Completed)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
