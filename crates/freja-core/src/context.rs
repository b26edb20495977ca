// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use freja_config::Config;
use freja_team::{Team, TeamError};
use freja_thread::{SharedThreadStore, ThreadHandle};
use freja_tools::{ToolContext, Toolbox};

use crate::{Agent, Interactor};

/// Everything a command or agent run needs, threaded explicitly instead of
/// living in module-level registries: configuration, the thread arena, the
/// event bus, the toolbox, the agent registry, teams, and the queue of
/// commands scheduled for the next user prompt.
pub struct CommandContext {
    pub config: Arc<Config>,
    pub store: SharedThreadStore,
    pub interactor: Arc<Interactor>,
    pub toolbox: Arc<Toolbox>,
    agents: HashMap<String, Agent>,
    teams: Mutex<HashMap<String, Arc<Team>>>,
    current_team: Mutex<Option<Arc<Team>>>,
    queued_commands: Mutex<VecDeque<String>>,
}

impl CommandContext {
    pub fn new(
        config: Arc<Config>,
        store: SharedThreadStore,
        interactor: Arc<Interactor>,
        toolbox: Arc<Toolbox>,
    ) -> Self {
        Self {
            config,
            store,
            interactor,
            toolbox,
            agents: HashMap::new(),
            teams: Mutex::new(HashMap::new()),
            current_team: Mutex::new(None),
            queued_commands: Mutex::new(VecDeque::new()),
        }
    }

    /// Register an agent at build time.  Later registrations with the same
    /// name replace the earlier one.
    pub fn register_agent(&mut self, agent: Agent) {
        self.agents.insert(agent.name.clone(), agent);
    }

    /// Look up an agent by name, or resolve the configured default when
    /// `name` is `None`.  Falls back to the first registered agent (by
    /// name) when the config names no default.
    pub fn agent(&self, name: Option<&str>) -> Option<Agent> {
        match name {
            Some(n) => self.agents.get(n).cloned(),
            None => {
                if let Some(agent) = self
                    .config
                    .agent(None)
                    .and_then(|def| self.agents.get(&def.name))
                {
                    return Some(agent.clone());
                }
                let names = self.agent_names();
                names.first().and_then(|n| self.agents.get(n).cloned())
            }
        }
    }

    pub fn agent_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    /// Create a root thread with the configured username and run limits.
    pub fn create_thread(&self, name: &str) -> ThreadHandle {
        let username = self
            .config
            .project
            .username
            .clone()
            .unwrap_or_else(|| "user".to_string());
        let mut store = self.store.lock().unwrap();
        let handle = store.create(username, name);
        let thread = store.thread_mut(handle);
        thread.usage.iteration_limit = self.config.limits.iteration_limit;
        thread.usage.price_limit = self.config.limits.price_limit;
        handle
    }

    /// The team the current session coordinates, created on first use.
    pub fn ensure_team(&self, lead_agent_name: &str) -> Arc<Team> {
        let mut current = self.current_team.lock().unwrap();
        if let Some(team) = current.as_ref() {
            return Arc::clone(team);
        }
        let team = Arc::new(Team::new(Uuid::new_v4().to_string(), lead_agent_name));
        self.teams
            .lock()
            .unwrap()
            .insert(team.id.clone(), Arc::clone(&team));
        *current = Some(Arc::clone(&team));
        team
    }

    pub fn current_team(&self) -> Option<Arc<Team>> {
        self.current_team.lock().unwrap().clone()
    }

    pub fn team(&self, id: &str) -> Option<Arc<Team>> {
        self.teams.lock().unwrap().get(id).cloned()
    }

    /// Shut the team down (all members stopped, waiters cleared) and forget
    /// it.
    pub async fn cleanup_team(&self, id: &str) -> Result<(), TeamError> {
        let team = self
            .teams
            .lock()
            .unwrap()
            .remove(id)
            .ok_or_else(|| TeamError::UnknownTeam(id.to_string()))?;
        {
            let mut current = self.current_team.lock().unwrap();
            if current.as_ref().is_some_and(|t| t.id == id) {
                *current = None;
            }
        }
        team.cleanup().await;
        Ok(())
    }

    /// Schedule a command to run before the next user prompt (used by the
    /// `query_user` tool; does not block the current turn).
    pub fn queue_command(&self, command: impl Into<String>) {
        self.queued_commands.lock().unwrap().push_back(command.into());
    }

    pub fn next_command(&self) -> Option<String> {
        self.queued_commands.lock().unwrap().pop_front()
    }

    /// Tool context for an agent running at the given delegation depth.
    pub fn tool_context(&self, delegation_depth: u32) -> ToolContext {
        ToolContext {
            project_root: self.config.project.root.clone().map(PathBuf::from),
            delegation_depth,
            integrations: Vec::new(),
        }
    }

    pub fn username(&self) -> String {
        self.config
            .project
            .username
            .clone()
            .unwrap_or_else(|| "user".to_string())
    }
}
