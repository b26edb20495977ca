// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Integration tests wiring the crates together with the offline provider.
use std::sync::Arc;

use freja_config::{AgentDefinition, Config};
use freja_core::{Agent, CommandContext, Interactor, UiEvent};
use freja_model::OfflineProvider;
use freja_store::{Repository, ThreadRecord, YamlRepository};
use freja_thread::{shared_store, Role, ThreadEvent};
use freja_tools::Toolbox;

fn offline_context() -> Arc<CommandContext> {
    let config = Arc::new(Config::default());
    let mut ctx = CommandContext::new(
        Arc::clone(&config),
        shared_store(config.limits.max_delegation_depth),
        Arc::new(Interactor::new()),
        Arc::new(Toolbox::new()),
    );
    ctx.register_agent(Agent::new(
        AgentDefinition {
            name: "freja".into(),
            ..Default::default()
        },
        Arc::new(OfflineProvider),
    ));
    Arc::new(ctx)
}

#[tokio::test]
async fn agent_answers_offline() {
    let ctx = offline_context();
    let mut rx = ctx.interactor.subscribe();
    let thread = ctx.create_thread("t");
    let agent = ctx.agent(Some("freja")).unwrap();

    agent.run("hello", thread, &ctx).await.unwrap();

    let mut got_text = false;
    while let Ok(event) = rx.try_recv() {
        if let UiEvent::Text { text, .. } = event {
            assert!(text.contains("you said: hello"));
            got_text = true;
        }
    }
    assert!(got_text, "expected at least one Text event");
}

#[tokio::test]
async fn conversation_survives_a_save_and_reload() {
    let ctx = offline_context();
    let thread = ctx.create_thread("persisted");
    let agent = ctx.agent(None).unwrap();
    agent.run("remember me", thread, &ctx).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let repo: YamlRepository<ThreadRecord> = YamlRepository::new(dir.path());
    let record = {
        let store = ctx.store.lock().unwrap();
        ThreadRecord::from_thread(store.thread(thread))
    };
    repo.save(&record.id, &record).unwrap();

    let loaded = repo.get(&record.id).unwrap().expect("record exists");
    let restored = loaded.into_thread();
    assert_eq!(restored.events().len(), 2, "user turn + assistant turn");
    assert!(matches!(
        restored.events()[0],
        ThreadEvent::Message { role: Role::User, .. }
    ));
    assert!(restored
        .events()[1]
        .render()
        .contains("you said: remember me"));
}

#[tokio::test]
async fn default_agent_resolution_uses_config() {
    let ctx = offline_context();
    assert!(ctx.agent(None).is_some(), "first registered agent is the default");
    assert!(ctx.agent(Some("freja")).is_some());
    assert!(ctx.agent(Some("ghost")).is_none());
}
