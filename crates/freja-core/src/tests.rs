// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! End-to-end run-loop tests driven by scripted providers.

use std::sync::Arc;

use freja_config::{AgentDefinition, Config, ModelPricing, RunLimits};
use freja_model::{ProviderClient, ReplayProvider, ReplayTurn};
use freja_team::TeammateStatus;
use freja_thread::{shared_store, Role, ThreadEvent, ThreadHandle};
use freja_tools::Toolbox;

use crate::{Agent, CommandContext, Interactor, TeamEventKind, UiEvent};

fn definition(name: &str) -> AgentDefinition {
    AgentDefinition {
        name: name.into(),
        ..Default::default()
    }
}

fn make_ctx(config: Config, agents: Vec<Agent>) -> Arc<CommandContext> {
    let mut ctx = CommandContext::new(
        Arc::new(config),
        shared_store(3),
        Arc::new(Interactor::new()),
        Arc::new(Toolbox::new()),
    );
    for agent in agents {
        ctx.register_agent(agent);
    }
    Arc::new(ctx)
}

fn events_of(ctx: &Arc<CommandContext>, thread: ThreadHandle) -> Vec<ThreadEvent> {
    ctx.store.lock().unwrap().thread(thread).events().to_vec()
}

fn assistant_texts(events: &[ThreadEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|ev| match ev {
            ThreadEvent::Message {
                role: Role::Assistant,
                ..
            } => Some(ev.render()),
            _ => None,
        })
        .collect()
}

// ── Natural stop ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn text_only_turn_stops_the_run() {
    let provider = Arc::new(ReplayProvider::replying("hello there"));
    let agent = Agent::new(definition("dev"), provider);
    let ctx = make_ctx(Config::default(), vec![agent.clone()]);
    let thread = ctx.create_thread("t");

    agent.run("hi", thread, &ctx).await.unwrap();

    let events = events_of(&ctx, thread);
    assert_eq!(events.len(), 2, "user message + assistant reply");
    assert!(events[0].is_message());
    assert!(assistant_texts(&events)[0].contains("hello there"));
}

#[tokio::test]
async fn run_emits_text_and_thread_update_events() {
    let provider = Arc::new(ReplayProvider::replying("reply"));
    let agent = Agent::new(definition("dev"), provider);
    let ctx = make_ctx(Config::default(), vec![agent.clone()]);
    let mut rx = ctx.interactor.subscribe();
    let thread = ctx.create_thread("t");

    agent.run("hi", thread, &ctx).await.unwrap();

    let mut saw_text = false;
    let mut saw_update = false;
    while let Ok(ev) = rx.try_recv() {
        match ev {
            UiEvent::Text { agent, text } => {
                assert_eq!(agent, "dev");
                assert_eq!(text, "reply");
                saw_text = true;
            }
            UiEvent::ThreadUpdate { .. } => saw_update = true,
            _ => {}
        }
    }
    assert!(saw_text, "assistant text must be published");
    assert!(saw_update, "run end must publish a thread update");
}

#[tokio::test]
async fn run_records_usage_and_iterations() {
    let provider = Arc::new(ReplayProvider::new([
        ReplayTurn::text("reply").usage(120, 40),
    ]));
    let agent = Agent::new(definition("dev"), provider);
    let ctx = make_ctx(Config::default(), vec![agent.clone()]);
    let thread = ctx.create_thread("t");

    agent.run("hi", thread, &ctx).await.unwrap();

    let store = ctx.store.lock().unwrap();
    let usage = &store.thread(thread).usage;
    assert_eq!(usage.iterations, 1);
    assert_eq!(usage.input_tokens, 120);
    assert_eq!(usage.output_tokens, 40);
}

// ── Tool dispatch ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn tool_call_round_appends_paired_request_and_response() {
    // The tool is unknown; the response carries the error string and the
    // model recovers on the next round.
    let provider = Arc::new(ReplayProvider::new([
        ReplayTurn::tool_call("call-1", "bogus_tool", r#"{"x":1}"#),
        ReplayTurn::text("recovered"),
    ]));
    let agent = Agent::new(definition("dev"), provider);
    let ctx = make_ctx(Config::default(), vec![agent.clone()]);
    let thread = ctx.create_thread("t");

    agent.run("go", thread, &ctx).await.unwrap();

    let events = events_of(&ctx, thread);
    let request = events.iter().find_map(|ev| match ev {
        ThreadEvent::ToolRequest { request_id, name, .. } => Some((request_id.clone(), name.clone())),
        _ => None,
    });
    assert_eq!(request, Some(("call-1".to_string(), "bogus_tool".to_string())));
    let response = events.iter().find_map(|ev| match ev {
        ThreadEvent::ToolResponse { output, .. } => Some(output.clone()),
        _ => None,
    });
    assert!(response.unwrap().contains("unknown tool"));
    assert!(assistant_texts(&events).iter().any(|t| t.contains("recovered")));
}

#[tokio::test]
async fn query_user_schedules_a_command_without_blocking() {
    let provider = Arc::new(ReplayProvider::new([
        ReplayTurn::tool_call("call-1", "query_user", r#"{"message":"which environment?"}"#),
        ReplayTurn::text("asked the user"),
    ]));
    let agent = Agent::new(definition("dev"), provider);
    let ctx = make_ctx(Config::default(), vec![agent.clone()]);
    let thread = ctx.create_thread("t");

    agent.run("deploy", thread, &ctx).await.unwrap();

    assert_eq!(ctx.next_command().as_deref(), Some("which environment?"));
    assert_eq!(ctx.next_command(), None);
}

// ── Run limits ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn iteration_limit_stops_run_with_warning() {
    let config = Config {
        limits: RunLimits {
            iteration_limit: 1,
            ..RunLimits::default()
        },
        ..Config::default()
    };
    // One round with a tool call; without the limit a second round would run.
    let provider = Arc::new(ReplayProvider::new([
        ReplayTurn::tool_call("call-1", "bogus_tool", "{}"),
        ReplayTurn::text("never reached"),
    ]));
    let agent = Agent::new(definition("dev"), provider);
    let ctx = make_ctx(config, vec![agent.clone()]);
    let mut rx = ctx.interactor.subscribe();
    let thread = ctx.create_thread("t");

    agent.run("go", thread, &ctx).await.unwrap();

    let mut warned = None;
    while let Ok(ev) = rx.try_recv() {
        if let UiEvent::Warn(m) = ev {
            warned = Some(m);
        }
    }
    let message = warned.expect("a Warn event must name the breached limit");
    assert!(message.contains("iteration"), "{message}");
    let events = events_of(&ctx, thread);
    assert!(
        !assistant_texts(&events).iter().any(|t| t.contains("never reached")),
        "the second round must not run"
    );
}

#[tokio::test]
async fn price_limit_stops_run_with_warning() {
    let config = Config {
        limits: RunLimits {
            price_limit: 0.000_001,
            ..RunLimits::default()
        },
        ..Config::default()
    };
    let mut def = definition("dev");
    def.pricing = ModelPricing {
        input_per_million: 3.0,
        output_per_million: 15.0,
        cache_read_per_million: 0.0,
    };
    let provider = Arc::new(ReplayProvider::new([
        ReplayTurn::text("pricey").usage(3_000, 1_000),
    ]));
    let agent = Agent::new(def, provider);
    let ctx = make_ctx(config, vec![agent.clone()]);
    let mut rx = ctx.interactor.subscribe();
    let thread = ctx.create_thread("t");

    agent.run("go", thread, &ctx).await.unwrap();

    let mut warned = None;
    while let Ok(ev) = rx.try_recv() {
        if let UiEvent::Warn(m) = ev {
            warned = Some(m);
        }
    }
    assert!(warned.expect("price warn expected").contains("price"));
    let store = ctx.store.lock().unwrap();
    assert!(store.thread(thread).price > 0.0);
}

// ── Cancellation ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn dropped_cancel_sender_skips_the_run() {
    let provider = Arc::new(ReplayProvider::replying("never"));
    let agent = Agent::new(definition("dev"), provider);
    let ctx = make_ctx(Config::default(), vec![agent.clone()]);
    let thread = ctx.create_thread("t");

    let (tx, mut cancel) = tokio::sync::oneshot::channel::<()>();
    drop(tx);
    agent
        .run_with_cancel("hi", thread, &ctx, &mut cancel)
        .await
        .unwrap();

    assert!(events_of(&ctx, thread).is_empty(), "a killed run appends nothing");
}

#[tokio::test]
async fn explicit_kill_before_run_appends_nothing() {
    let provider = Arc::new(ReplayProvider::replying("never"));
    let agent = Agent::new(definition("dev"), provider);
    let ctx = make_ctx(Config::default(), vec![agent.clone()]);
    let thread = ctx.create_thread("t");

    let (tx, mut cancel) = tokio::sync::oneshot::channel::<()>();
    tx.send(()).unwrap();
    agent
        .run_with_cancel("hi", thread, &ctx, &mut cancel)
        .await
        .unwrap();

    assert!(events_of(&ctx, thread).is_empty());
}

// ── Provider failure ──────────────────────────────────────────────────────────

#[tokio::test]
async fn provider_stream_item_error_aborts_turn_with_error_event() {
    struct BrokenProvider;
    #[async_trait::async_trait]
    impl ProviderClient for BrokenProvider {
        fn name(&self) -> &str {
            "broken"
        }
        fn model_name(&self) -> &str {
            "broken"
        }
        async fn complete(
            &self,
            _req: freja_model::CompletionRequest,
        ) -> anyhow::Result<freja_model::ResponseStream> {
            anyhow::bail!("connection refused")
        }
    }
    let agent = Agent::new(definition("dev"), Arc::new(BrokenProvider));
    let ctx = make_ctx(Config::default(), vec![agent.clone()]);
    let mut rx = ctx.interactor.subscribe();
    let thread = ctx.create_thread("t");

    let result = agent.run("hi", thread, &ctx).await;
    assert!(result.is_err());

    let mut saw_error = false;
    while let Ok(ev) = rx.try_recv() {
        if matches!(ev, UiEvent::Error(_)) {
            saw_error = true;
        }
    }
    assert!(saw_error, "a provider failure must surface as an Error event");
}

// ── Delegation ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn delegate_runs_helper_on_fork_and_merges_price() {
    let lead_provider = Arc::new(ReplayProvider::new([
        ReplayTurn::tool_call("call-1", "delegate", r#"{"agent":"helper","query":"analyze the logs"}"#),
        ReplayTurn::text("done with help"),
    ]));
    let mut helper_def = definition("helper");
    helper_def.pricing = ModelPricing {
        input_per_million: 100.0,
        output_per_million: 100.0,
        cache_read_per_million: 0.0,
    };
    let helper = Agent::new(
        helper_def,
        Arc::new(ReplayProvider::new([
            ReplayTurn::text("sub answer").usage(6_000, 4_000),
        ])),
    );
    let lead = Agent::new(definition("lead"), lead_provider);
    let ctx = make_ctx(Config::default(), vec![lead.clone(), helper]);
    let thread = ctx.create_thread("t");

    lead.run("investigate", thread, &ctx).await.unwrap();

    let events = events_of(&ctx, thread);
    let response = events
        .iter()
        .find_map(|ev| match ev {
            ThreadEvent::ToolResponse { output, .. } => Some(output.clone()),
            _ => None,
        })
        .expect("delegate response present");
    assert_eq!(response, "sub answer");
    assert!(assistant_texts(&events).iter().any(|t| t.contains("done with help")));

    let store = ctx.store.lock().unwrap();
    let child = store.fork_of(thread, "helper").expect("fork registered");
    assert_eq!(store.thread(child).id, store.thread(thread).id);
    // helper: 6k input + 4k output tokens at $100/M each = $1.00, merged up.
    assert!((store.thread(thread).price - 1.0).abs() < 1e-9);
    assert_eq!(store.thread(child).price, 0.0);
    // The child log grew independently of the parent's.
    assert!(store.thread(child).events().len() >= 2);
}

#[tokio::test]
async fn redirect_runs_helper_on_the_same_thread() {
    let lead_provider = Arc::new(ReplayProvider::new([
        ReplayTurn::tool_call("call-1", "redirect", r#"{"agent":"helper","query":"take over"}"#),
        ReplayTurn::text("back at the lead"),
    ]));
    let helper = Agent::new(
        definition("helper"),
        Arc::new(ReplayProvider::replying("helper takeover")),
    );
    let lead = Agent::new(definition("lead"), lead_provider);
    let ctx = make_ctx(Config::default(), vec![lead.clone(), helper]);
    let thread = ctx.create_thread("t");

    lead.run("handoff", thread, &ctx).await.unwrap();

    let store = ctx.store.lock().unwrap();
    assert!(
        store.fork_of(thread, "helper").is_none(),
        "redirect must not fork"
    );
    drop(store);
    let events = events_of(&ctx, thread);
    let texts = assistant_texts(&events);
    assert!(texts.iter().any(|t| t.contains("helper takeover")));
    assert!(texts.iter().any(|t| t.contains("back at the lead")));
}

#[tokio::test]
async fn delegate_to_unknown_agent_recovers_via_tool_error() {
    let provider = Arc::new(ReplayProvider::new([
        ReplayTurn::tool_call("call-1", "delegate", r#"{"agent":"ghost","query":"boo"}"#),
        ReplayTurn::text("recovered"),
    ]));
    let agent = Agent::new(definition("dev"), provider);
    let ctx = make_ctx(Config::default(), vec![agent.clone()]);
    let thread = ctx.create_thread("t");

    agent.run("go", thread, &ctx).await.unwrap();

    let events = events_of(&ctx, thread);
    let response = events
        .iter()
        .find_map(|ev| match ev {
            ThreadEvent::ToolResponse { output, .. } => Some(output.clone()),
            _ => None,
        })
        .unwrap();
    assert!(response.contains("unknown agent"));
}

// ── Teams ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn spawn_teammate_forks_registers_and_cleans_up() {
    let lead_provider = Arc::new(ReplayProvider::new([
        ReplayTurn::tool_call("call-1", "spawn_teammate", r#"{"agent":"worker","task":"index the repo"}"#),
        ReplayTurn::text("teammate launched"),
    ]));
    let worker = Agent::new(
        definition("worker"),
        Arc::new(ReplayProvider::replying("indexed")),
    );
    let lead = Agent::new(definition("lead"), lead_provider);
    let ctx = make_ctx(Config::default(), vec![lead.clone(), worker]);
    let mut rx = ctx.interactor.subscribe();
    let thread = ctx.create_thread("t");

    lead.run("build a team", thread, &ctx).await.unwrap();

    let team = ctx.current_team().expect("team created on spawn");
    let session = team.member("worker").expect("worker registered");
    // Wait until the worker finished its initial task.
    while session.status() != TeammateStatus::Idle {
        tokio::task::yield_now().await;
    }
    {
        let store = ctx.store.lock().unwrap();
        assert!(store.fork_of(thread, "worker").is_some(), "teammate runs on a fork");
    }

    let mut saw_spawn = false;
    while let Ok(ev) = rx.try_recv() {
        if let UiEvent::TeamEvent { kind, member, .. } = ev {
            if kind == TeamEventKind::TeammateSpawned {
                assert_eq!(member, "worker");
                saw_spawn = true;
            }
        }
    }
    assert!(saw_spawn);

    let team_id = team.id.clone();
    ctx.cleanup_team(&team_id).await.unwrap();
    assert_eq!(session.status(), TeammateStatus::Stopped);
    assert_eq!(team.mailbox.total_waiters(), 0);
    assert!(ctx.current_team().is_none());
}

#[tokio::test]
async fn spawning_the_same_teammate_twice_is_refused() {
    let lead_provider = Arc::new(ReplayProvider::new([
        ReplayTurn::tool_call("c1", "spawn_teammate", r#"{"agent":"worker","task":"first"}"#),
        ReplayTurn::tool_call("c2", "spawn_teammate", r#"{"agent":"worker","task":"second"}"#),
        ReplayTurn::text("done"),
    ]));
    let worker = Agent::new(
        definition("worker"),
        Arc::new(ReplayProvider::replying("working")),
    );
    let lead = Agent::new(definition("lead"), lead_provider);
    let ctx = make_ctx(Config::default(), vec![lead.clone(), worker]);
    let thread = ctx.create_thread("t");

    lead.run("spawn twice", thread, &ctx).await.unwrap();

    let events = events_of(&ctx, thread);
    let responses: Vec<String> = events
        .iter()
        .filter_map(|ev| match ev {
            ThreadEvent::ToolResponse { output, .. } => Some(output.clone()),
            _ => None,
        })
        .collect();
    assert!(responses.iter().any(|r| r.contains("already exists")));

    let team = ctx.current_team().unwrap();
    let id = team.id.clone();
    ctx.cleanup_team(&id).await.unwrap();
}

#[tokio::test]
async fn lead_can_message_teammate_through_the_mailbox() {
    let lead_provider = Arc::new(ReplayProvider::new([
        ReplayTurn::tool_call("c1", "spawn_teammate", r#"{"agent":"worker","task":"start"}"#),
        ReplayTurn::tool_call("c2", "send_message", r#"{"to":"worker","content":"ship it"}"#),
        ReplayTurn::text("sent"),
    ]));
    // Worker handles the initial task, then the mailbox wakeup.
    let worker = Agent::new(
        definition("worker"),
        Arc::new(ReplayProvider::new([
            ReplayTurn::text("started"),
            ReplayTurn::text("shipped"),
        ])),
    );
    let lead = Agent::new(definition("lead"), lead_provider);
    let ctx = make_ctx(Config::default(), vec![lead.clone(), worker]);
    let thread = ctx.create_thread("t");

    lead.run("coordinate", thread, &ctx).await.unwrap();

    // The worker eventually processes the mailbox message on its fork.
    let team = ctx.current_team().unwrap();
    let child = {
        let store = ctx.store.lock().unwrap();
        store.fork_of(thread, "worker").unwrap()
    };
    loop {
        let texts = {
            let store = ctx.store.lock().unwrap();
            assistant_texts(store.thread(child).events())
        };
        if texts.iter().any(|t| t.contains("shipped")) {
            break;
        }
        tokio::task::yield_now().await;
    }
    // The wakeup input carried the formatted mailbox message.
    let child_events = {
        let store = ctx.store.lock().unwrap();
        store.thread(child).events().to_vec()
    };
    assert!(child_events
        .iter()
        .any(|ev| ev.render().contains("Message from lead: ship it")));

    let id = team.id.clone();
    ctx.cleanup_team(&id).await.unwrap();
}
