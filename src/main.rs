// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;
mod interpolate;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use freja_config::Config;
use freja_core::{Agent, CommandContext, Interactor, UiEvent};
use freja_model::{OfflineProvider, ProviderClient};
use freja_store::{PromptChain, Repository, ThreadRecord, YamlRepository};
use freja_thread::{shared_store, ThreadHandle};
use freja_tools::Toolbox;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(Commands::ShowConfig) = &cli.command {
        let config = freja_config::load(cli.config.as_deref())?;
        println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
        return Ok(());
    }

    let mut config = freja_config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(project) = &cli.project {
        config.project.root = Some(project.display().to_string());
    }

    let threads: YamlRepository<ThreadRecord> = YamlRepository::new(data_dir()?.join("threads"));
    let prompts: YamlRepository<PromptChain> = YamlRepository::new(data_dir()?.join("prompts"));

    if let Some(Commands::Threads) = &cli.command {
        for id in threads.list()? {
            if let Some(record) = threads.get(&id)? {
                println!("{id}  {}  ({})", record.name, record.modified);
            }
        }
        return Ok(());
    }

    let ctx = build_context(config);
    run_repl(ctx, threads, prompts).await
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_env("FREJA_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "info" } else { "warn" })
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn data_dir() -> anyhow::Result<PathBuf> {
    let base = dirs::data_dir().context("no data directory on this platform")?;
    Ok(base.join("freja"))
}

/// Wire configuration into a command context: one registered agent per
/// definition, each bound to its provider.  Concrete provider clients are
/// supplied by integrations; without one, agents answer offline.
fn build_context(config: Config) -> Arc<CommandContext> {
    let config = Arc::new(config);
    let store = shared_store(config.limits.max_delegation_depth);
    let interactor = Arc::new(Interactor::new());
    let toolbox = Arc::new(Toolbox::new());

    let mut ctx = CommandContext::new(
        Arc::clone(&config),
        store,
        interactor,
        toolbox,
    );
    if config.agents.is_empty() {
        let def = freja_config::AgentDefinition {
            name: "freja".into(),
            description: "default assistant".into(),
            ..Default::default()
        };
        ctx.register_agent(Agent::new(def, Arc::new(OfflineProvider)));
    }
    for def in &config.agents {
        let provider: Arc<dyn ProviderClient> = Arc::new(OfflineProvider);
        ctx.register_agent(Agent::new(def.clone(), provider));
    }
    Arc::new(ctx)
}

/// Print published events for the terminal front-end.
fn spawn_event_printer(ctx: &Arc<CommandContext>) {
    let mut rx = ctx.interactor.subscribe();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                UiEvent::Text { agent, text } => println!("[{agent}] {text}"),
                UiEvent::Warn(m) => println!("warning: {m}"),
                UiEvent::Error(m) => println!("error: {m}"),
                UiEvent::Debug(m) => println!("debug: {m}"),
                UiEvent::Invite { prompt } => println!("? {prompt}"),
                UiEvent::TeamEvent { member, status, .. } => {
                    println!("team: {member} is {status}")
                }
                _ => {}
            }
        }
    });
}

async fn run_repl(
    ctx: Arc<CommandContext>,
    threads: YamlRepository<ThreadRecord>,
    prompts: YamlRepository<PromptChain>,
) -> anyhow::Result<()> {
    spawn_event_printer(&ctx);
    let mut current = ctx.create_thread("conversation");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        // Questions agents queued for the user surface between turns.
        while let Some(question) = ctx.next_command() {
            ctx.interactor.send_event(UiEvent::Invite { prompt: question });
        }

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        match handle_line(&ctx, &threads, &prompts, &mut current, &line).await {
            Ok(true) => break,
            Ok(false) => {}
            Err(e) => ctx.interactor.error(format!("{e:#}")),
        }
    }

    if let Some(team) = ctx.current_team() {
        let id = team.id.clone();
        if let Err(e) = ctx.cleanup_team(&id).await {
            warn!("team cleanup failed: {e}");
        }
    }
    Ok(())
}

/// Handle one input line.  Returns `Ok(true)` when the loop should exit.
async fn handle_line(
    ctx: &Arc<CommandContext>,
    threads: &YamlRepository<ThreadRecord>,
    prompts: &YamlRepository<PromptChain>,
    current: &mut ThreadHandle,
    line: &str,
) -> anyhow::Result<bool> {
    if line == "exit" || line == "quit" {
        return Ok(true);
    }

    if let Some(rest) = line.strip_prefix("save") {
        if rest.is_empty() || rest.starts_with(' ') {
            let new_name = rest.trim();
            let record = {
                let mut store = ctx.store.lock().unwrap();
                let thread = store.thread_mut(*current);
                if !new_name.is_empty() {
                    thread.name = new_name.to_string();
                }
                ThreadRecord::from_thread(thread)
            };
            threads.save(&record.id, &record)?;
            ctx.interactor
                .display_text("freja", &format!("thread saved as {}", record.id));
            return Ok(false);
        }
    }

    if let Some(rest) = line.strip_prefix("thread ") {
        return thread_command(ctx, threads, current, rest.trim()).await.map(|_| false);
    }

    if let Some(rest) = line.strip_prefix("debug ") {
        match rest.trim() {
            "true" => ctx.interactor.set_debug(true),
            "false" => ctx.interactor.set_debug(false),
            other => anyhow::bail!("debug expects true or false, got {other}"),
        }
        return Ok(false);
    }

    if let Some(rest) = line.strip_prefix('/') {
        let (name, args) = rest.split_once(' ').unwrap_or((rest, ""));
        let chain = prompts
            .get(name)?
            .ok_or_else(|| anyhow::anyhow!("no stored prompt named {name}"))?;
        let commands = interpolate::interpolate(&chain.commands, args)?;
        for command in commands {
            run_input(ctx, *current, &command).await;
        }
        return Ok(false);
    }

    run_input(ctx, *current, line).await;
    Ok(false)
}

async fn thread_command(
    ctx: &Arc<CommandContext>,
    threads: &YamlRepository<ThreadRecord>,
    current: &mut ThreadHandle,
    rest: &str,
) -> anyhow::Result<()> {
    if rest == "list" {
        for id in threads.list()? {
            if let Some(record) = threads.get(&id)? {
                println!("{id}  {}  ({})", record.name, record.modified);
            }
        }
        return Ok(());
    }
    if let Some(id) = rest.strip_prefix("select ") {
        let id = id.trim();
        let record = threads
            .get(id)?
            .ok_or_else(|| anyhow::anyhow!("no thread with id {id}"))?;
        let mut store = ctx.store.lock().unwrap();
        let handle = match store.find_by_id(id) {
            Some(handle) => handle,
            None => {
                let mut thread = record.into_thread();
                thread.usage.iteration_limit = ctx.config.limits.iteration_limit;
                thread.usage.price_limit = ctx.config.limits.price_limit;
                store.insert(thread)
            }
        };
        *current = handle;
        return Ok(());
    }
    if let Some(id) = rest.strip_prefix("delete ") {
        threads.delete(id.trim())?;
        return Ok(());
    }
    anyhow::bail!("unknown thread command: {rest}")
}

/// Route one input to an agent; `@name` addresses an agent directly,
/// anything else goes to the default agent.
async fn run_input(ctx: &Arc<CommandContext>, thread: ThreadHandle, line: &str) {
    let (agent_name, input) = match line.strip_prefix('@') {
        Some(rest) => match rest.split_once(' ') {
            Some((name, text)) => (Some(name), text),
            None => (Some(rest), ""),
        },
        None => (None, line),
    };
    let Some(agent) = ctx.agent(agent_name) else {
        ctx.interactor.error(format!(
            "unknown agent: {}",
            agent_name.unwrap_or("<default>")
        ));
        return;
    };
    if let Err(e) = agent.run(input, thread, ctx).await {
        warn!(agent = %agent.name, "run failed: {e:#}");
    }
}
