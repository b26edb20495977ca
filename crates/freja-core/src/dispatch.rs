// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_recursion::async_recursion;
use serde_json::json;
use tracing::debug;

use freja_model::ToolSchema;
use freja_team::{StatusCallback, TeammateSession, TeammateStatus, Worker};
use freja_thread::{Role, ThreadEvent, ThreadHandle};
use freja_tools::{ToolCall, ToolContext, ToolOutput};

use crate::{Agent, CommandContext, TeamEventKind, UiEvent};

/// Schemas of the tools the dispatcher itself handles: delegation, user
/// queries, and team coordination.  Merged with the toolbox catalog on
/// every completion request.
pub fn special_tool_schemas() -> Vec<ToolSchema> {
    let agent_query = json!({
        "type": "object",
        "properties": {
            "agent": { "type": "string", "description": "name of the agent" },
            "query": { "type": "string", "description": "the request handed to the agent" }
        },
        "required": ["agent", "query"]
    });
    vec![
        ToolSchema {
            name: "delegate".into(),
            description: "Hand a sub-task to another agent on a forked thread and return its answer"
                .into(),
            parameters: agent_query.clone(),
        },
        ToolSchema {
            name: "redirect".into(),
            description: "Hand the conversation to another agent on this same thread".into(),
            parameters: agent_query,
        },
        ToolSchema {
            name: "query_user".into(),
            description: "Ask the user a question between turns (does not block this turn)".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string", "description": "the question to ask" }
                },
                "required": ["message"]
            }),
        },
        ToolSchema {
            name: "spawn_teammate".into(),
            description: "Start a long-lived teammate working concurrently on its own thread"
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "agent": { "type": "string", "description": "agent to run as the teammate" },
                    "task": { "type": "string", "description": "the teammate's first task" }
                },
                "required": ["agent", "task"]
            }),
        },
        ToolSchema {
            name: "send_message".into(),
            description: "Send a message to a teammate's mailbox".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "to": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["to", "content"]
            }),
        },
        ToolSchema {
            name: "broadcast".into(),
            description: "Send a message to every other team member".into(),
            parameters: json!({
                "type": "object",
                "properties": { "content": { "type": "string" } },
                "required": ["content"]
            }),
        },
        ToolSchema {
            name: "check_mailbox".into(),
            description: "Read and clear your own mailbox".into(),
            parameters: json!({ "type": "object", "properties": {} }),
        },
        ToolSchema {
            name: "create_task".into(),
            description: "Add a task to the shared task list".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "description": { "type": "string" },
                    "dependencies": {
                        "type": "array",
                        "items": { "type": "integer" },
                        "description": "ids of tasks that must complete first"
                    },
                    "assignee": { "type": "string" }
                },
                "required": ["description"]
            }),
        },
        ToolSchema {
            name: "claim_task".into(),
            description: "Claim an available task from the shared task list".into(),
            parameters: json!({
                "type": "object",
                "properties": { "id": { "type": "integer" } },
                "required": ["id"]
            }),
        },
        ToolSchema {
            name: "complete_task".into(),
            description: "Mark a task you claimed as completed".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "integer" },
                    "result": { "type": "string" }
                },
                "required": ["id"]
            }),
        },
        ToolSchema {
            name: "list_tasks".into(),
            description: "List every task on the shared task list".into(),
            parameters: json!({ "type": "object", "properties": {} }),
        },
    ]
}

/// Route one tool call: the dispatcher's own tools first, everything else
/// through the toolbox.  Failures are captured into the output string;
/// tool errors never propagate out of the run loop.
pub(crate) async fn dispatch(
    agent: &Agent,
    call: &ToolCall,
    thread: ThreadHandle,
    ctx: &Arc<CommandContext>,
    tool_ctx: &ToolContext,
) -> ToolOutput {
    let result = match call.name.as_str() {
        "delegate" => delegate(agent, call, thread, ctx, false).await,
        "redirect" => delegate(agent, call, thread, ctx, true).await,
        "query_user" => query_user(call, ctx),
        "spawn_teammate" => spawn_teammate(agent, call, thread, ctx).await,
        "send_message" => send_message(agent, call, ctx),
        "broadcast" => broadcast(agent, call, ctx),
        "check_mailbox" => check_mailbox(agent, ctx),
        "create_task" => create_task(agent, call, ctx),
        "claim_task" => claim_task(agent, call, ctx),
        "complete_task" => complete_task(agent, call, ctx),
        "list_tasks" => list_tasks(agent, ctx),
        _ => return ctx.toolbox.execute(call, tool_ctx).await,
    };
    match result {
        Ok(output) => ToolOutput::ok(&call.id, output),
        Err(e) => {
            debug!(tool = %call.name, "special tool failed: {e:#}");
            ToolOutput::err(&call.id, e.to_string())
        }
    }
}

/// `delegate`: fork the thread under the target agent, run it on the fork,
/// answer with its last assistant message, then merge the fork's price
/// back.  `redirect` runs the target on the *unforked* thread instead, so
/// events and price accumulate on the parent.
#[async_recursion]
async fn delegate(
    caller: &Agent,
    call: &ToolCall,
    thread: ThreadHandle,
    ctx: &Arc<CommandContext>,
    on_parent: bool,
) -> anyhow::Result<String> {
    let target_name = call.str_arg("agent")?;
    let query = call.str_arg("query")?;
    let target = ctx
        .agent(Some(&target_name))
        .ok_or_else(|| anyhow::anyhow!("unknown agent: {target_name}"))?;
    if target.name == caller.name {
        anyhow::bail!("an agent cannot delegate to itself");
    }

    if on_parent {
        target.run(&query, thread, ctx).await?;
        return Ok(last_assistant_text(ctx, thread)
            .unwrap_or_else(|| "[no response]".to_string()));
    }

    let child = ctx.store.lock().unwrap().fork(thread, &target_name)?;
    let run_result = target.run(&query, child, ctx).await;
    let answer = last_assistant_text(ctx, child);
    ctx.store.lock().unwrap().merge(thread, child);
    run_result?;
    Ok(answer.unwrap_or_else(|| "[no response]".to_string()))
}

fn query_user(call: &ToolCall, ctx: &Arc<CommandContext>) -> anyhow::Result<String> {
    let message = call.str_arg("message")?;
    ctx.queue_command(message);
    Ok("the user will be asked between turns".to_string())
}

/// Spawn a teammate on a fork of the caller's thread: refuse duplicates,
/// fork, start the run loop, announce pre-assigned tasks, emit the spawn
/// event, then do a non-final merge of the fork's price.
#[async_recursion]
async fn spawn_teammate(
    caller: &Agent,
    call: &ToolCall,
    thread: ThreadHandle,
    ctx: &Arc<CommandContext>,
) -> anyhow::Result<String> {
    let teammate_name = call.str_arg("agent")?;
    let task = call.str_arg("task")?;

    let team = ctx.ensure_team(&caller.name);
    if team.contains(&teammate_name) {
        anyhow::bail!("teammate already exists: {teammate_name}");
    }
    let target = ctx
        .agent(Some(&teammate_name))
        .ok_or_else(|| anyhow::anyhow!("unknown agent: {teammate_name}"))?;

    let child = ctx.store.lock().unwrap().fork(thread, &teammate_name)?;

    let worker: Worker = {
        let target = target.clone();
        let ctx = Arc::clone(ctx);
        Box::new(move |input: String| {
            let target = target.clone();
            let ctx = Arc::clone(&ctx);
            Box::pin(async move { target.run(&input, child, &ctx).await })
        })
    };
    let on_status: StatusCallback = {
        let interactor = Arc::clone(&ctx.interactor);
        let team_id = team.id.clone();
        Arc::new(move |name: &str, status: TeammateStatus| {
            interactor.send_event(UiEvent::TeamEvent {
                team_id: team_id.clone(),
                member: name.to_string(),
                kind: TeamEventKind::StatusChanged,
                status: status_label(status).to_string(),
            });
        })
    };

    let session = TeammateSession::spawn(
        &teammate_name,
        task,
        Arc::clone(&team.mailbox),
        worker,
        on_status,
    );
    team.register(session)?;

    let assigned = team.task_list.for_agent(&teammate_name);
    if !assigned.is_empty() {
        let listing = assigned
            .iter()
            .map(|t| format!("#{} {}", t.id, t.description))
            .collect::<Vec<_>>()
            .join("; ");
        team.mailbox.send(
            &team.lead_agent_name,
            &teammate_name,
            format!("You have pre-assigned tasks: {listing}"),
        );
    }

    ctx.interactor.send_event(UiEvent::TeamEvent {
        team_id: team.id.clone(),
        member: teammate_name.clone(),
        kind: TeamEventKind::TeammateSpawned,
        status: "working".to_string(),
    });

    // Non-final merge: the teammate keeps running; later merges happen when
    // the fork is re-entered or the team is cleaned up.
    ctx.store.lock().unwrap().merge(thread, child);

    Ok(format!("teammate {teammate_name} spawned on its own thread"))
}

fn send_message(caller: &Agent, call: &ToolCall, ctx: &Arc<CommandContext>) -> anyhow::Result<String> {
    let to = call.str_arg("to")?;
    let content = call.str_arg("content")?;
    let team = ctx
        .current_team()
        .ok_or_else(|| anyhow::anyhow!("no active team; spawn a teammate first"))?;
    let message = team.mailbox.send(&caller.name, &to, content);
    Ok(format!("message {} delivered to {to}", message.id))
}

fn broadcast(caller: &Agent, call: &ToolCall, ctx: &Arc<CommandContext>) -> anyhow::Result<String> {
    let content = call.str_arg("content")?;
    let team = ctx
        .current_team()
        .ok_or_else(|| anyhow::anyhow!("no active team; spawn a teammate first"))?;
    let roster = team.roster();
    team.mailbox.broadcast(&caller.name, &content, &roster);
    Ok(format!("broadcast to {} team members", roster.len().saturating_sub(1)))
}

fn check_mailbox(caller: &Agent, ctx: &Arc<CommandContext>) -> anyhow::Result<String> {
    let team = ctx
        .current_team()
        .ok_or_else(|| anyhow::anyhow!("no active team; spawn a teammate first"))?;
    let messages = team.mailbox.receive(&caller.name);
    if messages.is_empty() {
        return Ok("no new messages".to_string());
    }
    Ok(messages
        .iter()
        .map(|m| m.formatted())
        .collect::<Vec<_>>()
        .join("\n"))
}

fn create_task(caller: &Agent, call: &ToolCall, ctx: &Arc<CommandContext>) -> anyhow::Result<String> {
    let args = call.parsed_args()?;
    let description = args
        .get("description")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("missing required parameter: description"))?;
    let dependencies: Vec<u64> = args
        .get("dependencies")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_u64()).collect())
        .unwrap_or_default();
    let assignee = args
        .get("assignee")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let team = ctx.ensure_team(&caller.name);
    let task = team.task_list.create_task(description, dependencies, assignee)?;
    Ok(format!("created task #{}", task.id))
}

fn claim_task(caller: &Agent, call: &ToolCall, ctx: &Arc<CommandContext>) -> anyhow::Result<String> {
    let id = task_id_arg(call)?;
    let team = ctx.ensure_team(&caller.name);
    if team.task_list.claim(id, &caller.name) {
        Ok(format!("claimed task #{id}"))
    } else {
        anyhow::bail!(
            "cannot claim task #{id}: it does not exist, is not pending, has incomplete \
             dependencies, or is assigned to someone else"
        )
    }
}

fn complete_task(caller: &Agent, call: &ToolCall, ctx: &Arc<CommandContext>) -> anyhow::Result<String> {
    let id = task_id_arg(call)?;
    let result = call
        .parsed_args()?
        .get("result")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let team = ctx.ensure_team(&caller.name);
    if team.task_list.complete(id, &caller.name, result) {
        Ok(format!("completed task #{id}"))
    } else {
        anyhow::bail!("cannot complete task #{id}: not in progress or claimed by someone else")
    }
}

fn list_tasks(caller: &Agent, ctx: &Arc<CommandContext>) -> anyhow::Result<String> {
    let team = ctx.ensure_team(&caller.name);
    let tasks = team.task_list.list();
    if tasks.is_empty() {
        return Ok("the task list is empty".to_string());
    }
    Ok(tasks
        .iter()
        .map(|t| {
            let status = match t.status {
                freja_team::TaskStatus::Pending => "pending",
                freja_team::TaskStatus::InProgress => "in_progress",
                freja_team::TaskStatus::Completed => "completed",
            };
            let mut line = format!("#{} [{status}] {}", t.id, t.description);
            if !t.dependencies.is_empty() {
                let deps = t
                    .dependencies
                    .iter()
                    .map(|d| format!("#{d}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                line.push_str(&format!(" (depends on {deps})"));
            }
            if let Some(assignee) = &t.assignee {
                line.push_str(&format!(" (assignee: {assignee})"));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

fn task_id_arg(call: &ToolCall) -> anyhow::Result<u64> {
    call.parsed_args()?
        .get("id")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| anyhow::anyhow!("missing required parameter: id"))
}

fn status_label(status: TeammateStatus) -> &'static str {
    match status {
        TeammateStatus::Idle => "idle",
        TeammateStatus::Working => "working",
        TeammateStatus::Stopped => "stopped",
    }
}

/// Text of the most recent assistant message on `thread`.
fn last_assistant_text(ctx: &Arc<CommandContext>, thread: ThreadHandle) -> Option<String> {
    let store = ctx.store.lock().unwrap();
    store.thread(thread).events().iter().rev().find_map(|ev| match ev {
        ThreadEvent::Message {
            role: Role::Assistant,
            parts,
            ..
        } => Some(
            parts
                .iter()
                .filter_map(|p| match p {
                    freja_thread::ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        _ => None,
    })
}
