// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

/// Non-historical events flowing between the core and a front-end.
/// These never enter the persisted conversation log.
#[derive(Debug, Clone)]
pub enum UiEvent {
    /// Assistant text ready for display.
    Text { agent: String, text: String },
    /// A run limit was breached or something recoverable went wrong.
    Warn(String),
    /// The current operation failed; control returns to the user.
    Error(String),
    /// Diagnostic output, only emitted when debug is enabled.
    Debug(String),
    /// The named agent started reasoning over a turn.
    Thinking { agent: String },
    /// The core asks the user for free-form input between turns.
    Invite { prompt: String },
    /// The core asks the user to pick one of several options.
    Choice {
        id: String,
        question: String,
        options: Vec<String>,
    },
    /// The user's reply to an `Invite` or `Choice`.
    Answer { id: String, text: String },
    /// A thread was created, renamed, or modified.
    ThreadUpdate { thread_id: String, name: String },
    /// A teammate changed state.
    TeamEvent {
        team_id: String,
        member: String,
        kind: TeamEventKind,
        status: String,
    },
    /// An integration needs the user to complete an OAuth flow.
    OAuthRequest { url: String, state: String },
    /// The OAuth redirect came back.
    OAuthCallback { state: String, code: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamEventKind {
    TeammateSpawned,
    StatusChanged,
    TeamCleaned,
}
