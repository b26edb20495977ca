// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod mailbox;
mod tasklist;
mod team;

pub use mailbox::{MailMessage, Mailbox, SHUTDOWN};
pub use tasklist::{Task, TaskError, TaskList, TaskStatus};
pub use team::{Team, TeamError, TeammateSession, TeammateStatus, StatusCallback, Worker};
