// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Freja, a multi-agent orchestration runtime.
///
/// Without a subcommand, starts the interactive loop.  Inside it:
///
///   @<agent> <text>      address a specific agent
///   /<prompt> [args]     run a stored prompt chain
///   save [new-name]      persist the current thread
///   thread list|select <id>|delete <id>
///   debug true|false     toggle debug events
///   exit                 leave
#[derive(Parser, Debug)]
#[command(name = "freja", version, about)]
pub struct Cli {
    /// Explicit config file (merged over the discovered layers).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Log to stderr (FREJA_LOG controls the filter).
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Project root override; tools may not reach outside it.
    #[arg(long)]
    pub project: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the merged configuration and exit.
    ShowConfig,
    /// List persisted threads and exit.
    Threads,
}
