// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "sven",
    about = "A CLI AI coding agent with sub-agent tool coordination",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to config file (overrides auto-discovery)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormatArg {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Drive the configured agent through one `sven_subagent::SubAgentTool`
    /// invocation and print its final text output.
    ///
    /// With `--session` set, resumes a previously suspended or saved
    /// conversation instead of starting a fresh one. With
    /// `--approve <CALL_ID>=<TEXT>` (repeatable), stages a result for a
    /// pending inner tool call before resuming — the counterpart to the
    /// `ToolUse` parts in a suspended response.
    Task {
        /// The message to send to the sub-agent.
        message: String,
        /// Resume an existing sub-agent session by id.
        #[arg(long)]
        session: Option<String>,
        /// Stage an approved result for a pending tool call, in
        /// `CALL_ID=TEXT` form. May be repeated.
        #[arg(long = "approve", value_name = "CALL_ID=TEXT")]
        approvals: Vec<String>,
        /// Output format for the final result.
        #[arg(long, value_enum, default_value = "text")]
        output_format: OutputFormatArg,
    },
    /// Generate shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
    /// Print the effective configuration and exit
    ShowConfig,
    /// List available models for the configured provider(s).
    ListModels {
        /// Filter by provider name (e.g. "openai", "anthropic", "groq")
        #[arg(long, short = 'p')]
        provider: Option<String>,
        /// Output as JSON instead of a formatted table
        #[arg(long)]
        json: bool,
    },
    /// List all supported model providers.
    ListProviders {
        /// Show detailed information for each provider
        #[arg(long, short = 'v')]
        verbose: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "sven", &mut std::io::stdout());
}
