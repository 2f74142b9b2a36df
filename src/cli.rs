// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use smithers_config::AgentMode;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "smithers",
    about = "A terminal AI coding assistant built around a durable agent coordination core",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional initial prompt to submit as soon as the TUI starts.
    #[arg(value_name = "PROMPT")]
    pub prompt: Option<String>,

    /// Agent mode
    #[arg(long, short = 'm', value_enum, default_value = "agent")]
    pub mode: AgentMode,

    /// Model to use, e.g. "gpt-4o" or "anthropic/claude-opus-4-5"
    #[arg(long, short = 'M', env = "SMITHERS_MODEL")]
    pub model: Option<String>,

    /// Path to config file (overrides auto-discovery)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace). Only takes effect when
    /// SMITHERS_DEBUG_LEVEL / RUST_LOG is not already set.
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
    /// Print the effective configuration and exit.
    ShowConfig,
    /// List available models for the configured provider(s).
    ///
    /// By default the static built-in catalog is shown.
    /// With --refresh the configured provider API is queried for live data.
    ListModels {
        /// Filter by provider name (e.g. "openai", "anthropic").
        #[arg(long, short = 'p')]
        provider: Option<String>,
        /// Query the provider API for the live list of available models.
        #[arg(long)]
        refresh: bool,
        /// Output as JSON instead of a formatted table.
        #[arg(long)]
        json: bool,
    },
    /// List all supported model providers.
    ListProviders {
        /// Show detailed information for each provider.
        #[arg(long, short = 'v')]
        verbose: bool,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Submit a single prompt non-interactively and print the reply.
    ///
    /// Drives the same durable store / coordination worker the TUI uses, so
    /// the transcript this run appends is visible the next time the TUI (or
    /// another `run`) opens the same session.
    Run {
        /// The prompt to submit.
        prompt: String,
        /// Model to use, e.g. "gpt-4o" or "anthropic/claude-opus-4-5".
        #[arg(long, short = 'M', env = "SMITHERS_MODEL")]
        model: Option<String>,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "smithers", &mut std::io::stdout());
}
