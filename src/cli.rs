//! Command-line interface definition for Parley
//!
//! This module defines the CLI structure using clap's derive API. Every
//! command acts on behalf of one user, given with `--user` or the
//! `PARLEY_USER` environment variable.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parley - persistent multi-chat conversations with a language model
#[derive(Parser, Debug, Clone)]
#[command(name = "parley")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml", global = true)]
    pub config: String,

    /// Override the database location
    #[arg(long, global = true)]
    pub storage_path: Option<PathBuf>,

    /// Keep everything in memory for this run only
    #[arg(long, global = true, conflicts_with = "storage_path")]
    pub ephemeral: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Parley
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Manage chats
    Chats {
        #[command(subcommand)]
        command: ChatsCommand,
    },

    /// Append a message to a chat without asking the model
    Append {
        /// Acting user
        #[arg(short, long, env = "PARLEY_USER")]
        user: String,

        /// Chat identifier
        #[arg(long)]
        id: String,

        /// Message author (user, assistant)
        #[arg(short, long, default_value = "user")]
        role: String,

        /// Message text
        content: String,
    },

    /// Send a message and store the model's reply
    Send {
        /// Acting user
        #[arg(short, long, env = "PARLEY_USER")]
        user: String,

        /// Chat identifier
        #[arg(long)]
        id: String,

        /// Preferred model; falls back to the first configured model
        #[arg(short, long)]
        model: Option<String>,

        /// Sampling temperature, clamped to 0.1..=1.0
        #[arg(short, long)]
        temperature: Option<String>,

        /// Print the exchange as JSON
        #[arg(long)]
        json: bool,

        /// Message text
        content: String,
    },

    /// Show how session preferences resolve against the configured models
    Prefs {
        /// Preferred model
        #[arg(short, long)]
        model: Option<String>,

        /// Sampling temperature
        #[arg(short, long)]
        temperature: Option<String>,
    },
}

/// Chat management subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ChatsCommand {
    /// List the most recently touched chats
    List {
        /// Acting user
        #[arg(short, long, env = "PARLEY_USER")]
        user: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a new chat
    New {
        /// Acting user
        #[arg(short, long, env = "PARLEY_USER")]
        user: String,

        /// Chat title
        #[arg(short, long, default_value = "")]
        title: String,
    },

    /// Print the latest chat, creating one if none exists
    Ensure {
        /// Acting user
        #[arg(short, long, env = "PARLEY_USER")]
        user: String,
    },

    /// Show a chat and its messages
    Show {
        /// Acting user
        #[arg(short, long, env = "PARLEY_USER")]
        user: String,

        /// Chat identifier
        #[arg(long)]
        id: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
