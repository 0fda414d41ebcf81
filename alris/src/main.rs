//! Alris - chat with the Alris assistant from your terminal.
//!
//! Sign in through the hosted identity provider, then send commands to the
//! remote Alris API and watch replies type themselves out.
//!
//! Architecture:
//! - The chat state machine owns the transcript and sequences the quota
//!   store, the command gateway, and the typing reveal
//! - The CLI is a thin async driver around that machine
//! - All heavy lifting (command interpretation, browser automation, video
//!   retrieval) happens behind the remote API

mod auth;
mod chat;
mod cli;
mod config;
mod gateway;
mod limits;
mod models;
mod reveal;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{execute, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    // Diagnostics go to stderr so they never interleave with the transcript
    // on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    execute(cli).await
}
