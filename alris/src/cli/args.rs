//! CLI argument definitions.

use clap::{Parser, Subcommand};

/// Alris - chat with the Alris assistant from your terminal
#[derive(Parser, Debug)]
#[command(name = "alris")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Message to send as a one-shot command (interactive chat if omitted)
    #[arg(trailing_var_arg = true)]
    pub message: Vec<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start an interactive chat session (the default)
    Chat,

    /// Sign in with email and password, or with Google
    Signin {
        /// Sign in with Google via the browser
        #[arg(long)]
        google: bool,
    },

    /// Create an account
    Signup,

    /// Sign out and clear the stored session
    Signout,

    /// Show the remaining message quota
    Limits,
}
