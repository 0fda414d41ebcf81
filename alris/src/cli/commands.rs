//! CLI command execution.
//!
//! The CLI is a thin driver around the chat state machine: it reads input,
//! awaits the gateway, and prints reveal output. All lifecycle decisions
//! (double-submit guard, quota, error surfacing) live in [`ChatSession`].

use std::io::Write as _;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::auth::{AuthClient, AuthState, SessionStore, User};
use crate::chat::{ChatSession, Resolution, Submission};
use crate::config::Config;
use crate::gateway::CommandGateway;
use crate::limits::{FileStorage, LimitStorage, LimitStore, MESSAGE_QUOTA};
use crate::reveal::{reveal, RevealEvent, DEFAULT_CHAR_DELAY};

use super::args::{Cli, Commands};

/// Execute the parsed command line.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = Config::from_env();

    match cli.command {
        Some(Commands::Chat) => run_chat(&config, None).await,
        Some(Commands::Signin { google }) => sign_in(&config, google).await,
        Some(Commands::Signup) => sign_up(&config).await,
        Some(Commands::Signout) => sign_out(&config).await,
        Some(Commands::Limits) => show_limits(),
        None => {
            let message = cli.message.join(" ");
            if message.trim().is_empty() {
                run_chat(&config, None).await
            } else {
                run_chat(&config, Some(message)).await
            }
        }
    }
}

/// Resolve the signed-in user, refreshing the stored session if needed.
///
/// When no identity provider is configured the chat runs without a
/// greeting (useful against a local development gateway).
async fn resolve_user(config: &Config) -> Result<Option<User>> {
    if config.auth_url.is_none() {
        tracing::debug!("identity provider not configured; skipping sign-in");
        return Ok(None);
    }

    let auth = AuthClient::new(config, SessionStore::open()?)?;
    match auth.current_session().await? {
        Some(session) if session.user.email_confirmed() => Ok(Some(session.user)),
        Some(_) => bail!(
            "Your email address is not verified yet. Check your inbox for the confirmation link."
        ),
        None => bail!("You are not signed in. Run `alris signin` first."),
    }
}

async fn run_chat(config: &Config, one_shot: Option<String>) -> Result<()> {
    let user = resolve_user(config).await?;

    let store = LimitStore::initialize(FileStorage::open()?, Utc::now())
        .context("Failed to load the message quota")?;
    let mut chat = ChatSession::new(store);
    let gateway = CommandGateway::new(config.api_url.clone());

    if let Some(message) = one_shot {
        return run_cycle(&mut chat, &gateway, &message).await;
    }

    match &user {
        Some(user) => println!("Hello {}", user.display_name()),
        None => println!("Hello"),
    }
    println!("What can I do for you today?");
    println!("Ask Alris to 'Schedule a reminder' or 'Search for a video'.");
    println!("Type /limits to see your quota, /quit to leave.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break; // stdin closed
        };

        match line.trim() {
            "/quit" | "/exit" => break,
            "/limits" => {
                let remaining = chat.remaining();
                println!(
                    "{remaining} message{} remaining in this window.",
                    if remaining == 1 { "" } else { "s" }
                );
                continue;
            }
            _ => {}
        }

        run_cycle(&mut chat, &gateway, &line).await?;
    }

    println!("Goodbye.");
    Ok(())
}

/// Run one submit/resolve/reveal cycle for a line of input.
async fn run_cycle<S: LimitStorage>(
    chat: &mut ChatSession<S>,
    gateway: &CommandGateway,
    input: &str,
) -> Result<()> {
    match chat.submit(input, Utc::now()) {
        Submission::RejectedEmpty => Ok(()),
        // The serial loop never submits while a cycle is in flight.
        Submission::RejectedBusy => Ok(()),
        Submission::Blocked { banner } => {
            print_banner(&banner);
            Ok(())
        }
        Submission::Accepted { command, is_video } => {
            if is_video {
                println!("Fetching a video...");
            } else {
                println!("Processing...");
            }

            let result = gateway.send(&command).await;
            match chat.resolve(result, Utc::now()) {
                Resolution::Failed { banner } => print_banner(&banner),
                Resolution::Reveal {
                    message,
                    content,
                    media_links,
                } => {
                    let mut handle = reveal(message, &content, DEFAULT_CHAR_DELAY);
                    let mut printed = 0usize;

                    while let Some(event) = handle.next_event().await {
                        match event {
                            RevealEvent::Prefix(prefix) => {
                                // Print only the newly revealed tail; the
                                // terminal keeps the viewport pinned to it.
                                print!("{}", &prefix[printed..]);
                                std::io::stdout().flush()?;
                                printed = prefix.len();
                            }
                            RevealEvent::Completed => chat.reveal_complete(handle.target()),
                        }
                    }
                    println!();

                    if !media_links.is_empty() {
                        for url in &media_links {
                            println!("  video: {url}");
                        }
                        println!();
                    }
                }
            }
            Ok(())
        }
    }
}

async fn sign_in(config: &Config, google: bool) -> Result<()> {
    let auth = AuthClient::new(config, SessionStore::open()?)?;
    let mut states = auth.subscribe();

    let result = if google {
        println!("Complete the sign-in in your browser...");
        auth.sign_in_with_google().await
    } else {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let email = prompt(&mut lines, "Email: ").await?;
        let password = prompt(&mut lines, "Password: ").await?;
        auth.sign_in(email.trim(), password.trim()).await
    };

    match result {
        Ok(_) => report_auth_state(&mut states).await,
        Err(e) => print_banner(&e.to_string()),
    }
    Ok(())
}

async fn sign_up(config: &Config) -> Result<()> {
    let auth = AuthClient::new(config, SessionStore::open()?)?;
    let mut states = auth.subscribe();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let name = prompt(&mut lines, "Name: ").await?;
    let email = prompt(&mut lines, "Email: ").await?;
    let password = prompt(&mut lines, "Password: ").await?;

    match auth
        .sign_up(email.trim(), password.trim(), name.trim())
        .await
    {
        Ok(_) => {
            println!("Account created.");
            report_auth_state(&mut states).await;
        }
        Err(e) => print_banner(&e.to_string()),
    }
    Ok(())
}

async fn sign_out(config: &Config) -> Result<()> {
    let auth = AuthClient::new(config, SessionStore::open()?)?;
    let mut states = auth.subscribe();

    match auth.sign_out().await {
        Ok(()) => report_auth_state(&mut states).await,
        Err(e) => print_banner(&e.to_string()),
    }
    Ok(())
}

/// React to the auth-state notification stream: the chat hint on
/// signed-in, the verification notice on a pending address, the sign-in
/// hint otherwise.
async fn report_auth_state(states: &mut tokio::sync::watch::Receiver<AuthState>) {
    if states.changed().await.is_err() {
        return;
    }
    match &*states.borrow() {
        AuthState::SignedIn(user) => {
            println!("Signed in as {}. Run `alris` to start chatting.", user.display_name());
        }
        AuthState::PendingVerification(_) => {
            println!("Verify your email address before chatting; check your inbox.");
        }
        AuthState::SignedOut => {
            println!("Signed out. Run `alris signin` to sign back in.");
        }
    }
}

fn show_limits() -> Result<()> {
    let store = LimitStore::initialize(FileStorage::open()?, Utc::now())
        .context("Failed to load the message quota")?;

    println!(
        "{} of {MESSAGE_QUOTA} messages remaining.",
        store.remaining()
    );
    println!(
        "Window resets at {}.",
        store.resets_at().format("%Y-%m-%d %H:%M:%S UTC")
    );
    Ok(())
}

/// Prompt for one line of input.
async fn prompt(lines: &mut Lines<BufReader<Stdin>>, label: &str) -> Result<String> {
    print!("{label}");
    std::io::stdout().flush()?;
    Ok(lines.next_line().await?.unwrap_or_default())
}

fn print_banner(banner: &str) {
    eprintln!("! {banner}");
}
