//! Chat Client - terminal front end
//!
//! `chat login`, then `chat chat` for a live session. Everything typed in
//! the live session is sent over the socket; `/rest <text>` uses the REST
//! endpoint instead, `/dismiss` clears the error banner, `/logout` ends the
//! session and `/quit` leaves.

use anyhow::{bail, Context, Result};
use chat_client::stores::DisplayMessage;
use chat_client::views::format_timestamp;
use chat_client::{
    AuthSession, ClientConfig, GateOutcome, Route, SessionGate, Storage, Transport,
    TransportConfig, ViewUpdate,
};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "chat", about = "Terminal chat client")]
struct Cli {
    /// REST base URL, including the /api prefix
    #[arg(long, env = "CHAT_API_URL")]
    api_url: Option<String>,

    /// Socket URL
    #[arg(long, env = "CHAT_WS_URL")]
    ws_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create an account and sign in
    Register {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Sign in
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Forget the stored session
    Logout,
    /// Print the message history
    History,
    /// Send one message through the REST endpoint
    Send { content: String },
    /// Open a live chat session
    Chat,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_client=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::from_env();
    if let Some(api_url) = cli.api_url {
        config = config.with_api_url(api_url);
    }
    if let Some(ws_url) = cli.ws_url {
        config = config.with_ws_url(ws_url);
    }

    let storage = match &config.storage_dir {
        Some(dir) => Storage::in_dir(dir),
        None => Storage::platform_default().context("locating storage directory")?,
    };
    let session = AuthSession::restore(&config, storage);

    match cli.command {
        Command::Register {
            username,
            email,
            password,
        } => {
            guard(&session, Route::Register)?;
            let resp = session
                .register(&username, &email, &password)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            match resp.user {
                Some(user) => println!("Registered and signed in as {}", user.username),
                None => println!("Registered and signed in"),
            }
        }
        Command::Login { email, password } => {
            guard(&session, Route::Login)?;
            let resp = session
                .login(&email, &password)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            match resp.user {
                Some(user) => println!("Signed in as {}", user.username),
                None => println!("Signed in"),
            }
        }
        Command::Logout => {
            session.logout();
            println!("Signed out");
        }
        Command::History => {
            guard(&session, Route::Chat)?;
            let messages = session
                .client()
                .get_messages()
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            if messages.is_empty() {
                println!("No messages yet. Start the conversation!");
            }
            for message in messages {
                print_entry(&DisplayMessage {
                    message,
                    delivery: chat_client::stores::DeliveryState::Confirmed,
                });
            }
        }
        Command::Send { content } => {
            guard(&session, Route::Chat)?;
            let message = session
                .client()
                .send_message(content.trim())
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("Sent (#{})", message.id);
        }
        Command::Chat => {
            let transport = Transport::new(TransportConfig::from(&config));
            let gate = SessionGate::new(session, transport);
            run_chat(&gate).await?;
        }
    }

    Ok(())
}

fn guard(session: &AuthSession, requested: Route) -> Result<()> {
    let landed = requested.resolve(session.is_authenticated());
    if landed == requested {
        return Ok(());
    }
    match landed {
        Route::Login => bail!("Not signed in. Run `chat login` first."),
        _ => bail!("Already signed in. Run `chat logout` first."),
    }
}

async fn run_chat(gate: &SessionGate) -> Result<()> {
    let mut view = match gate.enter().await {
        GateOutcome::Redirect(_) => bail!("Not signed in. Run `chat login` first."),
        GateOutcome::Entered(view) => view,
    };

    println!("-- Chat ({}) --", view.status_text());
    if view.entries().is_empty() {
        println!("No messages yet. Start the conversation!");
    }
    for entry in view.entries() {
        print_entry(entry);
    }
    if let Some(error) = view.error() {
        println!("!! {error}");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            update = view.next_update() => match update {
                Some(ViewUpdate::Authenticated(user)) => {
                    println!("-- {} as {} --", view.status_text(), user.username);
                }
                Some(ViewUpdate::MessageAppended(_)) => {
                    if let Some(entry) = view.entries().last() {
                        print_entry(entry);
                    }
                }
                Some(ViewUpdate::Error(reason)) => println!("!! {reason}"),
                Some(ViewUpdate::DuplicateIgnored(_)) | Some(ViewUpdate::Ignored) => {}
                None => {
                    println!("-- {} --", view.status_text());
                    break;
                }
            },
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                let line = line.trim();
                match line {
                    "" => {}
                    "/quit" => break,
                    "/logout" => {
                        view.logout();
                        println!("Signed out");
                        return Ok(());
                    }
                    "/dismiss" => view.dismiss_error(),
                    _ => {
                        if let Some(content) = line.strip_prefix("/rest ") {
                            if let Err(e) = view.send_via_rest(content).await {
                                println!("!! {}", e.user_message());
                                if e.is_unauthorized() {
                                    break;
                                }
                            } else if let Some(entry) = view.entries().last() {
                                print_entry(entry);
                            }
                        } else {
                            match view.send(line) {
                                Ok(_) => {
                                    if let Some(entry) = view.entries().last() {
                                        print_entry(entry);
                                    }
                                }
                                Err(e) => println!("!! {e}"),
                            }
                        }
                    }
                }
            }
        }
    }

    view.teardown();
    Ok(())
}

fn print_entry(entry: &DisplayMessage) {
    let marker = if entry.is_pending() { " (sending)" } else { "" };
    println!(
        "[{}] {}: {}{}",
        format_timestamp(entry),
        entry.message.author.username,
        entry.message.content,
        marker
    );
}
