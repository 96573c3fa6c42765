//! Chat Relay - Terminal Client
//!
//! Credential auth against the relay, then a live chat loop with a local
//! message cache so history is readable offline.

use anyhow::{bail, Context, Result};
use chat_relay::client::cache::MessageCache;
use chat_relay::client::chat::{ChatNotice, ChatSession};
use chat_relay::client::session::{AuthSession, UserInfo};
use clap::{Parser, Subcommand};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chat")]
#[command(about = "Terminal client for the chat relay")]
struct Cli {
    /// Relay server URL
    #[arg(long, env = "CHAT_RELAY_URL", default_value = "http://localhost:1337")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account and log in
    Register {
        username: String,
        email: String,
    },
    /// Log in with a username or email
    Login {
        identifier: String,
    },
    /// Forget the stored session
    Logout,
    /// Open the chat (requires a stored session)
    Chat,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut auth = AuthSession::new(&cli.server);

    match cli.command {
        Commands::Register { username, email } => {
            let password = prompt_password("Password: ")?;
            let session = auth.register(&username, &email, &password).await?;
            println!("Registered and logged in as {}", session.user.username);
            Ok(())
        }
        Commands::Login { identifier } => {
            let password = prompt_password("Password: ")?;
            let session = auth.login(&identifier, &password).await?;
            println!("Logged in as {}", session.user.username);
            Ok(())
        }
        Commands::Logout => {
            auth.logout()?;
            println!("Logged out");
            Ok(())
        }
        Commands::Chat => run_chat(&cli.server, auth).await,
    }
}

fn prompt_password(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let mut password = String::new();
    std::io::stdin().read_line(&mut password)?;
    let password = password.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("Password must not be empty");
    }
    Ok(password)
}

async fn run_chat(server: &str, mut auth: AuthSession) -> Result<()> {
    let Some(session) = auth.restore().await? else {
        bail!("Not logged in — run `chat login <identifier>` first");
    };
    let user = session.user.clone();
    let token = session.token.clone();

    let cache = MessageCache::new(default_cache_path());
    let mut chat = ChatSession::connect(server, &token, user.clone(), cache)
        .await
        .context("Could not open the chat session")?;

    // Cached history first, so the screen is useful even before traffic
    for message in chat.messages() {
        print_message(&user, message.sender, &message.content, message.pending);
    }
    println!("-- connected as {} — type a message, or /quit --", user.username);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        let line = line.trim();
                        if line == "/quit" {
                            break;
                        }
                        if line.is_empty() {
                            continue;
                        }
                        if let Err(e) = chat.submit(line) {
                            eprintln!("! {}", e);
                        }
                    }
                    None => break, // stdin closed
                }
            }

            notice = chat.next_notice() => {
                match notice {
                    Some(ChatNotice::Confirmed(message)) => {
                        print_message(&user, message.sender, &message.content, false);
                    }
                    Some(ChatNotice::RelayError(error)) => {
                        eprintln!("! relay: {}", error);
                    }
                    Some(ChatNotice::CacheFailure(error)) => {
                        eprintln!("! cache: {}", error);
                    }
                    Some(ChatNotice::Disconnected) | None => {
                        eprintln!("! disconnected from relay");
                        break;
                    }
                }
            }
        }
    }

    chat.close().await;
    Ok(())
}

fn print_message(user: &UserInfo, sender: i64, content: &str, pending: bool) {
    let who = if sender == user.id {
        user.username.as_str()
    } else {
        "peer"
    };
    let marker = if pending { " (sending)" } else { "" };
    println!("[{}{}] {}", who, marker, content);
}

fn default_cache_path() -> std::path::PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("chat-relay")
        .join("cache.db")
}
