use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ragchat::{render, ClientContext};
use ragchat_core::{telemetry, ClientSettings};
use std::io::Write;
use std::path::PathBuf;
use tokio::runtime::Runtime;

#[derive(Parser, Debug)]
#[command(name = "ragchat", version, about = "Terminal client for the Ragchat backend")]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// Chatbot backend base URL (overrides ragchat.yaml and RAGCHAT_API_BASE_URL).
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Identity service base URL.
    #[arg(long, global = true)]
    identity_url: Option<String>,
    /// Session storage file.
    #[arg(long, global = true)]
    storage: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Two-factor code, when the account requires one.
        #[arg(long)]
        code: Option<String>,
    },
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    Whoami,
    Conversations,
    New {
        title: String,
    },
    Delete {
        conversation_id: String,
    },
    Share {
        conversation_id: String,
        #[arg(long)]
        with: String,
    },
    Memory {
        conversation_id: String,
    },
    Chat {
        conversation_id: String,
        prompt: String,
    },
}

fn main() -> Result<()> {
    telemetry::init_tracing(telemetry::env_filter())?;

    let cli = Cli::parse();
    let settings = resolve_settings(&cli)?;
    let runtime = Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(run(cli.command, &settings))
}

fn resolve_settings(cli: &Cli) -> Result<ClientSettings> {
    let mut settings = ClientSettings::load().map_err(|err| anyhow::anyhow!(err.user_message()))?;
    if let Some(url) = &cli.api_url {
        settings = settings
            .with_api_base_url(url)
            .context("invalid --api-url")?;
    }
    if let Some(url) = &cli.identity_url {
        settings = settings
            .with_identity_base_url(url)
            .context("invalid --identity-url")?;
    }
    if let Some(path) = &cli.storage {
        settings.storage_path = Some(path.clone());
    }
    Ok(settings)
}

async fn run(command: Command, settings: &ClientSettings) -> Result<()> {
    let mut context = ClientContext::open(settings)?;
    match command {
        Command::Login {
            email,
            password,
            code,
        } => {
            context.login(&email, &password, code.as_deref()).await?;
            println!("{}", render::session_summary(&context.session().snapshot()));
        }
        Command::Register {
            name,
            email,
            password,
        } => {
            context.register(&name, &email, &password).await?;
            println!("{}", render::session_summary(&context.session().snapshot()));
        }
        Command::Logout => {
            context.logout();
            println!("signed out");
        }
        Command::Whoami => {
            println!("{}", render::session_summary(&context.session().snapshot()));
        }
        Command::Conversations => {
            let conversations = context.conversations().await?;
            if conversations.is_empty() {
                println!("no conversations yet");
            }
            for conversation in &conversations {
                println!("{}", render::conversation_line(conversation));
            }
        }
        Command::New { title } => {
            let conversation = context.create_conversation(&title).await?;
            println!("{}", render::conversation_line(&conversation));
        }
        Command::Delete { conversation_id } => {
            context.delete_conversation(&conversation_id).await?;
            println!("deleted {conversation_id}");
        }
        Command::Share {
            conversation_id,
            with,
        } => {
            context.share_conversation(&conversation_id, &with).await?;
            println!("shared {conversation_id} with {with}");
        }
        Command::Memory { conversation_id } => match context.memory(&conversation_id).await? {
            Some(memory) if !memory.messages.is_empty() => {
                println!("{}", render::transcript(&memory));
            }
            _ => println!("no history for {conversation_id}"),
        },
        Command::Chat {
            conversation_id,
            prompt,
        } => {
            if prompt.trim().is_empty() {
                bail!("prompt is empty");
            }
            let mut stdout = std::io::stdout();
            context
                .chat(&conversation_id, &prompt, |payload| {
                    let _ = write!(stdout, "{payload}");
                    let _ = stdout.flush();
                })
                .await?;
            println!();
        }
    }
    Ok(())
}
