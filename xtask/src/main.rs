use anyhow::{ensure, Result};
use clap::{Parser, Subcommand};
use futures::stream;
use ragchat_core::storage::TOKEN_KEY;
use ragchat_core::{
    telemetry, ChatStream, DurableStorage, FileStorage, GuardDecision, Route, RouteGuard,
    SessionStore,
};
use std::convert::Infallible;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "xtask", version, about = "Automation helpers for Ragchat")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run an offline smoke test of stream decoding and route guarding.
    Smoke,
}

fn main() -> Result<()> {
    telemetry::init_tracing(EnvFilter::new("info"))?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Smoke => smoke_test(),
    }
}

fn smoke_test() -> Result<()> {
    let runtime = Runtime::new()?;
    let chunks: Vec<Result<&'static [u8], Infallible>> = vec![
        Ok(b"data: Hello".as_slice()),
        Ok(b", wor".as_slice()),
        Ok(b"ld\n: ping\ndata: !\n".as_slice()),
        Ok(b"data: [DONE]\n".as_slice()),
    ];
    let text = runtime
        .block_on(ChatStream::from_body(stream::iter(chunks)).collect_text())
        .map_err(anyhow::Error::msg)?;
    ensure!(text == "Hello, world!", "unexpected decoded text: {text:?}");
    info!(%text, "stream decoding ok");

    let temp_dir = TempDir::new()?;
    let storage = Arc::new(FileStorage::open(temp_dir.path().join("storage.json"))?);
    let session = SessionStore::new(storage.clone());
    let guard = RouteGuard::new(session.clone());
    ensure!(
        guard.check(&Route::Conversations) == GuardDecision::Redirect(Route::Login),
        "signed-out navigation was not redirected"
    );
    storage.set(TOKEN_KEY, "smoke-token");
    ensure!(
        guard.check(&Route::Conversations).proceeds() && session.is_authenticated(),
        "durable token was not adopted"
    );
    info!(path = %storage.path().display(), "route guard ok");

    Ok(())
}
