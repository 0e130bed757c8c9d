// ABOUTME: Entry point for the skiff CLI application.
// ABOUTME: Initializes logging and hands control to the interactive dispatcher.

mod cli;

use clap::Parser;
use cli::Cli;
use skiff::input::StdinPrompt;
use skiff::menu::Dispatcher;
use skiff::session::{RusshTransport, SessionManager};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let session = SessionManager::new(RusshTransport);
    let mut dispatcher = Dispatcher::new(session, StdinPrompt);

    if let Err(e) = dispatcher.run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
