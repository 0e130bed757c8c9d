// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: All connection parameters are gathered interactively, not via flags.

use clap::Parser;

#[derive(Parser)]
#[command(name = "skiff")]
#[command(about = "Interactive menu-driven SFTP client")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}
