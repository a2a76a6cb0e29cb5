mod commands;
mod handlers;
mod logging;

use clap::Parser;
use commands::{Cli, Commands};

#[tokio::main]
async fn main() {
    logging::init();

    let cli = Cli::parse();
    let data_dir = cli.data_dir;

    let result = match cli.command {
        Commands::Plugin(cmd) => handlers::handle_plugin(cmd, data_dir).await,
        Commands::Sync(cmd) => handlers::handle_sync(cmd, data_dir).await,
        Commands::Inbox(cmd) => handlers::handle_inbox(cmd, data_dir).await,
        Commands::Secret(cmd) => handlers::handle_secret(cmd, data_dir).await,
        Commands::Ai(cmd) => handlers::handle_ai(cmd, data_dir).await,
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
