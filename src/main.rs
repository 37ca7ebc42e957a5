//! Crucible CLI entry point.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crucible::cli::commands::job;
use crucible::cli::{Cli, Commands};
use crucible::infrastructure::config::load_config;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(err) = run(cli).await {
        crucible::cli::handle_error(err, json);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    init_logging(&config);

    let manager = job::build_manager(&config).await?;
    match cli.command {
        Commands::Submit(args) => job::handle_submit(&manager, args, cli.json).await,
        Commands::Status(args) => job::handle_status(&manager, args, cli.json).await,
        Commands::Cancel(args) => job::handle_cancel(&manager, args, cli.json).await,
        Commands::Purge(args) => job::handle_purge(&manager, args, cli.json).await,
        Commands::Jobs => job::handle_jobs(&manager, cli.json).await,
    }
}

fn init_logging(config: &crucible::Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
