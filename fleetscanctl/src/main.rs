//! `fleetscanctl`: start, follow, cancel and report on fleet scan runs.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod commands;
mod context;

use cli::{Cli, Command};
use context::AppContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr so `--json` output stays parseable.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,scan::channel=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let ctx = AppContext::build(&cli).await?;
    let json = cli.json;

    match cli.command {
        Command::Scan(args) => commands::scan(&ctx, args, json).await,
        Command::Status { run_id } => commands::status(&ctx, run_id, json).await,
        Command::List(args) => commands::list(&ctx, args, json).await,
        Command::Cancel { run_id } => commands::cancel(&ctx, run_id, json).await,
        Command::Report { kind } => commands::report(&ctx, kind).await,
        Command::Probe(args) => commands::probe(&ctx, args, json).await,
        Command::Reconcile => commands::reconcile(&ctx, json).await,
    }
}
