mod cli;
mod commands;
mod config;

use clap::Parser;
use cli::Cli;
use config::Config;

fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so stdout stays valid JSON
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "missive=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?.with_db_override(cli.db);

    let db = missive_db::Database::open(&config.db_path)?;

    let output = commands::run(&db, &config, cli.actor, cli.command)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
