//! Lydbot CLI entry point.

use anyhow::Result;
use clap::Parser;
use lydbot::cli::{commands, Cli, Commands};
use lydbot::config::Settings;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    // Load configuration
    let settings = Settings::load_from(cli.config.as_ref())?;

    // Initialize logging
    let log_level = match cli.verbose {
        0 => settings.general.log_level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("lydbot={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Ctrl+C cancels in-flight requests and stops intake
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down");
                cancel.cancel();
            }
        });
    }

    // Execute command
    match &cli.command {
        Commands::Run => {
            ensure_dirs(&settings)?;
            commands::run_bot(settings, cancel).await?;
        }

        Commands::Serve { host, port } => {
            ensure_dirs(&settings)?;
            commands::run_serve(host, *port, settings, cancel).await?;
        }

        Commands::Grab { url, out } => {
            ensure_dirs(&settings)?;
            commands::run_grab(url, out, settings, cancel).await?;
        }

        Commands::Doctor => {
            commands::run_doctor(&settings, cli.config.as_deref())?;
        }

        Commands::Config { action } => {
            commands::run_config(action, settings, cli.config.clone())?;
        }
    }

    Ok(())
}

/// Ensure data directories exist.
fn ensure_dirs(settings: &Settings) -> Result<()> {
    std::fs::create_dir_all(settings.data_dir())?;
    std::fs::create_dir_all(settings.work_dir())?;
    Ok(())
}
