//! pypi-ingest - Main entry point

use clap::Parser;
use pypi_common::logging::{init_logging, LogConfig, LogLevel};
use std::process;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use pypi_ingest::cli::{Cli, Commands};
use pypi_ingest::{commands, Config};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        })
        .log_file_prefix("pypi-ingest")
        .filter_directives("sqlx=warn,hyper=info,reqwest=info")
        .build();

    // Environment variables take precedence
    let log_config = match log_config.clone().merge_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Ignoring invalid LOG_* settings: {}", e);
            log_config
        }
    };

    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    };

    if let Err(e) = execute(cli.into_command()).await {
        error!(error = %format!("{:#}", e), "Command failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn execute(command: Commands) -> anyhow::Result<()> {
    let config = Config::load()?;

    match command {
        Commands::Run(args) => {
            let (tx, rx) = watch::channel(false);
            tokio::spawn(async move {
                shutdown_signal().await;
                let _ = tx.send(true);
            });

            let summary = commands::run(&config, &args, rx).await?;
            info!(
                processed = summary.processed,
                completed = summary.completed,
                failed = summary.failed,
                "Run finished"
            );
        }
        Commands::Enqueue { names, file } => {
            commands::enqueue(&config, &names, file.as_deref()).await?;
        }
        Commands::Reset { from } => commands::reset(&config, from).await?,
        Commands::Status => commands::status(&config).await?,
        Commands::Show { name } => commands::show(&config, &name).await?,
        Commands::Migrate => commands::migrate(&config).await?,
    }

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM. The scheduler finishes its current
/// package before stopping.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, finishing current package"),
        _ = terminate => info!("Received SIGTERM, finishing current package"),
    }
}
