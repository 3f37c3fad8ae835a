//! mongo-transfer
//!
//! Moves MongoDB collections between servers and portable archives.
//!
//! # Usage
//!
//! ```bash
//! # Snapshot a database into ./exports
//! mongo-transfer export --uri mongodb://localhost:27017/shop
//!
//! # Restore it elsewhere, overwriting documents with the same _id
//! mongo-transfer import --uri mongodb://backup:27017/shop --file shop_backup_....tar.zst --mode merge
//!
//! # Copy two collections directly between servers
//! mongo-transfer sync --source-uri mongodb://a/shop --target-uri mongodb://b/shop --collections users,orders
//! ```

use colored_json::prelude::*;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use mongo_transfer::cli::{CliInterface, Commands};
use mongo_transfer::error::{Result, TransferError};
use mongo_transfer::store::MongoConnector;
use mongo_transfer::transfer::{TransferEngine, resolve_download};

/// Application entry point
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Parse arguments, set up logging, dispatch the subcommand
async fn run() -> Result<()> {
    let cli = CliInterface::new()?;
    initialize_logging(&cli);

    match &cli.args().command {
        Commands::Config { show, validate } => cli.handle_config_command(*show, *validate),
        Commands::Download { filename } => {
            let path = resolve_download(&cli.config().paths.exports_dir, filename)?;
            println!("{}", path.display());
            Ok(())
        }
        Commands::Export { .. } | Commands::Import { .. } | Commands::Sync { .. } => {
            run_transfer(&cli).await
        }
    }
}

/// Run export, import or sync with Ctrl+C wired to cancellation
async fn run_transfer(cli: &CliInterface) -> Result<()> {
    let engine = TransferEngine::new(
        MongoConnector::new(cli.config().connection.clone()),
        cli.config().clone(),
    );

    let cancel_token = CancellationToken::new();
    let cancel_token_clone = cancel_token.clone();
    let ctrl_c_handle = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                eprintln!("Cancelling after the current collection...");
                cancel_token_clone.cancel();
            }
            Err(err) => eprintln!("Failed to listen for Ctrl+C: {}", err),
        }
    });

    let result = execute(cli, &engine, &cancel_token).await;
    ctrl_c_handle.abort();
    result
}

async fn execute(
    cli: &CliInterface,
    engine: &TransferEngine<MongoConnector>,
    cancel: &CancellationToken,
) -> Result<()> {
    if let Some(request) = cli.export_request()? {
        let summary = engine.export(&request, cancel).await?;
        return print_result(cli, &summary);
    }
    if let Some(request) = cli.import_request()? {
        let summary = engine.import(request, cancel).await?;
        return print_result(cli, &summary);
    }
    if let Some(request) = cli.sync_request()? {
        let summary = engine.sync(&request, cancel).await?;
        return print_result(cli, &summary);
    }
    Err(TransferError::Generic("no transfer command given".to_string()))
}

/// Print a run result as JSON
fn print_result<T: Serialize>(cli: &CliInterface, result: &T) -> Result<()> {
    let json_str = serde_json::to_string_pretty(result)?;
    if cli.color_output() {
        println!(
            "{}",
            json_str
                .to_colored_json_auto()
                .unwrap_or_else(|_| json_str.clone())
        );
    } else {
        println!("{}", json_str);
    }
    Ok(())
}

/// Initialize logging from the effective configuration.
///
/// Logs go to stderr so stdout carries only the JSON result.
fn initialize_logging(cli: &CliInterface) {
    let level = cli.config().logging.level.to_tracing_level();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_ansi(cli.color_output())
        .with_writer(std::io::stderr);

    if cli.config().logging.timestamps {
        subscriber.init();
    } else {
        subscriber.without_time().init();
    }
}
