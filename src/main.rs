//! wxexport - decrypt, browse and export local WeChat chat history.
//!
//! Runs a small local web service with three stages: decrypt the running
//! client's databases, list the contacts, export conversations to documents.
//!
//!   wxexport                      # start the service on 127.0.0.1:8888
//!   wxexport serve -p 9000        # custom port
//!   wxexport contacts <Msg dir>   # list contacts of a decrypted directory
//!   wxexport init-config          # write ~/.wxexport/config.toml

mod api;
mod application;
mod cli;
mod domain;
mod infrastructure;
#[cfg(test)]
mod test_support;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use api::{AppState, ExportDefaults};
use application::{
    collect_contacts, format_catalog_stats, format_contacts_table, CatalogService,
    DecryptService, DecryptSettings, ExportService, InMemorySessionStore, SessionStateStore,
    WriterRegistry,
};
use cli::{Cli, Commands};
use domain::{AppConfig, DatabaseDecryptor, SchemaReader};
use infrastructure::{
    ensure_config_exists, load_config, CommandDecryptor, ConfiguredDiscovery,
    PassthroughDecryptor, SqliteSchemaReader,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// Main application logic.
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command() {
        Commands::Serve { host, port } => {
            let config = load_config(cli.config.as_deref()).context("loading configuration")?;
            cmd_serve(config, host.clone(), *port).await
        }
        Commands::Contacts {
            database_dir,
            schema_version,
        } => cmd_contacts(database_dir, *schema_version),
        Commands::InitConfig => cmd_init_config(cli.config.as_deref()),
    }
}

/// Wire the configured adapters into the three services.
fn build_state(config: &AppConfig) -> anyhow::Result<AppState> {
    let export_range = config
        .export
        .time_range()
        .map_err(|message| domain::AppError::Config { message })
        .context("invalid [export] time window")?;
    tracing::debug!(start = export_range.start, end = export_range.end, "Default export window");

    let store: Arc<dyn SessionStateStore> =
        Arc::new(InMemorySessionStore::new(config.lock_timeout()));

    let decryptor: Arc<dyn DatabaseDecryptor> = match &config.decrypt.command {
        Some(command) => Arc::new(CommandDecryptor::new(command)?),
        None => Arc::new(PassthroughDecryptor),
    };

    let decrypt = DecryptService::new(
        Arc::clone(&store),
        Arc::new(ConfiguredDiscovery::new(config.instances.clone())),
        decryptor,
        DecryptSettings {
            version_table: config.paths.version_table.clone(),
            work_dir: config.paths.work_dir.clone(),
            preferred_owner: config.decrypt.owner_id.clone(),
        },
    );

    let catalog = CatalogService::new(Arc::clone(&store), Arc::new(SqliteSchemaReader));

    let export = ExportService::new(
        Arc::clone(&store),
        WriterRegistry::with_defaults(),
        config.paths.export_dir.clone(),
        config.export.batch_deadline(),
    );

    Ok(AppState {
        store,
        decrypt: Arc::new(decrypt),
        catalog: Arc::new(catalog),
        export: Arc::new(export),
        export_defaults: ExportDefaults {
            start_time: config.export.start_time.clone(),
            end_time: config.export.end_time.clone(),
        },
    })
}

/// Run the web service until interrupted.
async fn cmd_serve(config: AppConfig, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let state = build_state(&config)?;
    let export_dir = state.export.export_dir().to_path_buf();
    let router = api::create_router(state);

    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);
    let addr = format!("{host}:{port}");

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(
        addr = %addr,
        instances = config.instances.len(),
        export_dir = %export_dir.display(),
        "Listening"
    );
    println!("{} http://{addr}", "🚀 wxexport listening on".bold());
    if config.instances.is_empty() {
        println!(
            "{} no [[instances]] configured; run `wxexport init-config` and edit the file",
            "⚠".yellow()
        );
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running server")?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

/// List contacts of a decrypted directory without starting the service.
fn cmd_contacts(database_dir: &Path, schema_version: u32) -> anyhow::Result<()> {
    let db = SqliteSchemaReader
        .open(database_dir, schema_version)
        .with_context(|| format!("opening {}", database_dir.display()))?;
    let catalog = collect_contacts(db.list_contacts()?)?;

    println!("{}", format_contacts_table(&catalog.contacts));
    println!();
    println!("{}", format_catalog_stats(&catalog));

    Ok(())
}

/// Write the default configuration file.
fn cmd_init_config(path: Option<&Path>) -> anyhow::Result<()> {
    let path: PathBuf = path.map_or_else(AppConfig::default_config_path, Path::to_path_buf);

    if ensure_config_exists(&path)? {
        println!("{} Created {}", "✓".green().bold(), path.display());
    } else {
        println!("{} {} already exists", "ℹ".blue(), path.display());
    }

    Ok(())
}

/// Setup tracing/logging based on verbosity level.
fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}
