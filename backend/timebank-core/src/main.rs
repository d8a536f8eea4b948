// src/main.rs
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod admin;
mod approval;
mod balance;
mod config;
mod csv_export;
mod day_span;
mod email;
mod error;
mod google;
mod identity;
mod models;
mod occupancy;
mod report;
mod repository;
mod routes;
mod services;
mod services_tests;
mod session;
mod store;
mod validation;

use config::{AuthConfig, Config};
use google::GoogleProvider;
use identity::IdentityResolver;
use repository::Repository;
use routes::AppState;
use services::{SystemClock, TimeBank};
use session::SessionManager;
use store::{DocumentStore, JsonFileStore, MemoryStore};

#[derive(Parser)]
#[command(name = "timebank-core", version, about = "Overtime balance and absence approval service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Write the per-user hours report as CSV
    ExportReport {
        /// Directory the dated CSV file is written to
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting timebank in {} mode", config.environment);

    let store = open_store(&config).await?;
    let repo = Repository::new(store, config.store_timeout());
    let timebank = TimeBank::new(repo.clone(), Arc::new(SystemClock));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, repo, timebank).await,
        Command::ExportReport { out } => {
            let rows = timebank.report_rows().await?;
            let path = csv_export::write_report_file(&rows, &out, timebank.today())?;
            info!("Exported {} report rows to {}", rows.len(), path.display());
            Ok(())
        }
    }
}

async fn open_store(config: &Config) -> Result<Arc<dyn DocumentStore>> {
    match &config.store_dir {
        Some(dir) => {
            let store = JsonFileStore::open(dir)
                .await
                .with_context(|| format!("Failed to open store at {}", dir.display()))?;
            Ok(Arc::new(store))
        }
        None => {
            info!("No STORE_DIR configured, records are kept in memory only");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn serve(config: Config, repo: Repository, timebank: TimeBank) -> Result<()> {
    let auth = AuthConfig::from_env().context("Failed to load session/OAuth configuration")?;
    let resolver = IdentityResolver::new(repo, &config.admin_emails);
    let sessions = SessionManager::new(
        resolver,
        auth.jwt_secret_bytes(),
        auth.jwt_expiration_hours,
    );
    let provider = GoogleProvider::new(
        auth.google_client_id,
        auth.google_client_secret,
        auth.google_redirect_uri,
    );

    let app = routes::router(AppState {
        timebank,
        sessions: Arc::new(sessions),
        provider,
    });

    let addr = config.socket_addr()?;
    match config.tls_paths() {
        Some((cert_path, key_path)) => {
            let tls_config = RustlsConfig::from_pem_file(&cert_path, &key_path)
                .await
                .context("Failed to load TLS cert/key")?;
            info!("Starting server on https://{}", addr);
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await
                .context("HTTPS server failed")?;
        }
        None => {
            info!("Starting server on http://{}", addr);
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind {}", addr))?;
            axum::serve(listener, app)
                .await
                .context("HTTP server failed")?;
        }
    }

    Ok(())
}
