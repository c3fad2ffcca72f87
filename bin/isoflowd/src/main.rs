//! `isoflowd` — the Isoflow server binary.
//!
//! Usage:
//!   isoflowd [--data-dir <dir>] [--sqlite <path>] [--listen <addr>]
//!
//! Wires the production, orders, and billing modules over one shared
//! SQLite store and serves them under `/{module}`.

mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use isoflow_core::{ActorPermissions, LogRecorder, Module, ServiceConfig};
use isoflow_sql::SqliteStore;

/// Isoflow server.
#[derive(Parser, Debug)]
#[command(name = "isoflowd", about = "Isoflow order fulfillment server")]
struct Cli {
    /// Directory for persistent data.
    #[arg(long = "data-dir")]
    data_dir: Option<PathBuf>,

    /// Path to the SQLite database file (overrides {data-dir}/data.sqlite).
    #[arg(long = "sqlite")]
    sqlite: Option<PathBuf>,

    /// Listen address.
    #[arg(long = "listen", default_value = "0.0.0.0:8080")]
    listen: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = ServiceConfig {
        data_dir: cli.data_dir.clone(),
        sqlite_path: cli.sqlite.clone(),
        listen: cli.listen.clone(),
    };

    if let Some(ref dir) = config.data_dir {
        std::fs::create_dir_all(dir)?;
    }

    // One shared SQL store; every module initialises its own tables.
    let sqlite_path = config.resolve_sqlite_path();
    let sql: Arc<dyn isoflow_sql::SQLStore> = Arc::new(
        SqliteStore::open(&sqlite_path)
            .map_err(|e| anyhow::anyhow!("failed to open SQL store: {}", e))?,
    );
    info!("SQL store open at {}", sqlite_path.display());

    // Callers arrive pre-authenticated with their permission set in the
    // x-actor-* headers; the engines check it per action.
    let authorizer = Arc::new(ActorPermissions);
    let audit = Arc::new(LogRecorder);

    let production_module = production::ProductionModule::new(
        Arc::clone(&sql),
        authorizer.clone(),
        audit.clone(),
    )?;
    info!("Production module initialized");

    let orders_module = orders::OrdersModule::new(
        Arc::clone(&sql),
        authorizer.clone(),
        audit.clone(),
        Arc::clone(production_module.engine()),
    )?;
    info!("Orders module initialized");

    let billing_module = billing::BillingModule::new(
        Arc::clone(&sql),
        authorizer.clone(),
        audit.clone(),
    )?;
    info!("Billing module initialized");

    // Batch release fans out to the order state machine.
    let order_engine = Arc::clone(orders_module.engine());
    production_module
        .engine()
        .set_release_trigger(Arc::new(move |batch| {
            order_engine.on_batch_released(&batch.id);
        }));

    let module_routes = vec![
        (production_module.name().to_string(), production_module.routes()),
        (orders_module.name().to_string(), orders_module.routes()),
        (billing_module.name().to_string(), billing_module.routes()),
    ];

    let app = routes::build_router(module_routes);

    let listener = tokio::net::TcpListener::bind(&cli.listen).await?;
    info!("Isoflow server listening on {}", cli.listen);
    axum::serve(listener, app).await?;

    Ok(())
}
