use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use licensor::config::Config;
use licensor::db::{self, AppState};
use licensor::handlers;
use licensor::keygen::GeneratorRegistry;
use licensor::models::{CreateProject, CreateUser, GenerateOptions};
use licensor::service::LicenseService;

#[derive(Parser, Debug)]
#[command(name = "licensor")]
#[command(about = "Device-bound license key server")]
struct Cli {
    /// Seed the database with a dev project, user and license key
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,

    /// Print the registered key generators and exit
    #[arg(long)]
    list_generators: bool,
}

/// Seeds the database with dev data for trying out the API.
/// Only runs in dev mode and when no project exists yet.
fn seed_dev_data(state: &AppState) -> licensor::error::Result<()> {
    let conn = state.db.get()?;
    if !db::queries::list_projects(&conn)?.is_empty() {
        tracing::info!("Database already has data, skipping seed");
        return Ok(());
    }
    drop(conn);

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV DATA");
    tracing::info!("============================================");

    let service = &state.service;
    let project = service.create_project(&CreateProject {
        name: "Dev App".to_string(),
        slug: "dev-app".to_string(),
        key_generator: None,
        key_derivation: Default::default(),
        default_max_devices: Some(3),
        default_features: Some(vec!["export".to_string(), "sync".to_string()]),
    })?;
    tracing::info!("Project: {} (id: {})", project.name, project.id);
    tracing::info!("Project Generator: {}", project.key_generator);

    let user = service.create_user(
        &project,
        &CreateUser {
            email: "dev@licensor.local".to_string(),
            name: "Dev User".to_string(),
        },
    )?;
    tracing::info!("User: {} ({})", user.email, user.name);

    let key = service.generate_key(&project, &user, GenerateOptions::default())?;
    tracing::info!("License Key: {}", key.key);
    tracing::info!("Max Devices: {}", key.max_devices);

    tracing::info!("============================================");
    tracing::info!("DEV DATA SEEDED SUCCESSFULLY");
    tracing::info!("============================================");

    println!();
    println!("--- COPY FROM HERE ---");
    println!("  project_id: {}", project.id);
    println!("  project_secret: {}", project.secret_key);
    println!("  email: {}", user.email);
    println!("  license_key: {}", key.key);
    println!("--- END COPY ---");
    println!();

    Ok(())
}

fn print_generators(registry: &GeneratorRegistry) {
    for identifier in registry.available() {
        if let Some(info) = registry.info(identifier) {
            println!(
                "{:<24} {:<16} {:<4} {}",
                info.identifier,
                info.kind.as_str(),
                info.version,
                info.format
            );
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "licensor=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    let registry = config.build_registry().unwrap_or_else(|e| {
        eprintln!("Invalid generator configuration: {}", e);
        std::process::exit(1);
    });

    if cli.list_generators {
        print_generators(&registry);
        return;
    }

    if !registry.has(&config.project_defaults.key_generator) {
        eprintln!(
            "LICENSOR_DEFAULT_GENERATOR '{}' is not registered",
            config.project_defaults.key_generator
        );
        std::process::exit(1);
    }

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }
    tracing::info!(generators = ?registry.available(), "Key generators registered");

    let db_pool = db::open(&config.database_path).expect("Failed to open database");

    let service = LicenseService::new(db_pool.clone(), Arc::new(registry))
        .with_defaults(config.project_defaults.clone());
    let state = AppState {
        db: db_pool,
        service,
    };

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set LICENSOR_ENV=dev)");
        } else if let Err(e) = seed_dev_data(&state) {
            tracing::error!("Failed to seed dev data: {}", e);
        }
    }

    let app = Router::new()
        .merge(handlers::public::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("Licensor server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        } else {
            tracing::info!("Removed {}", db_path);
        }
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
        tracing::info!("Ephemeral cleanup complete");
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
