//! careroute HTTP server
//!
//! Starts an Axum web server that answers queries through the routing engine.

use careroute::{
    cli::{Cli, Command, generate_config_template},
    config::Config,
    engine::RoutingEngine,
    handlers::{self, AppState},
    metrics::Metrics,
    persistence::{self, StateStore},
    telemetry,
};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Command::Config { output }) = cli.command {
        let template = generate_config_template();
        match output {
            Some(path) => {
                std::fs::write(&path, template)?;
                eprintln!("Configuration template written to {}", path);
            }
            None => print!("{}", template),
        }
        return Ok(());
    }

    // Load configuration
    let config = Config::from_file(&cli.config)?;

    // Initialize telemetry
    telemetry::init(&config.observability.log_level);

    tracing::info!(
        "Starting careroute server on {}:{}",
        config.server.host,
        config.server.port
    );

    let metrics = Metrics::new()?;
    let persistence_config = config.persistence.clone();
    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0])),
        config.server.port,
    ));

    let engine = Arc::new(
        RoutingEngine::builder(config)
            .with_metrics(metrics.clone())
            .build()?,
    );

    // Restore durable state before accepting traffic
    let store = persistence_config.state_file.as_ref().map(StateStore::new);
    let flush_task = match &store {
        Some(store) => {
            persistence::restore(store, engine.ledger(), engine.quota()).await?;
            Some(persistence::start_background_flush(
                store.clone(),
                Arc::clone(engine.ledger()),
                Arc::clone(engine.quota()),
                Duration::from_secs(persistence_config.flush_interval_seconds),
                Some(metrics.clone()),
            ))
        }
        None => {
            tracing::warn!(
                "persistence.state_file is not set; ledger and quota state will not survive restarts"
            );
            None
        }
    };

    let maintenance_task = Arc::clone(&engine).start_maintenance();

    let state = AppState::new(Arc::clone(&engine), metrics).with_config_path(&cli.config);
    let app = handlers::app(state);

    tracing::info!("Listening on {}", addr);
    tracing::info!("Health check available at http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    maintenance_task.abort();
    if let Some(task) = flush_task {
        task.abort();
    }
    if let Some(store) = &store {
        persistence::flush(store, engine.ledger(), engine.quota()).await?;
        tracing::info!(path = %store.path().display(), "Final state flush complete");
    }

    tracing::info!("careroute stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections");
}
