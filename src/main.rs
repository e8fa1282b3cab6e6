use std::sync::Arc;

use clap::Parser;
use smartmarks::config::{Cli, Config, default_config_dir, default_config_path};
use smartmarks::db::Database;
use smartmarks::feed::ChangeFeed;
use smartmarks::handler::AppState;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    // With --config, data (the database) lives next to the config file.
    // Otherwise both live in ~/.smartmarks/
    let (config_path, data_dir) = match args.config_path {
        Some(path) => {
            let path = std::path::PathBuf::from(path);
            let dir = path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| std::path::PathBuf::from("."));
            (path, dir)
        }
        None => (default_config_path(), default_config_dir()),
    };

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("failed to create data directory {:?}: {}", data_dir, e);
        std::process::exit(1);
    }

    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    tracing::info!("smartmarks.svc starting");

    let mut cfg = Config::new(&config_path.to_string_lossy()).unwrap_or_else(|e| {
        tracing::error!(error = %e, path = ?config_path, "failed to load config file");
        std::process::exit(1);
    });
    if let Some(port) = args.port {
        cfg.app.set_port(port);
    }

    let db = Arc::new(Database::new(&cfg, &data_dir).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup database");
        std::process::exit(1);
    }));
    let feed = ChangeFeed::new(cfg.feed.capacity);

    let address = format!("0.0.0.0:{}", cfg.app.get_port());
    let cancellation_token = CancellationToken::new();

    let sync_task = if db.is_replica() {
        let sync_db = db.clone();
        let sync_token = cancellation_token.clone();
        let period = std::time::Duration::from_secs(cfg.app.sync_interval_seconds.max(1));
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = sync_db.sync().await {
                            tracing::warn!(error = %e, "failed to sync replica");
                        }
                    }
                    _ = sync_token.cancelled() => {
                        tracing::info!("replica sync task shutting down");
                        break;
                    }
                }
            }
        }))
    } else {
        None
    };

    let app = smartmarks::router(AppState::new(db, feed.clone(), cfg.auth.clone()));

    let listener = tokio::net::TcpListener::bind(&address).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup tcp listener");
        std::process::exit(1);
    });

    tracing::info!("smartmarks.svc running on {}", &address);
    let shutdown_token = cancellation_token.clone();
    let shutdown_feed = feed.clone();
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("ctrl+c signal received, preparing to shutdown");
            }
            _ = shutdown_token.cancelled() => {}
        }
        shutdown_token.cancel();
        // Ends open event streams so the server can drain.
        shutdown_feed.close();
    });

    if let Err(err) = serve.await {
        tracing::error!(error = %err, "server stopped with an error");
        std::process::exit(1);
    }

    cancellation_token.cancel();
    if let Some(task) = sync_task {
        let _ = task.await;
    }
    tracing::info!("smartmarks.svc going off, graceful shutdown complete");
}
