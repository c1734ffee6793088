//! Server entry point

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use callguard_analytics::{AnalyticsRepository, InMemoryRepository};
use callguard_config::{load_settings, Settings};
use callguard_server::{create_router, init_metrics, AppState};
use callguard_store::{KeyValueStore, MemoryStore, RedisStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults.
    let env = std::env::var("CALLGUARD_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing is not initialized yet.
            eprintln!("fatal: configuration invalid: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&settings);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?settings.environment,
        "starting callguard"
    );

    let metrics_handle = if settings.observability.metrics_enabled {
        init_metrics()
    } else {
        None
    };

    // A store that refuses connections at startup is fatal.
    let store: Arc<dyn KeyValueStore> = if settings.store.url.is_empty() {
        tracing::warn!("no store URL configured, using in-memory store (single node only)");
        Arc::new(MemoryStore::new())
    } else {
        match RedisStore::connect(&settings.store.url).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::error!(error = %e, "store connection refused at startup");
                std::process::exit(1);
            }
        }
    };

    let repository: Arc<dyn AnalyticsRepository> = Arc::new(InMemoryRepository::new());

    let state = AppState::build(settings.clone(), store, repository)?.with_metrics(metrics_handle);

    // Background analysis workers.
    state.workers.start();
    let workers = state.workers.clone();

    // Periodic sweep for calls abandoned without an end event.
    {
        let manager = state.manager.clone();
        let max_age = std::time::Duration::from_secs(settings.cache.dialogue_state_ttl_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(600));
            interval.tick().await;
            loop {
                interval.tick().await;
                manager.tracker().cleanup_stale(max_age).await;
            }
        });
    }

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let workers finish their current task inside the grace window.
    workers.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}

/// Initialize tracing with env-filter and optional JSON output.
fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "callguard={},tower_http=info",
            settings.observability.log_level
        )
        .into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}
