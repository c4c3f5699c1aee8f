use actix_web::{web, App, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kosync_proxy::config::{Config, LogFormat, LoggingConfig};
use kosync_proxy::db::{MySqlLibraryDirectory, MySqlSessionStore};
use kosync_proxy::handlers::{self, ProxyState};
use kosync_proxy::jobs::SessionSweepJob;
use kosync_proxy::middleware::RequestTracing;
use kosync_proxy::services::{
    Clock, SessionTracker, SyncEventAdapter, SystemClock, TrackerSettings, UpstreamClient,
};

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("{},sqlx=warn,reqwest=warn,hyper=warn", logging.level).into()
    });

    let (json, text) = match logging.format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Text => (None, Some(tracing_subscriber::fmt::layer())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .init();
}

/// KoSync proxy
///
/// # Routes
///
/// - `PUT /syncs/progress` - forwarded, then tracked as a push
/// - `GET /syncs/progress/{document}` - forwarded, then tracked as a pull
/// - `/health`, `/ready`, `/metrics` - answered locally
/// - everything else - forwarded unchanged
#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("ERROR: Failed to load configuration: {}", e);
            std::process::exit(2);
        }
    };

    init_tracing(&config.logging);

    tracing::info!(
        upstream = %config.upstream.base_url,
        timeout_minutes = config.sessions.timeout_minutes,
        min_duration_seconds = config.sessions.min_duration_seconds,
        sweep_interval_seconds = config.sessions.sweep_interval_seconds,
        "Starting {}",
        kosync_proxy::config::SERVICE_NAME
    );

    config.database.log_config();
    let pool = db_pool::create_pool(config.database.clone())
        .await
        .context("failed to connect to database")?;

    if config.run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;
        tracing::info!("Database migrations applied");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(MySqlSessionStore::new(
        pool.clone(),
        config.sessions.progress_decimal_places,
    ));
    let tracker = Arc::new(SessionTracker::new(
        TrackerSettings::from_config(&config.sessions, config.logging.display_timezone)?,
        store,
    ));
    let directory = Arc::new(MySqlLibraryDirectory::new(pool.clone()));
    let adapter = Arc::new(SyncEventAdapter::new(
        directory,
        Arc::clone(&tracker),
        Arc::clone(&clock),
    ));

    let state = web::Data::new(ProxyState {
        upstream: UpstreamClient::new(&config.upstream)?,
        adapter,
        tracker: Arc::clone(&tracker),
    });
    let pool_data = web::Data::new(pool.clone());

    let (shutdown_tx, _) = broadcast::channel(1);
    let sweeper = SessionSweepJob::new(
        Arc::clone(&tracker),
        Arc::clone(&clock),
        config.sessions.sweep_interval(),
    )
    .spawn(shutdown_tx.subscribe());

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("HTTP server listening on {}", bind_address);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(pool_data.clone())
            .wrap(RequestTracing)
            .configure(handlers::configure)
    })
    .bind(&bind_address)
    .with_context(|| format!("failed to bind {}", bind_address))?
    .disable_signals()
    .run();

    let server_handle = server.handle();
    let mut server_task = actix_web::rt::spawn(server);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut server_error = None;
    tokio::select! {
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => tracing::warn!("HTTP server stopped unexpectedly"),
                Ok(Err(e)) => {
                    tracing::error!("HTTP server error: {}", e);
                    server_error = Some(anyhow::Error::from(e));
                }
                Err(e) => {
                    tracing::error!("HTTP server task failed: {}", e);
                    server_error = Some(anyhow::Error::from(e));
                }
            }
        }
        _ = &mut shutdown => {
            tracing::info!("Shutdown signal received");
            server_handle.stop(true).await;
        }
    }

    let _ = shutdown_tx.send(());
    if let Err(e) = sweeper.await {
        tracing::warn!("Session sweep job ended abnormally: {}", e);
    }

    let flush = tracker.shutdown().await;
    pool.close().await;

    match (flush, server_error) {
        (Err(e), _) => {
            tracing::error!("{}", e);
            Err(e.into())
        }
        (Ok(_), Some(e)) => Err(e),
        (Ok(report), None) => {
            tracing::info!(
                flushed = report.flushed,
                persisted = report.persisted,
                "{} stopped",
                kosync_proxy::config::SERVICE_NAME
            );
            Ok(())
        }
    }
}
