pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod pollers;
pub mod repo;
pub mod ws;

use config::Config;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};
use ws::SubscriberRegistry;

/// Owns every background task `run` spawns and drains them in the fixed
/// order the process requires on shutdown: workers first (they stop taking
/// new work and drain fast), then the HTTP/WS listener (network sessions
/// closed), then the broker consumer. The DB pool outlives this: it is
/// closed by the caller once it has logged the final `STOPPED`/`EXITED` events.
struct Supervisor {
    pool: PgPool,
    disaster_worker: JoinHandle<()>,
    report_worker: JoinHandle<()>,
    server: JoinHandle<()>,
    broker: JoinHandle<()>,
}

impl Supervisor {
    async fn shutdown(self) {
        info!("shutdown signal received, draining workers");
        let _ = self.disaster_worker.await;
        let _ = self.report_worker.await;
        let _ = self.server.await;
        let _ = self.broker.await;
        repo::log_connection_event(&self.pool, "STOPPED", None).await;
    }
}

/// Wires the HTTP/WS server, broker consumer and both pollers together and
/// drives them until `shutdown` fires, then tears them down via
/// [`Supervisor::shutdown`].
pub async fn run(config: Arc<Config>, pool: PgPool, connection: lapin::Connection, shutdown_rx: watch::Receiver<bool>) {
    let registry = SubscriberRegistry::new(pool.clone());
    repo::log_connection_event(&pool, "STARTED", None).await;

    let app = axum::Router::new()
        .merge(http::router(pool.clone()))
        .route("/ws", axum::routing::get(ws::ws_handler))
        .with_state(registry.clone())
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = match TcpListener::bind(&config.bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, addr = %config.bind_addr, "failed to bind HTTP listener");
            return;
        }
    };
    info!(addr = %config.bind_addr, "listening");

    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        let serve = axum::serve(listener, app.into_make_service());
        let graceful = serve.with_graceful_shutdown(async move {
            let _ = server_shutdown.changed().await;
        });
        if let Err(e) = graceful.await {
            error!(error = %e, "HTTP server exited with error");
        }
    });

    let connection = Arc::new(connection);
    let broker_connection = connection.clone();
    let broker_pool = pool.clone();
    let max_retries = config.max_retries;
    let mut broker_shutdown = shutdown_rx.clone();
    let broker_task = tokio::spawn(async move {
        tokio::select! {
            result = broker::run(&broker_connection, broker_pool, max_retries) => {
                if let Err(e) = result {
                    error!(error = %e, "disaster.topic consumer exited");
                }
            }
            _ = broker_shutdown.changed() => {}
        }
    });

    let disaster_worker = tokio::spawn(pollers::run_disaster_transmit_worker(config.clone(), registry.clone(), shutdown_rx.clone()));
    let report_worker = tokio::spawn(pollers::run_report_publish_worker(config.clone(), pool.clone(), connection.clone(), shutdown_rx.clone()));

    let mut shutdown_rx = shutdown_rx;
    let _ = shutdown_rx.changed().await;

    let supervisor = Supervisor { pool, disaster_worker, report_worker, server, broker: broker_task };
    supervisor.shutdown().await;
}
