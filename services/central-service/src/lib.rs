pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod inbound;
pub mod outbound;
pub mod repo;
pub mod session;

use config::Config;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Owns every background task `run` spawns and drains them in the fixed
/// order the process requires on shutdown: workers first (they stop taking
/// new work and drain fast), then the CAS network session (socket closed),
/// then the broker consumer. The DB pool outlives this: it is closed by
/// the caller once it has logged the final `STOPPED`/`EXITED` events.
struct Supervisor {
    pool: PgPool,
    dispatcher: JoinHandle<()>,
    poller: JoinHandle<()>,
    session: JoinHandle<()>,
    broker: JoinHandle<()>,
}

impl Supervisor {
    async fn shutdown(self) {
        info!("shutdown signal received, draining workers");
        let _ = self.dispatcher.await;
        let _ = self.poller.await;
        let _ = self.session.await;
        let _ = self.broker.await;
        repo::log_connection_event(&self.pool, "STOPPED", None).await;
    }
}

/// Wires the session, inbound dispatcher, outbound poller and broker
/// consumer together and drives them until `shutdown` fires, then tears
/// them down via [`Supervisor::shutdown`].
pub async fn run(config: Arc<Config>, pool: PgPool, connection: lapin::Connection, shutdown_rx: watch::Receiver<bool>) {
    let (inbound_tx, mut inbound_rx) = mpsc::channel(256);

    let (session, session_task) = session::run(config.clone(), inbound_tx, shutdown_rx.clone()).await;
    repo::log_connection_event(&pool, "STARTED", None).await;

    let dispatch_pool = pool.clone();
    let dispatch_config = config.clone();
    let dispatch_session = session.clone();
    let mut dispatch_shutdown = shutdown_rx.clone();
    let dispatcher = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = dispatch_shutdown.changed() => {
                    if *dispatch_shutdown.borrow() { return; }
                }
                msg = inbound_rx.recv() => {
                    match msg {
                        Some(session::Inbound::DisasterNotify { header, envelope }) => {
                            inbound::handle_disaster_notify(&dispatch_config, &dispatch_pool, &dispatch_session, header, envelope).await;
                        }
                        Some(session::Inbound::ReportAck { envelope, .. }) => {
                            outbound::handle_report_ack(&dispatch_pool, envelope).await;
                        }
                        None => return,
                    }
                }
            }
        }
    });

    let poller = tokio::spawn(outbound::run_poller(config.clone(), pool.clone(), session.clone(), shutdown_rx.clone()));

    let broker_pool = pool.clone();
    let central_system_id = config.central_system_id.clone();
    let max_retries = config.max_retries;
    let mut broker_shutdown = shutdown_rx.clone();
    let broker_task = tokio::spawn(async move {
        tokio::select! {
            result = broker::run(&connection, broker_pool, central_system_id, max_retries) => {
                if let Err(e) = result {
                    error!(error = %e, "report.direct consumer exited");
                }
            }
            _ = broker_shutdown.changed() => {}
        }
    });

    let mut shutdown_rx = shutdown_rx;
    let _ = shutdown_rx.changed().await;

    let supervisor = Supervisor { pool, dispatcher, poller, session: session_task, broker: broker_task };
    supervisor.shutdown().await;
}
