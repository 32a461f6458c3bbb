//! `disasterTransmitWorker` (WS delivery) and `reportPublishWorker` (broker
//! publish), each a fixed-period, bounded-concurrency, non-overlapping tick.

use crate::config::Config;
use crate::repo::{disaster_transmit, report_publish};
use crate::ws::SubscriberRegistry;
use broker_topology::topology::TopologyConfig;
use lapin::options::BasicPublishOptions;
use lapin::{BasicProperties, Connection};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tracing::error;

pub async fn run_disaster_transmit_worker(config: Arc<Config>, registry: SubscriberRegistry, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(config.poll_period);
    loop {
        tokio::select! {
            _ = shutdown.changed() => { if *shutdown.borrow() { return; } }
            _ = ticker.tick() => {
                disaster_transmit_tick(&config, &registry).await;
            }
        }
    }
}

async fn disaster_transmit_tick(config: &Config, registry: &SubscriberRegistry) {
    let t_xmit_seconds = config.t_xmit.as_secs() as i64;
    let rows = match disaster_transmit::fetch_due(&registry.pool_handle(), t_xmit_seconds, config.poll_batch_size).await {
        Ok(rows) => rows,
        Err(e) => {
            error!(error = %e, "failed to fetch due disaster_transmit_log rows");
            return;
        }
    };
    if rows.is_empty() {
        return;
    }

    let semaphore = Arc::new(Semaphore::new(config.poll_concurrency));
    let mut handles = Vec::with_capacity(rows.len());
    for row in rows {
        let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
        let registry = registry.clone();
        let max_retries = config.max_retries;
        let t_xmit = config.t_xmit;
        handles.push(tokio::spawn(async move {
            registry.reliable_emit(row.id, max_retries, t_xmit).await;
            drop(permit);
        }));
    }
    for h in handles {
        let _ = h.await;
    }
}

pub async fn run_report_publish_worker(config: Arc<Config>, pool: PgPool, connection: Arc<Connection>, mut shutdown: watch::Receiver<bool>) {
    let cfg = TopologyConfig::report_side();
    let channel = match connection.create_channel().await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to open channel for report publish worker");
            return;
        }
    };

    let mut ticker = tokio::time::interval(config.poll_period);
    loop {
        tokio::select! {
            _ = shutdown.changed() => { if *shutdown.borrow() { return; } }
            _ = ticker.tick() => {
                report_publish_tick(&pool, &channel, &cfg.main_exchange, &cfg.routing_keys[0], config.poll_batch_size, config.max_retries).await;
            }
        }
    }
}

async fn report_publish_tick(pool: &PgPool, channel: &lapin::Channel, exchange: &str, routing_key: &str, limit: i64, max_retries: u32) {
    let rows = match report_publish::fetch_due(pool, limit).await {
        Ok(rows) => rows,
        Err(e) => {
            error!(error = %e, "failed to fetch due report_publish_log rows");
            return;
        }
    };

    for row in rows {
        if row.retry_count as u32 >= max_retries {
            let _ = report_publish::mark_failed(pool, row.id).await;
            continue;
        }

        let body = serde_json::json!({
            "type": row.r#type,
            "externalSystemName": row.external_system_name,
            "rawMessage": row.raw_message,
        });
        let Ok(bytes) = serde_json::to_vec(&body) else { continue };

        match channel.basic_publish(exchange, routing_key, BasicPublishOptions::default(), &bytes, BasicProperties::default()).await {
            Ok(_) => {
                let _ = report_publish::mark_success(pool, row.id).await;
            }
            Err(e) => {
                error!(error = %e, log_id = row.id, "failed to publish report.external message");
                let _ = report_publish::bump_retry(pool, row.id).await;
            }
        }
    }
}
