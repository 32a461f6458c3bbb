//! `disaster.topic` consumer: CS publishes one CAP alert, ES fans it out to
//! one `disaster_transmit_log` row per active subscriber of its event code.

use crate::repo::{disaster_transmit, external_system, mq_receive};
use broker_topology::retry::{retry_count_from_properties, retry_or_dead_letter, RetryOutcome};
use broker_topology::topology::TopologyConfig;
use cas_wire::Envelope;
use futures_util::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions};
use lapin::types::FieldTable;
use lapin::Connection;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{error, info, warn};

#[derive(Debug, Deserialize)]
struct DisasterPayload {
    identifier: String,
    #[serde(rename = "eventCode")]
    event_code: String,
    #[serde(rename = "rawMessage")]
    raw_message: Envelope,
}

pub async fn run(connection: &Connection, pool: PgPool, max_retries: u32) -> Result<(), lapin::Error> {
    let cfg = TopologyConfig::disaster_side();
    let channel = connection.create_channel().await?;
    broker_topology::topology::declare_topology(&channel, &cfg).await?;

    let mut consumer = channel
        .basic_consume(
            &cfg.main_queue,
            "external-service-disaster-consumer",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

    info!(queue = %cfg.main_queue, "disaster.topic consumer started");

    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(d) => d,
            Err(e) => {
                error!(error = %e, "failed to receive delivery from disaster.queue");
                continue;
            }
        };

        let retry_count = retry_count_from_properties(&delivery.properties);

        let mq_log_id = match mq_receive::insert_pending(&pool, &String::from_utf8_lossy(&delivery.data)).await {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "failed to record mq_receive_log for disaster.queue delivery, retrying without a durable row");
                retry_or_dead_letter(
                    &channel,
                    &cfg.retry_exchange,
                    delivery.routing_key.as_str(),
                    delivery.delivery_tag,
                    &delivery.data,
                    retry_count,
                    max_retries,
                )
                .await;
                continue;
            }
        };

        match handle_delivery(&pool, mq_log_id, &delivery.data).await {
            Ok(()) => {
                if let Err(e) = channel.basic_ack(delivery.delivery_tag, BasicAckOptions::default()).await {
                    error!(error = %e, "failed to ack disaster.queue delivery");
                }
            }
            Err(reason) => {
                warn!(error = %reason, retry_count, "disaster.queue delivery failed, retry/DLQ decision");
                let outcome = retry_or_dead_letter(
                    &channel,
                    &cfg.retry_exchange,
                    delivery.routing_key.as_str(),
                    delivery.delivery_tag,
                    &delivery.data,
                    retry_count,
                    max_retries,
                )
                .await;
                if matches!(outcome, RetryOutcome::DeadLettered) {
                    mq_receive::mark_failed(&pool, mq_log_id, &format!("[Final Failed] {reason}")).await;
                }
            }
        }
    }

    Ok(())
}

/// Processes one already-logged `mq_receive_log` row: fans the alert out to
/// one `disaster_transmit_log` row per subscriber in its own transaction,
/// then marks the inbox row SUCCESS. The inbox row itself was already
/// committed by the caller before this runs, so a failure here leaves a
/// durable `PENDING` row the retry/DLQ path can find and mark FAILED.
async fn handle_delivery(pool: &PgPool, mq_log_id: i64, body: &[u8]) -> Result<(), String> {
    let payload: DisasterPayload = serde_json::from_slice(body).map_err(|e| e.to_string())?;
    let raw_message = serde_json::to_string(&payload.raw_message).map_err(|e| e.to_string())?;

    let subscribers = external_system::find_subscribers(pool, &payload.event_code).await.map_err(|e| e.to_string())?;

    let mut tx = pool.begin().await.map_err(|e| e.to_string())?;
    for subscriber in &subscribers {
        disaster_transmit::insert_if_new(&mut tx, mq_log_id, subscriber.id, &payload.identifier, &raw_message)
            .await
            .map_err(|e| e.to_string())?;
    }
    tx.commit().await.map_err(|e| e.to_string())?;

    mq_receive::mark_success_pool(pool, mq_log_id).await.map_err(|e| e.to_string())?;

    Ok(())
}
