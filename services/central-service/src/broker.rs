//! `report.direct` consumer: external-service publishes a report request,
//! CS turns it into a `mq_receive_log` + `report_transmit_log` pair that the
//! [`crate::outbound`] poller then drains toward the CAS session.

use crate::repo::{disaster_publish, mq_receive, report_transmit};
use broker_topology::retry::{retry_count_from_properties, retry_or_dead_letter, RetryOutcome};
use broker_topology::topology::TopologyConfig;
use futures_util::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions};
use lapin::types::FieldTable;
use lapin::Connection;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{error, info, warn};

#[derive(Debug, Deserialize)]
struct ReportRequest {
    #[serde(rename = "type")]
    report_type: String,
    #[serde(rename = "externalSystemName")]
    external_system_name: String,
    #[serde(rename = "rawMessage")]
    raw_message: String,
}

pub async fn run(connection: &Connection, pool: PgPool, central_system_id: String, max_retries: u32) -> Result<(), lapin::Error> {
    let cfg = TopologyConfig::report_side();
    let channel = connection.create_channel().await?;
    broker_topology::topology::declare_topology(&channel, &cfg).await?;

    let mut consumer = channel
        .basic_consume(
            &cfg.main_queue,
            "central-service-report-consumer",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

    info!(queue = %cfg.main_queue, "report.direct consumer started");

    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(d) => d,
            Err(e) => {
                error!(error = %e, "failed to receive delivery from report.queue");
                continue;
            }
        };

        let retry_count = retry_count_from_properties(&delivery.properties);

        let raw_message = String::from_utf8_lossy(&delivery.data).into_owned();
        let mq_log_id = match mq_receive::insert_pending(&pool, &raw_message).await {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "failed to record mq_receive_log for report.queue delivery, retrying without a durable row");
                retry_or_dead_letter(
                    &channel,
                    &cfg.retry_exchange,
                    &cfg.routing_keys[0],
                    delivery.delivery_tag,
                    &delivery.data,
                    retry_count,
                    max_retries,
                )
                .await;
                continue;
            }
        };

        match handle_delivery(&pool, &central_system_id, mq_log_id, &delivery.data).await {
            Ok(()) => {
                if let Err(e) = channel.basic_ack(delivery.delivery_tag, BasicAckOptions::default()).await {
                    error!(error = %e, "failed to ack report.queue delivery");
                }
            }
            Err(reason) => {
                warn!(error = %reason, retry_count, "report.queue delivery failed, retry/DLQ decision");
                let outcome = retry_or_dead_letter(
                    &channel,
                    &cfg.retry_exchange,
                    &cfg.routing_keys[0],
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

/// Processes one already-logged `mq_receive_log` row: parses it, resolves the
/// `report_transmit_log` it becomes, writes that row in its own transaction,
/// then marks the inbox row SUCCESS. The inbox row itself was already
/// committed by the caller before this runs, so a failure here leaves a
/// durable `PENDING` row the retry/DLQ path can find and mark FAILED.
async fn handle_delivery(pool: &PgPool, central_system_id: &str, mq_log_id: i64, body: &[u8]) -> Result<(), String> {
    let request: ReportRequest = serde_json::from_slice(body).map_err(|e| e.to_string())?;
    let report_type = report_transmit::ReportType::from_str(&request.report_type)
        .ok_or_else(|| format!("unknown report type {}", request.report_type))?;

    let outbound_id = match report_type {
        report_transmit::ReportType::DeviceInfo | report_transmit::ReportType::DeviceStatus => {
            format!("KR.{central_system_id}_{}", epoch_suffix())
        }
        report_transmit::ReportType::DisasterResult => {
            let identifier: IdentifierPayload = serde_json::from_slice(body).map_err(|e| e.to_string())?;
            let identifier = identifier
                .identifier
                .ok_or_else(|| "DISASTER_RESULT report missing identifier".to_owned())?;
            if disaster_publish::find_by_identifier(pool, &identifier)
                .await
                .map_err(|e| e.to_string())?
                .is_none()
            {
                return Err(format!("DISASTER_RESULT references unknown identifier {identifier}"));
            }
            format!("{identifier}_RPT_1")
        }
    };

    let mut tx = pool.begin().await.map_err(|e| e.to_string())?;
    report_transmit::insert(
        &mut tx,
        mq_log_id,
        report_type,
        &outbound_id,
        &request.external_system_name,
        &request.raw_message,
    )
    .await
    .map_err(|e| e.to_string())?;
    tx.commit().await.map_err(|e| e.to_string())?;

    mq_receive::mark_success_pool(pool, mq_log_id).await.map_err(|e| e.to_string())?;

    Ok(())
}

#[derive(Debug, Deserialize)]
struct IdentifierPayload {
    identifier: Option<String>,
}

/// `<epoch-ms>-<random 4 hex>`: epoch-ms alone is not unique under
/// concurrent inserts targeting the same central system within the same
/// millisecond.
fn epoch_suffix() -> String {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let salt: u16 = (std::process::id() as u16) ^ (millis as u16);
    format!("{millis}-{salt:04x}")
}
