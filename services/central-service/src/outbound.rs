//! Outbound report pipeline (CS -> CAS): builds the typed CAP for
//! `report_transmit_log` rows and drives them through SENT -> SUCCESS|PENDING.

use crate::config::Config;
use crate::repo::{disaster_publish, report_transmit};
use crate::session::{SendFrame, SessionHandle};
use cas_wire::cap::{MSG_TYPE_ACK, MSG_TYPE_ALERT, SCOPE_PRIVATE, STATUS_ACTUAL};
use cas_wire::{build_envelope, parse_envelope, Alert, AlertInfo, CapInfo, Envelope, FrameHeader, MessageId};
use chrono::Utc;
use futures_util_compat::bounded_for_each;
use report_transmit::ReportType;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info, warn};

mod futures_util_compat {
    use std::future::Future;

    /// Runs `f` over `items` with at most `limit` in flight, matching the
    /// pollers' "bounded concurrency gate" requirement without pulling in a
    /// stream-combinator dependency for a single call site.
    pub async fn bounded_for_each<T, Fut, F>(items: Vec<T>, limit: usize, f: F)
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let f = std::sync::Arc::new(f);
        let semaphore = std::sync::Arc::new(tokio::sync::Semaphore::new(limit));
        let mut handles = Vec::new();
        for item in items {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
            let f = f.clone();
            handles.push(tokio::spawn(async move {
                f(item).await;
                drop(permit);
            }));
        }
        for h in handles {
            let _ = h.await;
        }
    }
}

pub async fn run_poller(config: Arc<Config>, pool: PgPool, session: SessionHandle, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(config.poll_period);
    loop {
        tokio::select! {
            _ = shutdown.changed() => { if *shutdown.borrow() { return; } }
            _ = ticker.tick() => {
                tick(&config, &pool, &session).await;
            }
        }
    }
}

async fn tick(config: &Arc<Config>, pool: &PgPool, session: &SessionHandle) {
    if !session.is_active().await {
        return;
    }
    let rows = match report_transmit::fetch_due(pool, config.t_xmit.as_secs() as i64, config.poll_batch_size).await {
        Ok(rows) => rows,
        Err(e) => {
            error!(error = %e, "failed to fetch due report_transmit_log rows");
            return;
        }
    };
    if rows.is_empty() {
        return;
    }

    let config = config.clone();
    let pool = pool.clone();
    let session = session.clone();
    let limit = config.poll_concurrency;
    bounded_for_each(rows, limit, move |row| {
        let config = config.clone();
        let pool = pool.clone();
        let session = session.clone();
        async move { send_one(&config, &pool, &session, row).await }
    })
    .await;
}

async fn send_one(config: &Arc<Config>, pool: &PgPool, session: &SessionHandle, row: report_transmit::ReportTransmitRow) {
    if row.retry_count as u32 > config.max_retries {
        let _ = report_transmit::mark_failed(pool, row.id, "MAX_RETRIES exceeded").await;
        return;
    }

    let report_sequence = match report_transmit::bump_for_attempt(pool, row.id).await {
        Ok(seq) => seq,
        Err(e) => {
            error!(error = %e, log_id = row.id, "failed to bump retry_count/report_sequence");
            return;
        }
    };

    let Some(report_type) = ReportType::from_str(&row.r#type) else {
        let _ = report_transmit::mark_failed(pool, row.id, "unknown report type").await;
        return;
    };

    let (alert, message_id) = match build_alert(config, pool, report_type, &row.outbound_id, &row.raw_message).await {
        Ok(pair) => pair,
        Err(reason) => {
            let _ = report_transmit::mark_failed(pool, row.id, &reason).await;
            return;
        }
    };

    let envelope = Envelope {
        trans_msg_id: Some(row.outbound_id.clone()),
        trans_msg_seq: Some(report_sequence as u32),
        cap_info: Some(CapInfo { alert }),
        ..Default::default()
    };
    let body = build_envelope(&envelope).into_bytes();
    let frame = SendFrame {
        header: FrameHeader {
            message_id: message_id.as_u32(),
            data_format: cas_wire::message_id::DATA_FORMAT_XML,
            magic_number: config.cas_magic_number,
            data_length: body.len() as u32,
        },
        body,
    };

    if !session.send(frame).await {
        warn!(log_id = row.id, "session not ACTIVE, report send skipped this tick");
        return;
    }

    if let Err(e) = report_transmit::mark_sent(pool, row.id).await {
        error!(error = %e, log_id = row.id, "failed to mark report_transmit_log SENT");
        return;
    }

    let log_id = row.id;
    let pool = pool.clone();
    let t_xmit = config.t_xmit;
    tokio::spawn(async move {
        tokio::time::sleep(t_xmit).await;
        if let Ok(Some(current)) = report_transmit::find_by_outbound_and_sequence(&pool, &row.outbound_id, report_sequence).await {
            if current.status == "SENT" {
                let _ = report_transmit::mark_pending_with_note(&pool, log_id, "ACK Timeout").await;
            }
        }
    });
}

async fn build_alert(
    config: &Config,
    pool: &PgPool,
    report_type: ReportType,
    outbound_id: &str,
    raw_message: &str,
) -> Result<(Alert, MessageId), String> {
    let now = Utc::now().to_rfc3339();
    match report_type {
        ReportType::DeviceInfo => Ok((
            Alert {
                identifier: outbound_id.to_owned(),
                sender: config.central_system_id.clone(),
                sent: now,
                status: STATUS_ACTUAL.to_owned(),
                msg_type: MSG_TYPE_ALERT.to_owned(),
                scope: SCOPE_PRIVATE.to_owned(),
                code: cas_wire::cap::GOV_CODE.to_owned(),
                note: None,
                references: None,
                info: AlertInfo {
                    event: "단말장치 제원정보".to_owned(),
                    event_code: "DIS".to_owned(),
                    parameter_value_name: Some("DEVICE_DATA".to_owned()),
                    parameter_value: Some(raw_message.to_owned()),
                },
            },
            MessageId::EtsNfyDeviceInfo,
        )),
        ReportType::DeviceStatus => Ok((
            Alert {
                identifier: outbound_id.to_owned(),
                sender: config.central_system_id.clone(),
                sent: now,
                status: STATUS_ACTUAL.to_owned(),
                msg_type: MSG_TYPE_ALERT.to_owned(),
                scope: SCOPE_PRIVATE.to_owned(),
                code: cas_wire::cap::GOV_CODE.to_owned(),
                note: None,
                references: None,
                info: AlertInfo {
                    event: "단말장치 상태정보".to_owned(),
                    event_code: "DIS".to_owned(),
                    parameter_value_name: Some("DEVICE_STATUS".to_owned()),
                    parameter_value: Some(raw_message.to_owned()),
                },
            },
            MessageId::EtsNfyDeviceSts,
        )),
        ReportType::DisasterResult => {
            let identifier = outbound_id
                .strip_suffix("_RPT_1")
                .ok_or_else(|| "outbound_id missing _RPT_1 suffix".to_owned())?;
            let original = disaster_publish::find_by_identifier(pool, identifier)
                .await
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("original disaster_publish_log for {identifier} not found"))?;
            let original_envelope = parse_envelope(original.raw_message.as_bytes()).map_err(|e| e.to_string())?;
            let original_alert = original_envelope
                .cap_info
                .ok_or_else(|| "original alert missing capInfo".to_owned())?
                .alert;

            Ok((
                Alert {
                    identifier: outbound_id.to_owned(),
                    sender: config.central_system_id.clone(),
                    sent: now,
                    status: STATUS_ACTUAL.to_owned(),
                    msg_type: MSG_TYPE_ACK.to_owned(),
                    scope: SCOPE_PRIVATE.to_owned(),
                    code: cas_wire::cap::GOV_CODE.to_owned(),
                    note: None,
                    references: Some(original_alert.reference_triple()),
                    info: AlertInfo {
                        event: "결과 보고".to_owned(),
                        event_code: "DIM".to_owned(),
                        parameter_value_name: Some("LASReport".to_owned()),
                        parameter_value: Some(raw_message.to_owned()),
                    },
                },
                MessageId::EtsResDisReport,
            ))
        }
    }
}

/// Handles `ETS_CNF_DEVICE_INFO / ETS_CNF_DEVICE_STS / ETS_RES_DIS_REPORT`
/// correlated by `(outbound_id, report_sequence)`.
pub async fn handle_report_ack(pool: &PgPool, envelope: Envelope) {
    let (Some(outbound_id), Some(report_sequence)) = (envelope.trans_msg_id, envelope.trans_msg_seq) else {
        warn!("report ack missing transMsgId/transMsgSeq, cannot correlate");
        return;
    };

    let row = match report_transmit::find_by_outbound_and_sequence(pool, &outbound_id, report_sequence as i32).await {
        Ok(Some(row)) => row,
        Ok(None) => {
            warn!(outbound_id, report_sequence, "report ack for unknown (outbound_id, report_sequence)");
            return;
        }
        Err(e) => {
            error!(error = %e, "failed to look up report_transmit_log for ack");
            return;
        }
    };

    match envelope.result_code.as_deref() {
        Some("200") => {
            if let Err(e) = report_transmit::mark_success(pool, row.id).await {
                error!(error = %e, log_id = row.id, "failed to mark report_transmit_log SUCCESS");
            } else {
                info!(log_id = row.id, "report acknowledged by CAS");
            }
        }
        other => {
            let note = format!("CAS resultCode {}", other.unwrap_or("unknown"));
            if let Err(e) = report_transmit::mark_pending_with_note(pool, row.id, &note).await {
                error!(error = %e, log_id = row.id, "failed to downgrade report_transmit_log to PENDING");
            }
        }
    }
}
