//! Inbound disaster-alert pipeline: `ETS_NFY_DIS_INFO` -> CAP validation ->
//! `disaster_publish_log` -> typed `ETS_CNF_DIS_INFO` ack/NACK.

use crate::config::Config;
use crate::error::DisasterIngestError;
use crate::repo::{disaster_publish, tcp_receive};
use crate::session::{SendFrame, SessionHandle};
use cas_wire::cap::{MSG_TYPE_ACK, SCOPE_PRIVATE, STATUS_ACTUAL};
use cas_wire::{build_envelope, is_valid_event_code, Alert, AlertInfo, CapInfo, Envelope, FrameHeader, MessageId};
use chrono::Utc;
use sqlx::PgPool;
use tracing::{info, warn};

pub async fn handle_disaster_notify(
    config: &Config,
    pool: &PgPool,
    session: &SessionHandle,
    header: FrameHeader,
    envelope: Envelope,
) {
    let trans_msg_id = envelope.trans_msg_id.clone();
    let trans_msg_seq = envelope.trans_msg_seq;

    let outcome = process(pool, envelope).await;

    let (result_code, result, note_code, note_message) = match &outcome {
        Ok(_) => ("200".to_owned(), "OK".to_owned(), "000".to_owned(), "OK".to_owned()),
        Err(e) => (
            e.result_code().to_owned(),
            "FAIL".to_owned(),
            e.note_code().to_owned(),
            e.note_message(),
        ),
    };

    let ack_cap = outcome.as_ref().ok().map(|(_, alert)| alert.clone());
    let ack_alert = build_ack_alert(config, ack_cap.as_ref(), &note_code, &note_message);

    let reply = Envelope {
        trans_msg_id,
        trans_msg_seq,
        result_code: Some(result_code),
        result: Some(result),
        cap_info: Some(CapInfo { alert: ack_alert }),
        ..Default::default()
    };

    let body = build_envelope(&reply).into_bytes();
    let frame = SendFrame {
        header: FrameHeader {
            message_id: MessageId::EtsCnfDisInfo.as_u32(),
            data_format: cas_wire::message_id::DATA_FORMAT_XML,
            magic_number: config.cas_magic_number,
            data_length: body.len() as u32,
        },
        body,
    };
    if !session.send(frame).await {
        warn!("session not ACTIVE while sending ETS_CNF_DIS_INFO reply");
    }

    match &outcome {
        Ok((identifier, _)) => info!(identifier, message_id = header.message_id, "disaster alert acknowledged"),
        Err(e) => warn!(error = %e, message_id = header.message_id, "disaster alert rejected"),
    }
}

/// Dedups by `(transMsgId, transMsgSeq)`, validates required CAP fields and
/// the event-code allowlist, then writes the outbox row. Returns the alert's
/// identifier plus its typed [`Alert`] on success (for ack-cap construction),
/// or the classified failure.
async fn process(pool: &PgPool, envelope: Envelope) -> Result<(String, Alert), DisasterIngestError> {
    let trans_msg_id = envelope
        .trans_msg_id
        .clone()
        .ok_or_else(|| DisasterIngestError::Parsing("missing transMsgId".to_owned()))?;
    let trans_msg_seq = envelope
        .trans_msg_seq
        .ok_or_else(|| DisasterIngestError::Parsing("missing transMsgSeq".to_owned()))? as i64;
    let alert = envelope
        .cap_info
        .map(|c| c.alert)
        .ok_or_else(|| DisasterIngestError::Parsing("missing capInfo.alert".to_owned()))?;

    if tcp_receive::exists(pool, &trans_msg_id, trans_msg_seq).await? {
        return Err(DisasterIngestError::Duplicate {
            inbound_id: trans_msg_id,
            inbound_seq: trans_msg_seq,
        });
    }

    let raw_message = cas_wire::build_envelope(&Envelope {
        trans_msg_id: Some(trans_msg_id.clone()),
        trans_msg_seq: Some(trans_msg_seq as u32),
        cap_info: Some(CapInfo { alert: alert.clone() }),
        ..Default::default()
    });

    let mut tx = pool.begin().await.map_err(DisasterIngestError::Storage)?;
    let tcp_log_id = tcp_receive::insert_pending(&mut tx, &trans_msg_id, trans_msg_seq, &raw_message).await?;

    if alert.identifier.is_empty() || alert.sender.is_empty() || alert.sent.is_empty() || alert.info.event_code.is_empty() {
        tx.rollback().await.ok();
        tcp_receive::mark_failed_best_effort(pool, tcp_log_id, "missing required CAP fields").await;
        return Err(DisasterIngestError::Validation(
            "alert.identifier/sender/sent/info.eventCode.value are all required".to_owned(),
        ));
    }

    if !is_valid_event_code(&alert.info.event_code) {
        tx.rollback().await.ok();
        tcp_receive::mark_failed_best_effort(pool, tcp_log_id, "event code not in allowlist").await;
        return Err(DisasterIngestError::Profile(alert.info.event_code.clone()));
    }

    let routing_key = format!("disaster.{}", alert.info.event_code);
    disaster_publish::insert_if_new(&mut tx, tcp_log_id, &routing_key, &alert.identifier, &alert.info.event_code, &raw_message)
        .await?;

    tcp_receive::mark_success(&mut tx, tcp_log_id).await?;
    tx.commit().await.map_err(DisasterIngestError::Storage)?;

    Ok((alert.identifier.clone(), alert))
}

/// Builds the `ETS_CNF_DIS_INFO` NACK envelope for failures that happen
/// before a parsed [`Envelope`] exists at all (XML parse failure on the
/// framed body) — `transMsgId`/`transMsgSeq` are unknown, but the session
/// stays up and CAS still gets a typed NACK.
pub fn build_parse_failure_nack(config: &Config, err: &DisasterIngestError) -> Envelope {
    let ack_alert = build_ack_alert(config, None, err.note_code(), &err.note_message());
    Envelope {
        result_code: Some(err.result_code().to_owned()),
        result: Some("FAIL".to_owned()),
        cap_info: Some(CapInfo { alert: ack_alert }),
        ..Default::default()
    }
}

fn build_ack_alert(config: &Config, original: Option<&Alert>, note_code: &str, note_message: &str) -> Alert {
    let now = Utc::now().to_rfc3339();
    let (identifier, references) = match original {
        Some(a) => (format!("{}_ACK", a.identifier), Some(a.reference_triple())),
        None => (format!("UNKNOWN_{}_ACK", now), None),
    };

    Alert {
        identifier,
        sender: config.central_system_id.clone(),
        sent: now,
        status: STATUS_ACTUAL.to_owned(),
        msg_type: MSG_TYPE_ACK.to_owned(),
        scope: SCOPE_PRIVATE.to_owned(),
        code: cas_wire::cap::GOV_CODE.to_owned(),
        note: Some(format!("{note_code}|{note_message}")),
        references,
        info: AlertInfo {
            event: "결과 보고".to_owned(),
            event_code: "ACK".to_owned(),
            parameter_value_name: None,
            parameter_value: None,
        },
    }
}
