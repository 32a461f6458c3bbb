use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportType {
    DeviceInfo,
    DeviceStatus,
    DisasterResult,
}

impl ReportType {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportType::DeviceInfo => "DEVICE_INFO",
            ReportType::DeviceStatus => "DEVICE_STATUS",
            ReportType::DisasterResult => "DISASTER_RESULT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "DEVICE_INFO" => Some(ReportType::DeviceInfo),
            "DEVICE_STATUS" => Some(ReportType::DeviceStatus),
            "DISASTER_RESULT" => Some(ReportType::DisasterResult),
            _ => None,
        }
    }
}

pub struct ReportTransmitRow {
    pub id: i64,
    pub r#type: String,
    pub outbound_id: String,
    pub external_system_name: String,
    pub raw_message: String,
    pub status: String,
    pub retry_count: i32,
    pub report_sequence: i32,
    pub updated_at: DateTime<Utc>,
}

pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    mq_receive_log_id: i64,
    report_type: ReportType,
    outbound_id: &str,
    external_system_name: &str,
    raw_message: &str,
) -> Result<i64, sqlx::Error> {
    let row = sqlx::query!(
        r#"INSERT INTO report_transmit_log
               (mq_receive_log_id, type, outbound_id, external_system_name, raw_message, status, report_sequence)
           VALUES ($1, $2, $3, $4, $5, 'PENDING', 1)
           RETURNING id"#,
        mq_receive_log_id,
        report_type.as_str(),
        outbound_id,
        external_system_name,
        raw_message
    )
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.id)
}

/// PENDING rows, and SENT rows stuck past `t_xmit` (treated as re-drive
/// candidates), oldest first.
pub async fn fetch_due(
    pool: &PgPool,
    t_xmit_seconds: i64,
    limit: i64,
) -> Result<Vec<ReportTransmitRow>, sqlx::Error> {
    let rows = sqlx::query_as!(
        ReportTransmitRow,
        r#"SELECT id, type, outbound_id, external_system_name, raw_message, status,
                  retry_count, report_sequence, updated_at
           FROM report_transmit_log
           WHERE status = 'PENDING'
              OR (status = 'SENT' AND updated_at < now() - make_interval(secs => $1))
           ORDER BY created_at ASC
           LIMIT $2"#,
        t_xmit_seconds as f64,
        limit
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Bumps `retry_count` and `report_sequence` together before every (re)attempt,
/// including the first, so `report_sequence` always reflects which attempt
/// CAS is being asked to correlate.
pub async fn bump_for_attempt(pool: &PgPool, id: i64) -> Result<i32, sqlx::Error> {
    let row = sqlx::query!(
        r#"UPDATE report_transmit_log
           SET retry_count = retry_count + 1, report_sequence = report_sequence + 1
           WHERE id = $1 RETURNING report_sequence"#,
        id
    )
    .fetch_one(pool)
    .await?;
    Ok(row.report_sequence)
}

pub async fn mark_sent(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query!(
        "UPDATE report_transmit_log SET status = 'SENT', updated_at = now() WHERE id = $1",
        id
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_success(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query!(
        "UPDATE report_transmit_log SET status = 'SUCCESS', updated_at = now() WHERE id = $1",
        id
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_failed(pool: &PgPool, id: i64, error_detail: &str) -> Result<(), sqlx::Error> {
    sqlx::query!(
        "UPDATE report_transmit_log SET status = 'FAILED', error_detail = $2, updated_at = now() WHERE id = $1",
        id,
        error_detail
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Returns to PENDING for the next poll tick (ack timeout, non-200 ack,
/// retry exhaustion checked by the caller).
pub async fn mark_pending_with_note(pool: &PgPool, id: i64, note: &str) -> Result<(), sqlx::Error> {
    sqlx::query!(
        "UPDATE report_transmit_log SET status = 'PENDING', error_detail = $2, updated_at = now() WHERE id = $1",
        id,
        note
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn find_by_outbound_and_sequence(
    pool: &PgPool,
    outbound_id: &str,
    report_sequence: i32,
) -> Result<Option<ReportTransmitRow>, sqlx::Error> {
    let row = sqlx::query_as!(
        ReportTransmitRow,
        r#"SELECT id, type, outbound_id, external_system_name, raw_message, status,
                  retry_count, report_sequence, updated_at
           FROM report_transmit_log WHERE outbound_id = $1 AND report_sequence = $2"#,
        outbound_id,
        report_sequence
    )
    .fetch_optional(pool)
    .await?;
    Ok(row)
}
