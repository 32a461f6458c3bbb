use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

pub struct DisasterTransmitRow {
    pub id: i64,
    pub external_system_id: i64,
    pub identifier: String,
    pub raw_message: String,
    pub status: String,
    pub retry_count: i32,
    pub updated_at: DateTime<Utc>,
}

/// One row per `(external_system_id, identifier)`, `ON CONFLICT DO NOTHING`
/// for idempotency under broker redelivery.
pub async fn insert_if_new(
    tx: &mut Transaction<'_, Postgres>,
    mq_receive_log_id: i64,
    external_system_id: i64,
    identifier: &str,
    raw_message: &str,
) -> Result<bool, sqlx::Error> {
    let row = sqlx::query!(
        r#"INSERT INTO disaster_transmit_log (mq_receive_log_id, external_system_id, identifier, raw_message, status)
           VALUES ($1, $2, $3, $4, 'PENDING')
           ON CONFLICT (external_system_id, identifier) DO NOTHING
           RETURNING id"#,
        mq_receive_log_id,
        external_system_id,
        identifier,
        raw_message
    )
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.is_some())
}

/// Whether `identifier` was ever targeted at this subscriber — the
/// `isExistingIdentifier` validator for `DISASTER_RESULT` ingress.
pub async fn exists_for_system(pool: &PgPool, external_system_id: i64, identifier: &str) -> Result<bool, sqlx::Error> {
    let row = sqlx::query!(
        "SELECT 1 AS present FROM disaster_transmit_log WHERE external_system_id = $1 AND identifier = $2",
        external_system_id,
        identifier
    )
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

pub async fn fetch_due(pool: &PgPool, t_xmit_seconds: i64, limit: i64) -> Result<Vec<DisasterTransmitRow>, sqlx::Error> {
    let rows = sqlx::query_as!(
        DisasterTransmitRow,
        r#"SELECT id, external_system_id, identifier, raw_message, status, retry_count, updated_at
           FROM disaster_transmit_log
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

pub async fn mark_sent(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query!("UPDATE disaster_transmit_log SET status = 'SENT', updated_at = now() WHERE id = $1", id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_success(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query!("UPDATE disaster_transmit_log SET status = 'SUCCESS', updated_at = now() WHERE id = $1", id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_failed(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query!("UPDATE disaster_transmit_log SET status = 'FAILED', updated_at = now() WHERE id = $1", id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_pending(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query!("UPDATE disaster_transmit_log SET status = 'PENDING', updated_at = now() WHERE id = $1", id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn find(pool: &PgPool, id: i64) -> Result<Option<DisasterTransmitRow>, sqlx::Error> {
    let row = sqlx::query_as!(
        DisasterTransmitRow,
        r#"SELECT id, external_system_id, identifier, raw_message, status, retry_count, updated_at
           FROM disaster_transmit_log WHERE id = $1"#,
        id
    )
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Bumps `retry_count`; returns `true` if the row should become terminal
/// `FAILED` (new count exceeds `max_retries`).
pub async fn bump_retry(pool: &PgPool, id: i64, max_retries: u32) -> Result<bool, sqlx::Error> {
    let row = sqlx::query!(
        "UPDATE disaster_transmit_log SET retry_count = retry_count + 1, updated_at = now() WHERE id = $1 RETURNING retry_count",
        id
    )
    .fetch_one(pool)
    .await?;
    Ok(row.retry_count as u32 > max_retries)
}

/// Listing for the outbox admin endpoint, most recently updated first.
pub async fn list_by_status(pool: &PgPool, status: &str, limit: i64) -> Result<Vec<DisasterTransmitRow>, sqlx::Error> {
    let rows = sqlx::query_as!(
        DisasterTransmitRow,
        r#"SELECT id, external_system_id, identifier, raw_message, status, retry_count, updated_at
           FROM disaster_transmit_log
           WHERE status = $1
           ORDER BY updated_at DESC
           LIMIT $2"#,
        status,
        limit
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
