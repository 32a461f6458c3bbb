use sqlx::{Postgres, Transaction};

/// Inserts the outbox row that will be fanned out to the broker.
/// `ON CONFLICT(identifier) DO NOTHING` collapses duplicate alerts that
/// passed the `tcp_receive_log` dedup check (same identifier, different
/// `transMsgId`) — the idempotency key for the whole fan-out is the alert
/// identifier, not the wire message id.
///
/// Returns `true` if a new row was actually inserted.
pub async fn insert_if_new(
    tx: &mut Transaction<'_, Postgres>,
    tcp_receive_log_id: i64,
    routing_key: &str,
    identifier: &str,
    event_code: &str,
    raw_message: &str,
) -> Result<bool, sqlx::Error> {
    let row = sqlx::query!(
        r#"INSERT INTO disaster_publish_log
               (tcp_receive_log_id, routing_key, identifier, event_code, raw_message, status)
           VALUES ($1, $2, $3, $4, $5, 'PENDING')
           ON CONFLICT (identifier) DO NOTHING
           RETURNING id"#,
        tcp_receive_log_id,
        routing_key,
        identifier,
        event_code,
        raw_message
    )
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.is_some())
}

pub struct DisasterPublishRow {
    pub id: i64,
    pub identifier: String,
    pub raw_message: String,
}

pub async fn find_by_identifier(
    pool: &sqlx::PgPool,
    identifier: &str,
) -> Result<Option<DisasterPublishRow>, sqlx::Error> {
    let row = sqlx::query_as!(
        DisasterPublishRow,
        "SELECT id, identifier, raw_message FROM disaster_publish_log WHERE identifier = $1",
        identifier
    )
    .fetch_optional(pool)
    .await?;
    Ok(row)
}
