use sqlx::{PgPool, Postgres, Transaction};

pub struct TcpReceiveRow {
    pub id: i64,
    pub status: String,
}

pub async fn exists(pool: &PgPool, inbound_id: &str, inbound_seq: i64) -> Result<bool, sqlx::Error> {
    let row = sqlx::query!(
        "SELECT id FROM tcp_receive_log WHERE inbound_id = $1 AND inbound_seq = $2",
        inbound_id,
        inbound_seq
    )
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

pub async fn insert_pending(
    tx: &mut Transaction<'_, Postgres>,
    inbound_id: &str,
    inbound_seq: i64,
    raw_message: &str,
) -> Result<i64, sqlx::Error> {
    let row = sqlx::query!(
        r#"INSERT INTO tcp_receive_log (inbound_id, inbound_seq, raw_message, status)
           VALUES ($1, $2, $3, 'PENDING') RETURNING id"#,
        inbound_id,
        inbound_seq,
        raw_message
    )
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.id)
}

pub async fn mark_success(tx: &mut Transaction<'_, Postgres>, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query!(
        "UPDATE tcp_receive_log SET status = 'SUCCESS', updated_at = now() WHERE id = $1",
        id
    )
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Best-effort mark as failed on its own connection — called after the main
/// transaction has already been rolled back.
pub async fn mark_failed_best_effort(pool: &PgPool, id: i64, error_message: &str) {
    let result = sqlx::query!(
        "UPDATE tcp_receive_log SET status = 'FAILED', error_message = $2, updated_at = now() WHERE id = $1",
        id,
        error_message
    )
    .execute(pool)
    .await;
    if let Err(e) = result {
        tracing::error!(error = %e, tcp_receive_log_id = id, "failed to mark tcp_receive_log FAILED");
    }
}
