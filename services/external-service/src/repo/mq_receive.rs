use sqlx::{PgPool, Postgres, Transaction};

pub async fn insert_pending(pool: &PgPool, raw_message: &str) -> Result<i64, sqlx::Error> {
    let row = sqlx::query!(
        "INSERT INTO mq_receive_log (raw_message, status) VALUES ($1, 'PENDING') RETURNING id",
        raw_message
    )
    .fetch_one(pool)
    .await?;
    Ok(row.id)
}

pub async fn insert_pending_tx(tx: &mut Transaction<'_, Postgres>, raw_message: &str) -> Result<i64, sqlx::Error> {
    let row = sqlx::query!(
        "INSERT INTO mq_receive_log (raw_message, status) VALUES ($1, 'PENDING') RETURNING id",
        raw_message
    )
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.id)
}

pub async fn mark_success(tx: &mut Transaction<'_, Postgres>, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query!("UPDATE mq_receive_log SET status = 'SUCCESS', updated_at = now() WHERE id = $1", id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Marks the already-committed inbox row SUCCESS once the processing
/// transaction it fed has itself committed.
pub async fn mark_success_pool(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query!("UPDATE mq_receive_log SET status = 'SUCCESS', updated_at = now() WHERE id = $1", id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_failed(pool: &sqlx::PgPool, id: i64, error_message: &str) {
    let result = sqlx::query!(
        "UPDATE mq_receive_log SET status = 'FAILED', error_message = $2, updated_at = now() WHERE id = $1",
        id,
        error_message
    )
    .execute(pool)
    .await;
    if let Err(e) = result {
        tracing::error!(error = %e, mq_receive_log_id = id, "failed to mark mq_receive_log FAILED");
    }
}
