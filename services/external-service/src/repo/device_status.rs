use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};

pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    device_row_id: i64,
    status: &str,
    reported_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query!(
        "INSERT INTO device_status_log (device_id, status, reported_at) VALUES ($1, $2, $3)",
        device_row_id,
        status,
        reported_at
    )
    .execute(&mut **tx)
    .await?;
    Ok(())
}
