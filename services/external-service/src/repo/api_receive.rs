use sqlx::{Postgres, Transaction};

/// Append-only ingress audit row; one per HTTP call regardless of outcome.
pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    external_system_id: i64,
    request_path: &str,
    request_body: &str,
) -> Result<i64, sqlx::Error> {
    let row = sqlx::query!(
        "INSERT INTO api_receive_log (external_system_id, request_path, request_body) VALUES ($1, $2, $3) RETURNING id",
        external_system_id,
        request_path,
        request_body
    )
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.id)
}
