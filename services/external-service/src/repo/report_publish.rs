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
}

pub struct ReportPublishRow {
    pub id: i64,
    pub r#type: String,
    pub external_system_name: String,
    pub routing_key: String,
    pub raw_message: String,
    pub retry_count: i32,
}

pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    report_type: ReportType,
    external_system_name: &str,
    api_receive_log_id: i64,
    raw_message: &str,
) -> Result<i64, sqlx::Error> {
    let row = sqlx::query!(
        r#"INSERT INTO report_publish_log
               (type, external_system_name, api_receive_log_id, routing_key, raw_message, status)
           VALUES ($1, $2, $3, 'report.external', $4, 'PENDING')
           RETURNING id"#,
        report_type.as_str(),
        external_system_name,
        api_receive_log_id,
        raw_message
    )
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.id)
}

pub async fn fetch_due(pool: &PgPool, limit: i64) -> Result<Vec<ReportPublishRow>, sqlx::Error> {
    let rows = sqlx::query_as!(
        ReportPublishRow,
        r#"SELECT id, type, external_system_name, routing_key, raw_message, retry_count
           FROM report_publish_log
           WHERE status = 'PENDING'
           ORDER BY created_at ASC
           LIMIT $1"#,
        limit
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn mark_success(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query!("UPDATE report_publish_log SET status = 'SUCCESS', updated_at = now() WHERE id = $1", id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_failed(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query!(
        "UPDATE report_publish_log SET status = 'FAILED', retry_count = retry_count + 1, updated_at = now() WHERE id = $1",
        id
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn bump_retry(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query!("UPDATE report_publish_log SET retry_count = retry_count + 1, updated_at = now() WHERE id = $1", id)
        .execute(pool)
        .await?;
    Ok(())
}

pub struct ReportPublishListRow {
    pub id: i64,
    pub r#type: String,
    pub external_system_name: String,
    pub status: String,
    pub retry_count: i32,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Listing for the outbox admin endpoint, most recently updated first.
pub async fn list_by_status(pool: &PgPool, status: &str, limit: i64) -> Result<Vec<ReportPublishListRow>, sqlx::Error> {
    let rows = sqlx::query_as!(
        ReportPublishListRow,
        r#"SELECT id, type, external_system_name, status, retry_count, updated_at
           FROM report_publish_log
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
