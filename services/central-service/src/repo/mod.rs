pub mod disaster_publish;
pub mod mq_receive;
pub mod report_transmit;
pub mod tcp_receive;

use sqlx::PgPool;

pub async fn log_connection_event(pool: &PgPool, event: &str, detail: Option<&str>) {
    let result = sqlx::query!(
        "INSERT INTO connection_log (event, detail) VALUES ($1, $2)",
        event,
        detail
    )
    .execute(pool)
    .await;
    if let Err(e) = result {
        tracing::error!(error = %e, "failed to write connection_log");
    }
}
