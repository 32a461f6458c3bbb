pub mod api_receive;
pub mod device;
pub mod device_status;
pub mod disaster_transmit;
pub mod external_system;
pub mod mq_receive;
pub mod report_publish;

use sqlx::PgPool;

pub async fn log_connection_event(pool: &PgPool, event: &str, detail: Option<&str>) {
    let result = sqlx::query!("INSERT INTO connection_log (event, detail) VALUES ($1, $2)", event, detail)
        .execute(pool)
        .await;
    if let Err(e) = result {
        tracing::error!(error = %e, "failed to write connection_log");
    }
}
