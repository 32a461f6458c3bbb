use sqlx::PgPool;

pub struct ExternalSystemRow {
    pub id: i64,
    pub system_name: String,
    pub subscribed_event_codes: Vec<String>,
}

/// Looks up an active system by `(system_name, api_key)` — the HTTP and WS
/// auth check share this one query.
pub async fn authenticate(pool: &PgPool, system_name: &str, api_key: &str) -> Result<Option<ExternalSystemRow>, sqlx::Error> {
    let row = sqlx::query_as!(
        ExternalSystemRow,
        r#"SELECT id, system_name, subscribed_event_codes
           FROM external_system
           WHERE system_name = $1 AND api_key = $2 AND is_active"#,
        system_name,
        api_key
    )
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// All active systems subscribed to `event_code`, for disaster fan-out.
pub async fn find_subscribers(pool: &PgPool, event_code: &str) -> Result<Vec<ExternalSystemRow>, sqlx::Error> {
    let rows = sqlx::query_as!(
        ExternalSystemRow,
        r#"SELECT id, system_name, subscribed_event_codes
           FROM external_system
           WHERE is_active AND $1 = ANY(subscribed_event_codes)"#,
        event_code
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
