use serde::Deserialize;
use sqlx::{Postgres, Transaction};

#[derive(Debug, Deserialize)]
pub struct DeviceInfoPayload {
    pub device_id: String,
    #[serde(rename = "type")]
    pub device_type: Option<String>,
    pub name: Option<String>,
    pub server_ip: Option<String>,
    pub server_name: Option<String>,
    pub model: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub address: Option<String>,
    pub note: Option<String>,
}

/// `(external_system_id, device_id)` upsert, per the device entity invariant.
pub async fn upsert(
    tx: &mut Transaction<'_, Postgres>,
    external_system_id: i64,
    payload: &DeviceInfoPayload,
) -> Result<i64, sqlx::Error> {
    let row = sqlx::query!(
        r#"INSERT INTO device
               (external_system_id, device_id, type, name, server_ip, server_name, model, lat, lon, address, note)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
           ON CONFLICT (external_system_id, device_id) DO UPDATE SET
               type = EXCLUDED.type,
               name = EXCLUDED.name,
               server_ip = EXCLUDED.server_ip,
               server_name = EXCLUDED.server_name,
               model = EXCLUDED.model,
               lat = EXCLUDED.lat,
               lon = EXCLUDED.lon,
               address = EXCLUDED.address,
               note = EXCLUDED.note,
               updated_at = now()
           RETURNING id"#,
        external_system_id,
        payload.device_id,
        payload.device_type,
        payload.name,
        payload.server_ip,
        payload.server_name,
        payload.model,
        payload.lat,
        payload.lon,
        payload.address,
        payload.note,
    )
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.id)
}

pub async fn find_device_row_id(
    tx: &mut Transaction<'_, Postgres>,
    external_system_id: i64,
    device_id: &str,
) -> Result<Option<i64>, sqlx::Error> {
    let row = sqlx::query!(
        "SELECT id FROM device WHERE external_system_id = $1 AND device_id = $2",
        external_system_id,
        device_id
    )
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.map(|r| r.id))
}
