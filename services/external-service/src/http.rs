//! HTTP report ingress: three endpoints, each authenticated by
//! `x-system-name` / `x-api-key` and validated before touching the DB.

use crate::error::{FieldError, ReportIngestError};
use crate::repo::{api_receive, device, device_status, disaster_transmit, external_system, report_publish};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

pub fn router(pool: PgPool) -> Router {
    Router::new()
        .route("/api/reports/device-info", post(device_info))
        .route("/api/reports/device-status", post(device_status_report))
        .route("/api/reports/disaster-result", post(disaster_result))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/v1/admin/outbox/disaster/:status", get(admin_list_disaster_transmit))
        .route("/api/v1/admin/outbox/report/:status", get(admin_list_report_publish))
        .with_state(pool)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Readiness reflects DB reachability only; broker/CAS connectivity is
/// reported through `tracing`, not this endpoint.
async fn readyz(State(pool): State<PgPool>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").execute(&pool).await {
        Ok(_) => (StatusCode::OK, "ready"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "database unreachable"),
    }
}

const ADMIN_LIST_LIMIT: i64 = 200;

async fn admin_list_disaster_transmit(State(pool): State<PgPool>, Path(status): Path<String>) -> impl IntoResponse {
    match disaster_transmit::list_by_status(&pool, &status, ADMIN_LIST_LIMIT).await {
        Ok(rows) => {
            let items: Vec<serde_json::Value> = rows
                .into_iter()
                .map(|r| {
                    serde_json::json!({
                        "id": r.id,
                        "external_system_id": r.external_system_id,
                        "identifier": r.identifier,
                        "status": r.status,
                        "retry_count": r.retry_count,
                        "updated_at": r.updated_at.to_rfc3339(),
                    })
                })
                .collect();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => ReportIngestError::Storage(e).into_response(),
    }
}

async fn admin_list_report_publish(State(pool): State<PgPool>, Path(status): Path<String>) -> impl IntoResponse {
    match report_publish::list_by_status(&pool, &status, ADMIN_LIST_LIMIT).await {
        Ok(rows) => {
            let items: Vec<serde_json::Value> = rows
                .into_iter()
                .map(|r| {
                    serde_json::json!({
                        "id": r.id,
                        "type": r.r#type,
                        "external_system_name": r.external_system_name,
                        "status": r.status,
                        "retry_count": r.retry_count,
                        "updated_at": r.updated_at.to_rfc3339(),
                    })
                })
                .collect();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => ReportIngestError::Storage(e).into_response(),
    }
}

#[derive(Debug, Serialize)]
struct OkBody {
    message: String,
}

async fn authenticate(pool: &PgPool, headers: &HeaderMap) -> Result<external_system::ExternalSystemRow, ReportIngestError> {
    let system_name = headers.get("x-system-name").and_then(|v| v.to_str().ok()).unwrap_or("");
    let api_key = headers.get("x-api-key").and_then(|v| v.to_str().ok()).unwrap_or("");
    if system_name.is_empty() || api_key.is_empty() {
        return Err(ReportIngestError::Authentication);
    }
    external_system::authenticate(pool, system_name, api_key)
        .await?
        .ok_or(ReportIngestError::Authentication)
}

#[derive(Debug, Deserialize)]
struct DeviceInfoRequest {
    devices: Vec<device::DeviceInfoPayload>,
}

async fn device_info(
    State(pool): State<PgPool>,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse, ReportIngestError> {
    let system = authenticate(&pool, &headers).await?;
    let request: DeviceInfoRequest = serde_json::from_str(&body)
        .map_err(|e| ReportIngestError::Validation(vec![FieldError::new("body", e.to_string())]))?;

    let mut errors = Vec::new();
    if request.devices.is_empty() {
        errors.push(FieldError::new("devices", "at least one device is required"));
    }
    for (i, d) in request.devices.iter().enumerate() {
        if d.device_id.trim().is_empty() {
            errors.push(FieldError::new(format!("devices[{i}].device_id"), "must not be empty"));
        }
    }
    if !errors.is_empty() {
        return Err(ReportIngestError::Validation(errors));
    }

    let mut tx = pool.begin().await?;
    let api_log_id = api_receive::insert(&mut tx, system.id, "/api/reports/device-info", &body).await?;
    for d in &request.devices {
        device::upsert(&mut tx, system.id, d).await?;
    }
    report_publish::insert(&mut tx, report_publish::ReportType::DeviceInfo, &system.system_name, api_log_id, &body).await?;
    tx.commit().await?;

    Ok(Json(OkBody { message: "device info accepted".to_owned() }))
}

#[derive(Debug, Deserialize)]
struct DeviceStatusRequest {
    statuses: Vec<DeviceStatusPayload>,
}

#[derive(Debug, Deserialize)]
struct DeviceStatusPayload {
    device_id: String,
    status: String,
    reported_at: DateTime<Utc>,
}

async fn device_status_report(
    State(pool): State<PgPool>,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse, ReportIngestError> {
    let system = authenticate(&pool, &headers).await?;
    let request: DeviceStatusRequest = serde_json::from_str(&body)
        .map_err(|e| ReportIngestError::Validation(vec![FieldError::new("body", e.to_string())]))?;

    let mut errors = Vec::new();
    if request.statuses.is_empty() {
        errors.push(FieldError::new("statuses", "at least one status is required"));
    }
    for (i, s) in request.statuses.iter().enumerate() {
        if s.device_id.trim().is_empty() {
            errors.push(FieldError::new(format!("statuses[{i}].device_id"), "must not be empty"));
        }
        if s.status.trim().is_empty() {
            errors.push(FieldError::new(format!("statuses[{i}].status"), "must not be empty"));
        }
    }
    if !errors.is_empty() {
        return Err(ReportIngestError::Validation(errors));
    }

    let mut tx = pool.begin().await?;
    let api_log_id = api_receive::insert(&mut tx, system.id, "/api/reports/device-status", &body).await?;
    for s in &request.statuses {
        let Some(device_row_id) = device::find_device_row_id(&mut tx, system.id, &s.device_id).await? else {
            return Err(ReportIngestError::Validation(vec![FieldError::new(
                "statuses.device_id",
                format!("unknown device_id {}", s.device_id),
            )]));
        };
        device_status::insert(&mut tx, device_row_id, &s.status, s.reported_at).await?;
    }
    report_publish::insert(&mut tx, report_publish::ReportType::DeviceStatus, &system.system_name, api_log_id, &body).await?;
    tx.commit().await?;

    Ok(Json(OkBody { message: "device status accepted".to_owned() }))
}

#[derive(Debug, Deserialize)]
struct DisasterResultRequest {
    identifier: String,
    status: String,
    detail: Option<String>,
}

async fn disaster_result(
    State(pool): State<PgPool>,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse, ReportIngestError> {
    let system = authenticate(&pool, &headers).await?;
    let request: DisasterResultRequest = serde_json::from_str(&body)
        .map_err(|e| ReportIngestError::Validation(vec![FieldError::new("body", e.to_string())]))?;

    let mut errors = Vec::new();
    if request.identifier.trim().is_empty() {
        errors.push(FieldError::new("identifier", "must not be empty"));
    }
    if request.status.trim().is_empty() {
        errors.push(FieldError::new("status", "must not be empty"));
    }
    if !errors.is_empty() {
        return Err(ReportIngestError::Validation(errors));
    }

    if !disaster_transmit::exists_for_system(&pool, system.id, &request.identifier).await? {
        return Err(ReportIngestError::Validation(vec![FieldError::new(
            "identifier",
            "this system was never a target of that alert",
        )]));
    }

    let mut tx = pool.begin().await?;
    let api_log_id = api_receive::insert(&mut tx, system.id, "/api/reports/disaster-result", &body).await?;
    report_publish::insert(&mut tx, report_publish::ReportType::DisasterResult, &system.system_name, api_log_id, &body).await?;
    tx.commit().await?;

    Ok(Json(OkBody { message: "disaster result accepted".to_owned() }))
}
