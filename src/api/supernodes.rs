//! Supernode endpoints: filtered metrics list, detail, hardware aggregates,
//! payment totals, unavailable listing, and the manual sync trigger.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::Extension;
use axum::extract::Path;
use axum::extract::Query;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::Json;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use super::bad_request;
use super::decode_cursor;
use super::encode_cursor;
use super::error_response;
use super::json_response;
use super::ApiContext;
use crate::store::action_transactions::PaymentStat;
use crate::store::supernodes::AvailabilityFilter;
use crate::store::supernodes::SupernodeFilter;
use crate::store::supernodes::SupernodeRow;
use crate::store::supernodes::UnavailableStateFilter;
use crate::store::StoreError;

const SCHEMA_VERSION: &str = "v1.0";

const VALID_CHAIN_STATES: [&str; 5] = [
    "SUPERNODE_STATE_UNSPECIFIED",
    "SUPERNODE_STATE_ACTIVE",
    "SUPERNODE_STATE_DISABLED",
    "SUPERNODE_STATE_STOPPED",
    "SUPERNODE_STATE_PENALIZED",
];

#[derive(Debug, Clone, Serialize)]
pub struct SupernodeMetricsDto {
    pub supernode_account: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub validator_address: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub validator_moniker: String,
    pub current_state: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub current_state_height: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ip_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p2p_port: Option<i32>,
    pub protocol_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub actual_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_usage_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_total_gb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_used_gb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_usage_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_total_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_used_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_usage_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hardware_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peers_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status_check: Option<DateTime<Utc>>,
    pub is_status_api_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_report: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_successful_probe: Option<DateTime<Utc>>,
    pub failed_probe_counter: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub last_known_actual_version: String,
    pub schema_version: &'static str,
}

impl From<&SupernodeRow> for SupernodeMetricsDto {
    fn from(sn: &SupernodeRow) -> Self {
        Self {
            supernode_account: sn.supernode_account.clone(),
            validator_address: sn.validator_address.clone(),
            validator_moniker: sn.validator_moniker.clone(),
            current_state: sn.current_state.clone(),
            current_state_height: sn.current_state_height.clone(),
            ip_address: sn.ip_address.clone(),
            p2p_port: sn.p2p_port,
            protocol_version: sn.protocol_version.clone(),
            actual_version: sn.actual_version.clone(),
            cpu_usage_percent: sn.cpu_usage_percent,
            cpu_cores: sn.cpu_cores,
            memory_total_gb: sn.memory_total_gb,
            memory_used_gb: sn.memory_used_gb,
            memory_usage_percent: sn.memory_usage_percent,
            storage_total_bytes: sn.storage_total_bytes,
            storage_used_bytes: sn.storage_used_bytes,
            storage_usage_percent: sn.storage_usage_percent,
            hardware_summary: sn.hardware_summary.clone(),
            peers_count: sn.peers_count,
            uptime_seconds: sn.uptime_seconds,
            rank: sn.rank,
            last_status_check: sn.last_status_check,
            is_status_api_available: sn.is_status_api_available,
            metrics_report: sn.metrics_report.clone(),
            last_successful_probe: sn.last_successful_probe,
            failed_probe_counter: sn.failed_probe_counter,
            last_known_actual_version: sn.last_known_actual_version.clone(),
            schema_version: SCHEMA_VERSION,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SupernodeMetricsListResponse {
    pub total: usize,
    pub nodes: Vec<SupernodeMetricsDto>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub next_cursor: String,
    pub schema_version: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
struct SupernodesCursor {
    account: String,
}

pub async fn list_metrics(
    Extension(ctx): Extension<Arc<ApiContext>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let mut filter = SupernodeFilter {
        limit: 100,
        ..Default::default()
    };

    if let Some(state) = params.get("currentState") {
        if !VALID_CHAIN_STATES.contains(&state.as_str()) {
            return bad_request("invalid currentState parameter");
        }
        filter.chain_state = Some(state.clone());
    }
    filter.status = match params.get("status").map(String::as_str) {
        None | Some("") | Some("any") => AvailabilityFilter::Any,
        Some("available") => AvailabilityFilter::Available,
        Some("unavailable") => AvailabilityFilter::Unavailable,
        Some(_) => {
            return bad_request(
                "invalid status parameter: must be 'available', 'unavailable', or 'any'",
            )
        }
    };
    if let Some(version) = params.get("version").map(|s| s.trim()) {
        if !version.is_empty() {
            filter.version = Some(version.to_owned());
        }
    }
    if let Some(min_failed) = params.get("minFailedProbeCounter") {
        match min_failed.parse::<i32>() {
            Ok(parsed) if parsed >= 0 => filter.min_failed = parsed,
            _ => {
                return bad_request(
                    "invalid minFailedProbeCounter parameter: must be a non-negative integer",
                )
            }
        }
    }
    if let Some(limit) = params.get("limit") {
        match limit.parse::<i64>() {
            Ok(parsed) if (1..=200).contains(&parsed) => filter.limit = parsed,
            _ => return bad_request("invalid limit parameter: must be between 1 and 200"),
        }
    }
    if let Some(cursor) = params.get("cursor") {
        match decode_cursor::<SupernodesCursor>(cursor) {
            Some(payload) if !payload.account.is_empty() => {
                filter.cursor_account = Some(payload.account)
            }
            _ => return bad_request("invalid cursor parameter"),
        }
    }

    let (supernodes, has_more) = match ctx.store.supernodes_filtered(&filter).await {
        Ok(page) => page,
        Err(e) => {
            tracing::error!("list supernodes: {e}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to fetch supernode metrics",
            );
        }
    };

    let nodes: Vec<SupernodeMetricsDto> = supernodes.iter().map(SupernodeMetricsDto::from).collect();
    // The freshest probe stamp on the page doubles as Last-Modified.
    let last_modified = supernodes
        .iter()
        .filter_map(|sn| sn.last_status_check.or(sn.last_successful_probe))
        .max()
        .unwrap_or_else(Utc::now);

    let next_cursor = if has_more {
        supernodes
            .last()
            .map(|last| {
                encode_cursor(&SupernodesCursor {
                    account: last.supernode_account.clone(),
                })
            })
            .unwrap_or_default()
    } else {
        String::new()
    };

    let response = SupernodeMetricsListResponse {
        total: nodes.len(),
        nodes,
        next_cursor,
        schema_version: SCHEMA_VERSION,
    };
    json_response(&headers, &response, last_modified)
}

pub async fn metrics(
    Extension(ctx): Extension<Arc<ApiContext>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if id.is_empty() {
        return bad_request("invalid supernode ID");
    }
    let sn = match ctx.store.supernode_by_account(&id).await {
        Ok(sn) => sn,
        Err(StoreError::NotFound) => {
            return error_response(StatusCode::NOT_FOUND, "supernode not found")
        }
        Err(e) => {
            tracing::error!("get supernode {id}: {e}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to fetch supernode");
        }
    };
    let last_modified = sn.last_status_check.unwrap_or_else(Utc::now);
    json_response(&headers, &SupernodeMetricsDto::from(&sn), last_modified)
}

pub async fn unavailable(
    Extension(ctx): Extension<Arc<ApiContext>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let state_filter = match params.get("currentState").map(String::as_str) {
        None | Some("") | Some("running") => UnavailableStateFilter::Running,
        Some("stopped") => UnavailableStateFilter::Stopped,
        Some("any") => UnavailableStateFilter::Any,
        Some(_) => {
            return bad_request(
                "invalid currentState parameter: must be 'running', 'stopped', or 'any'",
            )
        }
    };
    let supernodes = match ctx.store.unavailable_supernodes(state_filter).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!("list unavailable supernodes: {e}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "database query failed");
        }
    };
    let nodes: Vec<SupernodeMetricsDto> = supernodes.iter().map(SupernodeMetricsDto::from).collect();
    json_response(&headers, &nodes, Utc::now())
}

#[derive(Debug, Serialize)]
pub struct SupernodeStatsResponse {
    pub total_cpu_cores: i64,
    pub total_memory_gb: f64,
    pub total_storage_bytes: i64,
    pub used_storage_bytes: i64,
    pub available_storage_bytes: i64,
    pub storage_used_percent: f64,
    pub storage_available_percent: f64,
    pub available_supernodes: i64,
    pub schema_version: &'static str,
}

pub async fn hardware_stats(
    Extension(ctx): Extension<Arc<ApiContext>>,
    headers: HeaderMap,
) -> Response {
    let stats = match ctx.store.hardware_stats().await {
        Ok(stats) => stats,
        Err(e) => {
            tracing::error!("hardware stats: {e}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to fetch hardware stats",
            );
        }
    };

    let available_storage_bytes = stats.total_storage_bytes - stats.used_storage_bytes;
    let (storage_used_percent, storage_available_percent) = if stats.total_storage_bytes > 0 {
        (
            stats.used_storage_bytes as f64 / stats.total_storage_bytes as f64 * 100.0,
            available_storage_bytes as f64 / stats.total_storage_bytes as f64 * 100.0,
        )
    } else {
        (0.0, 0.0)
    };

    let response = SupernodeStatsResponse {
        total_cpu_cores: stats.total_cpu_cores,
        total_memory_gb: stats.total_memory_gb,
        total_storage_bytes: stats.total_storage_bytes,
        used_storage_bytes: stats.used_storage_bytes,
        available_storage_bytes,
        storage_used_percent,
        storage_available_percent,
        available_supernodes: stats.available_supernodes,
        schema_version: SCHEMA_VERSION,
    };
    json_response(&headers, &response, Utc::now())
}

#[derive(Debug, Serialize)]
pub struct PaymentInfoResponse {
    pub payments: Vec<PaymentStat>,
    pub schema_version: &'static str,
}

pub async fn payment_info(
    Extension(ctx): Extension<Arc<ApiContext>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if id.is_empty() {
        return bad_request("invalid supernode ID");
    }
    let payments = match ctx.store.payment_stats(&id).await {
        Ok(stats) => stats,
        Err(e) => {
            tracing::error!("payment stats for {id}: {e}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to fetch payment stats",
            );
        }
    };
    let response = PaymentInfoResponse {
        payments,
        schema_version: SCHEMA_VERSION,
    };
    json_response(&headers, &response, Utc::now())
}

/// `POST /v1/supernodes/sync`: 202 when a run starts, 204 when one is
/// already in flight.
pub async fn trigger_sync(Extension(ctx): Extension<Arc<ApiContext>>) -> Response {
    if ctx.runner.clone().trigger_sync_and_probe() {
        (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"status": "started"})),
        )
            .into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}
