//! Action endpoints: filtered list, detail, aggregate stats.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::Extension;
use axum::extract::Path;
use axum::extract::Query;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::Response;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
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
use super::parse_limit;
use super::ApiContext;
use crate::store::action_transactions::ActionTxRow;
use crate::store::actions::ActionRow;
use crate::store::actions::ActionStatsFilter;
use crate::store::actions::ActionsFilter;
use crate::store::StoreError;

const SCHEMA_VERSION: &str = "v1.0";

#[derive(Debug, Clone, Serialize)]
pub struct Price {
    pub denom: String,
    pub amount: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionDto {
    pub tx_type: String,
    pub tx_hash: String,
    pub height: i64,
    pub block_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_wanted: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_price_denom: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_payer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_payee: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_fee: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_fee_denom: Option<String>,
}

impl From<&ActionTxRow> for TransactionDto {
    fn from(tx: &ActionTxRow) -> Self {
        Self {
            tx_type: tx.tx_type.clone(),
            tx_hash: tx.tx_hash.clone(),
            height: tx.height,
            block_time: tx.block_time,
            gas_wanted: tx.gas_wanted,
            gas_used: tx.gas_used,
            action_price: tx.action_price.clone(),
            action_price_denom: tx.action_price_denom.clone(),
            flow_payer: tx.flow_payer.clone(),
            flow_payee: tx.flow_payee.clone(),
            tx_fee: tx.tx_fee.clone(),
            tx_fee_denom: tx.tx_fee_denom.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ActionItem {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: String,
    pub creator: String,
    pub state: String,
    pub block_height: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
    pub size: i64,
    pub price: Option<Price>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decoded: Option<Value>,
    /// Base64 of the raw payload, only when no decoded form exists.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub raw: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub super_nodes: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub register_tx_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub register_tx_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalize_tx_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalize_tx_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approve_tx_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approve_tx_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transactions: Option<Vec<TransactionDto>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct ActionsListResponse {
    pub items: Vec<ActionItem>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub next_cursor: String,
    pub schema_version: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
struct ActionsCursor {
    ts: String,
    id: String,
}

/// Builds one response item. Placeholder rows are dropped before anything
/// user-visible is derived from them; with `include_transactions` unset the
/// per-type convenience fields are still populated.
fn action_item(
    action: &ActionRow,
    transactions: Option<&Vec<ActionTxRow>>,
    include_transactions: bool,
    include_super_nodes: bool,
) -> ActionItem {
    let mut item = ActionItem {
        id: action.action_id.to_string(),
        action_type: action.action_type.clone(),
        creator: action.creator.clone(),
        state: action.state.clone(),
        block_height: action.block_height,
        mime_type: action.mime_type.clone(),
        size: action.size_bytes,
        price: Some(Price {
            denom: action.price_denom.clone(),
            amount: action.price_amount.clone(),
        }),
        ..Default::default()
    };

    if let Some(decoded) = &action.metadata_json {
        item.decoded = Some(decoded.clone());
    } else if !action.metadata_raw.is_empty() {
        item.raw = BASE64.encode(&action.metadata_raw);
    }
    if include_super_nodes {
        item.super_nodes = action.super_nodes.clone();
    }

    if let Some(transactions) = transactions {
        let visible: Vec<&ActionTxRow> = transactions
            .iter()
            .filter(|tx| !tx.is_placeholder())
            .collect();
        for tx in &visible {
            match tx.tx_type.as_str() {
                "register" => {
                    item.register_tx_id = Some(tx.tx_hash.clone());
                    item.register_tx_time = Some(tx.block_time);
                }
                "finalize" => {
                    item.finalize_tx_id = Some(tx.tx_hash.clone());
                    item.finalize_tx_time = Some(tx.block_time);
                }
                "approve" => {
                    item.approve_tx_id = Some(tx.tx_hash.clone());
                    item.approve_tx_time = Some(tx.block_time);
                }
                _ => (),
            }
        }
        if include_transactions {
            item.transactions = Some(visible.into_iter().map(TransactionDto::from).collect());
        }
    }
    item
}

pub async fn list(
    Extension(ctx): Extension<Arc<ApiContext>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let mut filter = ActionsFilter {
        action_type: params.get("type").cloned(),
        creator: params.get("creator").cloned(),
        state: params.get("state").cloned(),
        supernode: params.get("supernode").cloned(),
        ..Default::default()
    };

    filter.limit = match parse_limit(params.get("limit"), 50) {
        Ok(limit) => limit,
        Err(()) => return bad_request("invalid limit parameter"),
    };

    if let Some(from) = params.get("from") {
        match from.parse::<i64>() {
            Ok(height) => filter.from_height = Some(height),
            Err(_) => return bad_request("invalid from parameter: must be a block height"),
        }
    }
    if let Some(to) = params.get("to") {
        match to.parse::<i64>() {
            Ok(height) => filter.to_height = Some(height),
            Err(_) => return bad_request("invalid to parameter: must be a block height"),
        }
    }
    if let Some(cursor) = params.get("cursor") {
        let Some(payload) = decode_cursor::<ActionsCursor>(cursor) else {
            return bad_request("invalid cursor");
        };
        match payload.id.parse::<i64>() {
            Ok(id) => filter.cursor_id = Some(id),
            Err(_) => return bad_request("invalid cursor: id must be numeric"),
        }
    }
    let include_transactions = params
        .get("include_transactions")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    let (actions, has_more) = match ctx.store.actions_filtered(&filter).await {
        Ok(page) => page,
        Err(e) => {
            tracing::error!("list actions: {e}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to fetch actions");
        }
    };

    // One bulk fetch feeds the flattened tx fields for the whole page.
    let action_ids: Vec<i64> = actions.iter().map(|a| a.action_id).collect();
    let tx_map = match ctx.store.action_txs_bulk(&action_ids).await {
        Ok(map) => map,
        Err(e) => {
            tracing::error!("list actions transactions: {e}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to fetch action transactions",
            );
        }
    };

    let items: Vec<ActionItem> = actions
        .iter()
        .map(|action| {
            action_item(
                action,
                tx_map.get(&action.action_id),
                include_transactions,
                false,
            )
        })
        .collect();

    let next_cursor = if has_more {
        actions
            .last()
            .map(|last| {
                encode_cursor(&ActionsCursor {
                    ts: last.created_at.to_rfc3339(),
                    id: last.action_id.to_string(),
                })
            })
            .unwrap_or_default()
    } else {
        String::new()
    };

    let response = ActionsListResponse {
        items,
        next_cursor,
        schema_version: SCHEMA_VERSION,
    };
    json_response(&headers, &response, Utc::now())
}

pub async fn detail(
    Extension(ctx): Extension<Arc<ApiContext>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Ok(action_id) = id.parse::<i64>() else {
        return bad_request("invalid action ID: must be numeric");
    };

    let action = match ctx.store.action_by_id(action_id).await {
        Ok(action) => action,
        Err(StoreError::NotFound) => {
            return error_response(StatusCode::NOT_FOUND, "action not found")
        }
        Err(e) => {
            tracing::error!("get action {action_id}: {e}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to fetch action");
        }
    };
    let transactions = match ctx.store.action_txs(action_id).await {
        Ok(txs) => txs,
        Err(e) => {
            tracing::error!("get action {action_id} transactions: {e}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to fetch action transactions",
            );
        }
    };

    let mut item = action_item(&action, Some(&transactions), true, true);
    item.schema_version = Some(SCHEMA_VERSION);
    json_response(&headers, &item, Utc::now())
}

#[derive(Debug, Serialize)]
pub struct MimeTypeStatDto {
    #[serde(rename = "type")]
    pub mime_type: String,
    pub count: i64,
    pub avg_size: f64,
}

#[derive(Debug, Serialize)]
pub struct ActionStatsResponse {
    pub total: i64,
    pub states: HashMap<String, i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mime_types: Vec<MimeTypeStatDto>,
    pub schema_version: &'static str,
}

pub async fn stats(
    Extension(ctx): Extension<Arc<ApiContext>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let mut filter = ActionStatsFilter {
        action_type: params
            .get("type")
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty()),
        ..Default::default()
    };
    if let Some(from) = params.get("from") {
        match DateTime::parse_from_rfc3339(from.trim()) {
            Ok(t) => filter.from = Some(t.with_timezone(&Utc)),
            Err(_) => return bad_request("invalid from parameter: must be RFC3339"),
        }
    }
    if let Some(to) = params.get("to") {
        match DateTime::parse_from_rfc3339(to.trim()) {
            Ok(t) => filter.to = Some(t.with_timezone(&Utc)),
            Err(_) => return bad_request("invalid to parameter: must be RFC3339"),
        }
    }

    let stats = match ctx.store.action_stats(&filter).await {
        Ok(stats) => stats,
        Err(e) => {
            tracing::error!("action stats: {e}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to fetch action stats",
            );
        }
    };

    let response = ActionStatsResponse {
        total: stats.total,
        states: stats
            .state_counts
            .into_iter()
            .map(|sc| (sc.state, sc.count))
            .collect(),
        mime_types: stats
            .mime_type_stats
            .into_iter()
            .map(|ms| MimeTypeStatDto {
                mime_type: ms.mime_type,
                count: ms.count,
                avg_size: ms.avg_size,
            })
            .collect(),
        schema_version: SCHEMA_VERSION,
    };
    json_response(&headers, &response, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PLACEHOLDER_TX_HASH;
    use pretty_assertions::assert_eq;

    fn action_row() -> ActionRow {
        ActionRow {
            action_id: 123,
            creator: "lumera1creator".to_owned(),
            action_type: "ACTION_TYPE_CASCADE".to_owned(),
            state: "ACTION_STATE_DONE".to_owned(),
            block_height: 890403,
            price_denom: "ulume".to_owned(),
            price_amount: "10090".to_owned(),
            expiration_time: 0,
            metadata_raw: vec![1, 2, 3],
            metadata_json: None,
            super_nodes: Some(serde_json::json!(["lumera1sn"])),
            mime_type: "image/jpeg".to_owned(),
            size_bytes: 2048,
            created_at: Utc::now(),
        }
    }

    fn tx_row(tx_type: &str, hash: &str) -> ActionTxRow {
        ActionTxRow {
            action_id: 123,
            tx_type: tx_type.to_owned(),
            tx_hash: hash.to_owned(),
            height: 890400,
            block_time: Utc::now(),
            gas_wanted: Some(200000),
            gas_used: Some(180000),
            action_price: Some("10090".to_owned()),
            action_price_denom: Some("ulume".to_owned()),
            flow_payer: Some("lumera1creator".to_owned()),
            flow_payee: Some("lumera1module".to_owned()),
            tx_fee: None,
            tx_fee_denom: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn placeholder_rows_are_invisible() {
        let transactions = vec![tx_row("register", PLACEHOLDER_TX_HASH)];
        let item = action_item(&action_row(), Some(&transactions), true, false);
        assert_eq!(item.register_tx_id, None);
        assert_eq!(item.register_tx_time, None);
        assert!(item.transactions.as_ref().is_some_and(|t| t.is_empty()));
        let serialized = serde_json::to_string(&item).unwrap();
        assert!(!serialized.contains(PLACEHOLDER_TX_HASH));
    }

    #[test]
    fn real_transactions_flatten() {
        let transactions = vec![tx_row("register", "AAA"), tx_row("finalize", "BBB")];
        let item = action_item(&action_row(), Some(&transactions), false, false);
        assert_eq!(item.register_tx_id.as_deref(), Some("AAA"));
        assert_eq!(item.finalize_tx_id.as_deref(), Some("BBB"));
        assert_eq!(item.approve_tx_id, None);
        // Not requested, so the full list stays out of the payload.
        assert!(item.transactions.is_none());
    }

    #[test]
    fn transactions_included_on_request() {
        let transactions = vec![
            tx_row("register", "AAA"),
            tx_row("finalize", PLACEHOLDER_TX_HASH),
        ];
        let item = action_item(&action_row(), Some(&transactions), true, false);
        let listed = item.transactions.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].tx_hash, "AAA");
    }

    #[test]
    fn raw_metadata_fallback() {
        let item = action_item(&action_row(), None, false, false);
        assert_eq!(item.decoded, None);
        assert_eq!(item.raw, BASE64.encode([1, 2, 3]));

        let mut with_json = action_row();
        with_json.metadata_json = Some(serde_json::json!({"file_name": "a.jpg"}));
        let item = action_item(&with_json, None, false, false);
        assert!(item.decoded.is_some());
        assert!(item.raw.is_empty());
    }

    #[test]
    fn super_nodes_only_in_detail() {
        let item = action_item(&action_row(), None, false, false);
        assert!(item.super_nodes.is_none());
        let item = action_item(&action_row(), None, false, true);
        assert_eq!(item.super_nodes, Some(serde_json::json!(["lumera1sn"])));
    }
}
