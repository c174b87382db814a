//! Version distribution across the supernode fleet.

use std::sync::Arc;

use axum::extract::Extension;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::Response;
use chrono::Utc;
use serde::Serialize;

use super::error_response;
use super::json_response;
use super::ApiContext;
use crate::store::supernodes::VersionRow;

#[derive(Debug, Serialize)]
pub struct VersionMatrixRow {
    pub version: String,
    pub nodes_total: i64,
    pub nodes_available: i64,
    pub nodes_unavailable: i64,
    pub is_latest: bool,
}

#[derive(Debug, Serialize)]
pub struct VersionMatrixResponse {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub latest_version: String,
    pub versions: Vec<VersionMatrixRow>,
}

/// The most widely deployed version counts as latest; rows arrive sorted
/// by total, so it is the first one.
fn build_response(rows: Vec<VersionRow>) -> VersionMatrixResponse {
    let latest_version = rows
        .first()
        .map(|row| row.version.clone())
        .unwrap_or_default();
    let versions = rows
        .into_iter()
        .map(|row| VersionMatrixRow {
            is_latest: row.version == latest_version,
            version: row.version,
            nodes_total: row.total,
            nodes_available: row.available,
            nodes_unavailable: row.unavailable,
        })
        .collect();
    VersionMatrixResponse {
        latest_version,
        versions,
    }
}

pub async fn matrix(Extension(ctx): Extension<Arc<ApiContext>>, headers: HeaderMap) -> Response {
    let rows = match ctx.store.version_matrix().await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!("version matrix: {e}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to fetch version data",
            );
        }
    };
    json_response(&headers, &build_response(rows), Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(version: &str, total: i64, available: i64) -> VersionRow {
        VersionRow {
            version: version.to_owned(),
            total,
            available,
            unavailable: total - available,
        }
    }

    #[test]
    fn most_common_version_is_latest() {
        let response = build_response(vec![row("v2.4.10", 40, 30), row("v2.3.0", 10, 2)]);
        assert_eq!(response.latest_version, "v2.4.10");
        assert!(response.versions[0].is_latest);
        assert!(!response.versions[1].is_latest);
        assert_eq!(response.versions[1].nodes_unavailable, 8);
    }

    #[test]
    fn empty_matrix() {
        let response = build_response(vec![]);
        assert_eq!(response.latest_version, "");
        assert!(response.versions.is_empty());
    }
}
