//! Supernode table access.
//!
//! Two write entry points, each owning a disjoint column set. [`upsert`] is
//! the chain sync's door and never touches probe measurements;
//! [`update_probe_data`] is the prober's door and never touches chain state.
//! The partition is what lets both loops run unsynchronized.

use chrono::DateTime;
use chrono::Utc;
use serde_json::Value;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;
use tokio_postgres::Row;

use super::StoreError;

/// Chain-owned view of a supernode, produced by the supernode sync.
#[derive(Debug, Clone, Default)]
pub struct SupernodeRecord {
    pub supernode_account: String,
    pub validator_address: String,
    /// Only overwrites a stored moniker when non-empty.
    pub validator_moniker: String,
    pub current_state: String,
    pub current_state_height: String,
    pub ip_address: String,
    pub p2p_port: Option<i32>,
    pub protocol_version: String,
    pub state_history: Option<Value>,
    pub evidence: Option<Value>,
    pub prev_ip_addresses: Option<Value>,
    /// Preserved when absent; the chain sync passes none of these today.
    pub metrics_report: Option<Value>,
    pub registered_services: Option<Value>,
    pub running_tasks: Option<Value>,
}

/// Probe-owned measurements for one supernode.
#[derive(Debug, Clone)]
pub struct ProbeUpdate {
    pub supernode_account: String,
    pub actual_version: String,
    pub cpu_usage_percent: f64,
    pub cpu_cores: i32,
    pub memory_total_gb: f64,
    pub memory_used_gb: f64,
    pub memory_usage_percent: f64,
    pub storage_total_bytes: i64,
    pub storage_used_bytes: i64,
    pub storage_usage_percent: f64,
    pub hardware_summary: String,
    pub peers_count: i32,
    pub uptime_seconds: i64,
    pub rank: i32,
    pub is_status_api_available: bool,
    pub metrics_report: Value,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub supernode_account: String,
    pub ip_address: String,
    pub p2p_port: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct SupernodeRow {
    pub supernode_account: String,
    pub validator_address: String,
    pub validator_moniker: String,
    pub current_state: String,
    pub current_state_height: String,
    pub ip_address: String,
    pub p2p_port: Option<i32>,
    pub protocol_version: String,
    pub actual_version: String,
    pub cpu_usage_percent: Option<f64>,
    pub cpu_cores: Option<i32>,
    pub memory_total_gb: Option<f64>,
    pub memory_used_gb: Option<f64>,
    pub memory_usage_percent: Option<f64>,
    pub storage_total_bytes: Option<i64>,
    pub storage_used_bytes: Option<i64>,
    pub storage_usage_percent: Option<f64>,
    pub hardware_summary: Option<String>,
    pub peers_count: Option<i32>,
    pub uptime_seconds: Option<i64>,
    pub rank: Option<i32>,
    pub registered_services: Option<Value>,
    pub running_tasks: Option<Value>,
    pub state_history: Option<Value>,
    pub evidence: Option<Value>,
    pub prev_ip_addresses: Option<Value>,
    pub last_status_check: Option<DateTime<Utc>>,
    pub is_status_api_available: bool,
    pub metrics_report: Option<Value>,
    pub last_successful_probe: Option<DateTime<Utc>>,
    pub failed_probe_counter: i32,
    pub last_known_actual_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AvailabilityFilter {
    #[default]
    Any,
    /// All three probes succeeded: status API, port1 and p2p.
    Available,
    Unavailable,
}

#[derive(Debug, Clone, Default)]
pub struct SupernodeFilter {
    pub chain_state: Option<String>,
    pub status: AvailabilityFilter,
    pub version: Option<String>,
    pub min_failed: i32,
    pub limit: i64,
    pub cursor_account: Option<String>,
}

/// State filter for the unavailable-supernodes listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnavailableStateFilter {
    /// Everything not stopped on chain.
    #[default]
    Running,
    Stopped,
    Any,
}

#[derive(Debug, Clone)]
pub struct VersionRow {
    pub version: String,
    pub total: i64,
    pub available: i64,
    pub unavailable: i64,
}

#[derive(Debug, Clone, Default)]
pub struct HardwareStats {
    pub total_cpu_cores: i64,
    pub total_memory_gb: f64,
    pub total_storage_bytes: i64,
    pub used_storage_bytes: i64,
    pub available_supernodes: i64,
}

const UPSERT_SQL: &str = "
        insert into supernodes (
            supernode_account
            , validator_address
            , validator_moniker
            , current_state
            , current_state_height
            , ip_address
            , p2p_port
            , protocol_version
            , state_history
            , evidence
            , prev_ip_addresses
            , metrics_report
            , registered_services
            , running_tasks
        )
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        on conflict (supernode_account) do update set
            validator_address = excluded.validator_address
            , validator_moniker = coalesce(nullif(excluded.validator_moniker, ''), supernodes.validator_moniker)
            , current_state = excluded.current_state
            , current_state_height = excluded.current_state_height
            , ip_address = excluded.ip_address
            , p2p_port = excluded.p2p_port
            , protocol_version = excluded.protocol_version
            , state_history = excluded.state_history
            , evidence = excluded.evidence
            , prev_ip_addresses = excluded.prev_ip_addresses
            , metrics_report = coalesce(excluded.metrics_report, supernodes.metrics_report)
            , registered_services = coalesce(excluded.registered_services, supernodes.registered_services)
            , running_tasks = coalesce(excluded.running_tasks, supernodes.running_tasks)
            , updated_at = now();";

/// Inserts or refreshes the chain-owned columns of a supernode.
///
/// On conflict only chain-owned columns change. The moniker survives empty
/// refreshes, and the three preserved-when-null blobs keep their stored
/// value whenever the incoming one is null.
pub(super) async fn upsert(client: &Client, record: &SupernodeRecord) -> Result<(), StoreError> {
    client
        .execute(
            UPSERT_SQL,
            &[
                &record.supernode_account,
                &record.validator_address,
                &record.validator_moniker,
                &record.current_state,
                &record.current_state_height,
                &record.ip_address,
                &record.p2p_port,
                &record.protocol_version,
                &record.state_history,
                &record.evidence,
                &record.prev_ip_addresses,
                &record.metrics_report,
                &record.registered_services,
                &record.running_tasks,
            ],
        )
        .await?;
    Ok(())
}

const PROBE_SUCCESS_SQL: &str = "
    update supernodes set
        actual_version = coalesce(nullif($2, ''), actual_version)
        , cpu_usage_percent = $3
        , cpu_cores = $4
        , memory_total_gb = $5
        , memory_used_gb = $6
        , memory_usage_percent = $7
        , storage_total_bytes = $8
        , storage_used_bytes = $9
        , storage_usage_percent = $10
        , hardware_summary = $11
        , peers_count = $12
        , uptime_seconds = $13
        , rank = $14
        , metrics_report = $15
        , last_status_check = $16
        , is_status_api_available = true
        , last_successful_probe = $16
        , failed_probe_counter = 0
        , last_known_actual_version = coalesce(nullif($2, ''), last_known_actual_version)
        , updated_at = now()
    where supernode_account = $1;";

const PROBE_FAILURE_SQL: &str = "
    update supernodes set
        actual_version = coalesce(nullif($2, ''), actual_version)
        , cpu_usage_percent = $3
        , cpu_cores = $4
        , memory_total_gb = $5
        , memory_used_gb = $6
        , memory_usage_percent = $7
        , storage_total_bytes = $8
        , storage_used_bytes = $9
        , storage_usage_percent = $10
        , hardware_summary = $11
        , peers_count = $12
        , uptime_seconds = $13
        , rank = $14
        , metrics_report = $15
        , last_status_check = $16
        , is_status_api_available = false
        , failed_probe_counter = coalesce(failed_probe_counter, 0) + 1
        , updated_at = now()
    where supernode_account = $1;";

// Kept runnable against a schema that predates the probe bookkeeping
// columns; used once per call at most.
const PROBE_REDUCED_SQL: &str = "
    update supernodes set
        actual_version = coalesce(nullif($2, ''), actual_version)
        , cpu_usage_percent = $3
        , cpu_cores = $4
        , memory_total_gb = $5
        , memory_used_gb = $6
        , memory_usage_percent = $7
        , storage_total_bytes = $8
        , storage_used_bytes = $9
        , storage_usage_percent = $10
        , hardware_summary = $11
        , peers_count = $12
        , uptime_seconds = $13
        , rank = $14
        , metrics_report = $15
        , last_status_check = $16
        , is_status_api_available = $17
        , updated_at = now()
    where supernode_account = $1;";

/// Writes probe results. Touches only probe-owned columns.
///
/// A successful probe stamps `last_successful_probe`, zeroes the failure
/// counter and refreshes `last_known_actual_version`; a failed one bumps the
/// counter and leaves both untouched.
pub(super) async fn update_probe_data(
    client: &Client,
    update: &ProbeUpdate,
) -> Result<(), StoreError> {
    let sql = if update.is_status_api_available {
        PROBE_SUCCESS_SQL
    } else {
        PROBE_FAILURE_SQL
    };
    let params: [&(dyn ToSql + Sync); 16] = [
        &update.supernode_account,
        &update.actual_version,
        &update.cpu_usage_percent,
        &update.cpu_cores,
        &update.memory_total_gb,
        &update.memory_used_gb,
        &update.memory_usage_percent,
        &update.storage_total_bytes,
        &update.storage_used_bytes,
        &update.storage_usage_percent,
        &update.hardware_summary,
        &update.peers_count,
        &update.uptime_seconds,
        &update.rank,
        &update.metrics_report,
        &update.checked_at,
    ];
    match client.execute(sql, &params).await {
        Ok(_) => Ok(()),
        Err(e) if undefined_column(&e) => {
            tracing::warn!(
                "probe bookkeeping columns missing for {}, retrying with reduced column set: {e}",
                update.supernode_account
            );
            let mut reduced: Vec<&(dyn ToSql + Sync)> = params.to_vec();
            reduced.push(&update.is_status_api_available);
            client.execute(PROBE_REDUCED_SQL, &reduced).await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn undefined_column(e: &tokio_postgres::Error) -> bool {
    e.code() == Some(&SqlState::UNDEFINED_COLUMN)
}

/// Accounts and endpoints for the probe loop.
pub(super) async fn probe_targets(client: &Client) -> Result<Vec<ProbeTarget>, StoreError> {
    let sql = "
        select supernode_account
            , ip_address
            , p2p_port
        from supernodes;";
    let rows = client.query(sql, &[]).await?;
    Ok(rows
        .iter()
        .map(|row| ProbeTarget {
            supernode_account: row.get(0),
            ip_address: row.get(1),
            p2p_port: row.get(2),
        })
        .collect())
}

const SELECT_COLUMNS: &str = "
    select supernode_account
        , validator_address
        , validator_moniker
        , current_state
        , current_state_height
        , ip_address
        , p2p_port
        , protocol_version
        , actual_version
        , cpu_usage_percent
        , cpu_cores
        , memory_total_gb
        , memory_used_gb
        , memory_usage_percent
        , storage_total_bytes
        , storage_used_bytes
        , storage_usage_percent
        , hardware_summary
        , peers_count
        , uptime_seconds
        , rank
        , registered_services
        , running_tasks
        , state_history
        , evidence
        , prev_ip_addresses
        , last_status_check
        , is_status_api_available
        , metrics_report
        , last_successful_probe
        , failed_probe_counter
        , last_known_actual_version
    from supernodes";

fn from_row(row: &Row) -> SupernodeRow {
    SupernodeRow {
        supernode_account: row.get(0),
        validator_address: row.get(1),
        validator_moniker: row.get(2),
        current_state: row.get(3),
        current_state_height: row.get(4),
        ip_address: row.get(5),
        p2p_port: row.get(6),
        protocol_version: row.get(7),
        actual_version: row.get(8),
        cpu_usage_percent: row.get(9),
        cpu_cores: row.get(10),
        memory_total_gb: row.get(11),
        memory_used_gb: row.get(12),
        memory_usage_percent: row.get(13),
        storage_total_bytes: row.get(14),
        storage_used_bytes: row.get(15),
        storage_usage_percent: row.get(16),
        hardware_summary: row.get(17),
        peers_count: row.get(18),
        uptime_seconds: row.get(19),
        rank: row.get(20),
        registered_services: row.get(21),
        running_tasks: row.get(22),
        state_history: row.get(23),
        evidence: row.get(24),
        prev_ip_addresses: row.get(25),
        last_status_check: row.get(26),
        is_status_api_available: row.get(27),
        metrics_report: row.get(28),
        last_successful_probe: row.get(29),
        failed_probe_counter: row.get(30),
        last_known_actual_version: row.get(31),
    }
}

// Availability on the read path uses the tri-port rule against the stored
// probe report: status API up plus both dialed ports open.
const AVAILABLE_CONDITIONS: [&str; 3] = [
    "is_status_api_available = true",
    "metrics_report->'ports'->>'port1' = 'true'",
    "metrics_report->'ports'->>'p2p' = 'true'",
];

const UNAVAILABLE_CONDITION: &str = "(is_status_api_available = false \
     or metrics_report->'ports'->>'port1' != 'true' \
     or metrics_report->'ports'->>'p2p' != 'true')";

/// Builds the filtered listing query. Parameter order: chain state, version,
/// minimum failure count, cursor, limit — matching [`filtered`].
fn filter_sql(filter: &SupernodeFilter) -> String {
    let mut conditions: Vec<String> = Vec::new();
    let mut arg = 0usize;

    if filter.chain_state.is_some() {
        arg += 1;
        conditions.push(format!("current_state = ${arg}"));
    }
    match filter.status {
        AvailabilityFilter::Any => (),
        AvailabilityFilter::Available => {
            conditions.extend(AVAILABLE_CONDITIONS.iter().map(|c| (*c).to_owned()));
        }
        AvailabilityFilter::Unavailable => conditions.push(UNAVAILABLE_CONDITION.to_owned()),
    }
    if filter.version.is_some() {
        arg += 1;
        conditions.push(format!(
            "coalesce(nullif(last_known_actual_version, ''), nullif(actual_version, '')) = ${arg}"
        ));
    }
    arg += 1;
    conditions.push(format!("failed_probe_counter >= ${arg}"));
    if filter.cursor_account.is_some() {
        arg += 1;
        conditions.push(format!("supernode_account > ${arg}"));
    }
    arg += 1;
    format!(
        "{SELECT_COLUMNS}\n    where {}\n    order by supernode_account asc\n    limit ${arg};",
        conditions.join("\n      and ")
    )
}

/// Filtered, cursor-paginated listing. The second return value reports
/// whether more rows exist past the requested limit.
pub(super) async fn filtered(
    client: &Client,
    filter: &SupernodeFilter,
) -> Result<(Vec<SupernodeRow>, bool), StoreError> {
    let limit = filter.limit.max(1);
    let fetch = limit + 1;
    let sql = filter_sql(filter);

    let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
    if let Some(ref state) = filter.chain_state {
        params.push(state);
    }
    if let Some(ref version) = filter.version {
        params.push(version);
    }
    params.push(&filter.min_failed);
    if let Some(ref cursor) = filter.cursor_account {
        params.push(cursor);
    }
    params.push(&fetch);

    let rows = client.query(&sql, &params).await?;
    let mut results: Vec<SupernodeRow> = rows.iter().map(from_row).collect();
    let has_more = results.len() as i64 > limit;
    if has_more {
        results.truncate(limit as usize);
    }
    Ok((results, has_more))
}

pub(super) async fn get(client: &Client, account: &str) -> Result<SupernodeRow, StoreError> {
    let sql = format!("{SELECT_COLUMNS}\n    where supernode_account = $1;");
    match client.query_opt(&sql, &[&account]).await? {
        Some(row) => Ok(from_row(&row)),
        None => Err(StoreError::NotFound),
    }
}

pub(super) async fn unavailable(
    client: &Client,
    state_filter: UnavailableStateFilter,
) -> Result<Vec<SupernodeRow>, StoreError> {
    let state_condition = match state_filter {
        UnavailableStateFilter::Running => "and current_state != 'SUPERNODE_STATE_STOPPED'",
        UnavailableStateFilter::Stopped => "and current_state = 'SUPERNODE_STATE_STOPPED'",
        UnavailableStateFilter::Any => "",
    };
    let sql = format!(
        "{SELECT_COLUMNS}\n    where is_status_api_available = false {state_condition}\n    order by supernode_account asc;"
    );
    let rows = client.query(&sql, &[]).await?;
    Ok(rows.iter().map(from_row).collect())
}

/// Version distribution over all supernodes with a known version.
///
/// The effective version is the last one seen by a successful probe,
/// falling back to the live-reported one.
pub(super) async fn version_matrix(client: &Client) -> Result<Vec<VersionRow>, StoreError> {
    let sql = "
        select coalesce(nullif(last_known_actual_version, ''), nullif(actual_version, ''), 'unknown') as version
            , count(*) as total
            , count(*) filter (where is_status_api_available = true) as available
            , count(*) filter (where is_status_api_available = false) as unavailable
        from supernodes
        where coalesce(nullif(last_known_actual_version, ''), nullif(actual_version, ''), 'unknown') != 'unknown'
        group by version
        order by total desc;";
    let rows = client.query(sql, &[]).await?;
    Ok(rows
        .iter()
        .map(|row| VersionRow {
            version: row.get(0),
            total: row.get(1),
            available: row.get(2),
            unavailable: row.get(3),
        })
        .collect())
}

/// Hardware totals over fully available, non-stopped supernodes.
pub(super) async fn hardware_stats(client: &Client) -> Result<HardwareStats, StoreError> {
    let sql = "
        select coalesce(sum(cpu_cores), 0)::bigint
            , coalesce(sum(memory_total_gb), 0)::double precision
            , coalesce(sum(storage_total_bytes), 0)::bigint
            , coalesce(sum(storage_used_bytes), 0)::bigint
            , count(*)
        from supernodes
        where is_status_api_available = true
          and metrics_report->'ports'->>'port1' = 'true'
          and metrics_report->'ports'->>'p2p' = 'true'
          and current_state != 'SUPERNODE_STATE_STOPPED';";
    let row = client.query_one(sql, &[]).await?;
    Ok(HardwareStats {
        total_cpu_cores: row.get(0),
        total_memory_gb: row.get(1),
        total_storage_bytes: row.get(2),
        used_storage_bytes: row.get(3),
        available_supernodes: row.get(4),
    })
}
