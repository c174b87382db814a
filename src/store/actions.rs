//! Action table access. Single writer (the action sync), so conflicts
//! replace every action-owned column wholesale.

use chrono::DateTime;
use chrono::Utc;
use serde_json::Value;
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;
use tokio_postgres::Row;

use super::StoreError;
use crate::types::TxType;

#[derive(Debug, Clone, Default)]
pub struct ActionRecord {
    pub action_id: i64,
    pub creator: String,
    pub action_type: String,
    pub state: String,
    pub block_height: i64,
    pub price_denom: String,
    pub price_amount: String,
    pub expiration_time: i64,
    pub metadata_raw: Vec<u8>,
    pub metadata_json: Option<Value>,
    pub super_nodes: Value,
    pub mime_type: String,
    pub size_bytes: i64,
}

#[derive(Debug, Clone)]
pub struct ActionRow {
    pub action_id: i64,
    pub creator: String,
    pub action_type: String,
    pub state: String,
    pub block_height: i64,
    pub price_denom: String,
    pub price_amount: String,
    pub expiration_time: i64,
    pub metadata_raw: Vec<u8>,
    pub metadata_json: Option<Value>,
    pub super_nodes: Option<Value>,
    pub mime_type: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ActionsFilter {
    pub action_type: Option<String>,
    pub creator: Option<String>,
    pub state: Option<String>,
    pub supernode: Option<String>,
    pub from_height: Option<i64>,
    pub to_height: Option<i64>,
    pub limit: i64,
    pub cursor_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct ActionStatsFilter {
    pub action_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct StateCount {
    pub state: String,
    pub count: i64,
}

#[derive(Debug, Clone)]
pub struct MimeTypeStat {
    pub mime_type: String,
    pub count: i64,
    pub avg_size: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ActionStats {
    pub total: i64,
    pub state_counts: Vec<StateCount>,
    pub mime_type_stats: Vec<MimeTypeStat>,
}

#[derive(Debug, Clone, Default)]
pub struct SupernodeActionStats {
    pub total: i64,
    pub state_counts: Vec<StateCount>,
}

/// Minimal action view for the transaction enricher.
#[derive(Debug, Clone)]
pub struct EnrichmentRow {
    pub action_id: i64,
    pub creator: String,
    pub action_type: String,
    pub state: String,
    /// First assigned supernode account, when any.
    pub supernode_account: String,
    pub created_at: DateTime<Utc>,
}

pub(super) async fn upsert(client: &Client, record: &ActionRecord) -> Result<(), StoreError> {
    let sql = "
        insert into actions (
            action_id
            , creator
            , action_type
            , state
            , block_height
            , price_denom
            , price_amount
            , expiration_time
            , metadata_raw
            , metadata_json
            , super_nodes
            , mime_type
            , size_bytes
        )
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        on conflict (action_id) do update set
            creator = excluded.creator
            , action_type = excluded.action_type
            , state = excluded.state
            , block_height = excluded.block_height
            , price_denom = excluded.price_denom
            , price_amount = excluded.price_amount
            , expiration_time = excluded.expiration_time
            , metadata_raw = excluded.metadata_raw
            , metadata_json = excluded.metadata_json
            , super_nodes = excluded.super_nodes
            , mime_type = excluded.mime_type
            , size_bytes = excluded.size_bytes
            , updated_at = now();";
    client
        .execute(
            sql,
            &[
                &record.action_id,
                &record.creator,
                &record.action_type,
                &record.state,
                &record.block_height,
                &record.price_denom,
                &record.price_amount,
                &record.expiration_time,
                &record.metadata_raw,
                &record.metadata_json,
                &record.super_nodes,
                &record.mime_type,
                &record.size_bytes,
            ],
        )
        .await?;
    Ok(())
}

const SELECT_COLUMNS: &str = "
    select action_id
        , creator
        , action_type
        , state
        , block_height
        , price_denom
        , price_amount
        , expiration_time
        , metadata_raw
        , metadata_json
        , super_nodes
        , mime_type
        , size_bytes
        , created_at
    from actions";

fn from_row(row: &Row) -> ActionRow {
    ActionRow {
        action_id: row.get(0),
        creator: row.get(1),
        action_type: row.get(2),
        state: row.get(3),
        block_height: row.get(4),
        price_denom: row.get(5),
        price_amount: row.get(6),
        expiration_time: row.get(7),
        metadata_raw: row.get(8),
        metadata_json: row.get(9),
        super_nodes: row.get(10),
        mime_type: row.get(11),
        size_bytes: row.get(12),
        created_at: row.get(13),
    }
}

/// Builds the filtered listing query. Parameter order: type, creator, state,
/// supernode, from-height, to-height, cursor, limit — matching [`filtered`].
fn filter_sql(filter: &ActionsFilter) -> String {
    let mut conditions: Vec<String> = Vec::new();
    let mut arg = 0usize;

    if filter.action_type.is_some() {
        arg += 1;
        conditions.push(format!("action_type = ${arg}"));
    }
    if filter.creator.is_some() {
        arg += 1;
        conditions.push(format!("creator = ${arg}"));
    }
    if filter.state.is_some() {
        arg += 1;
        conditions.push(format!("state = ${arg}"));
    }
    if filter.supernode.is_some() {
        arg += 1;
        // Containment probes the GIN index on super_nodes.
        conditions.push(format!("super_nodes @> jsonb_build_array(${arg}::text)"));
    }
    if filter.from_height.is_some() {
        arg += 1;
        conditions.push(format!("block_height >= ${arg}"));
    }
    if filter.to_height.is_some() {
        arg += 1;
        conditions.push(format!("block_height <= ${arg}"));
    }
    if filter.cursor_id.is_some() {
        arg += 1;
        conditions.push(format!("action_id < ${arg}"));
    }
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("\n    where {}", conditions.join("\n      and "))
    };
    arg += 1;
    // Action ids are unique and monotonic, so descending id is a
    // deterministic newest-first ordering.
    format!("{SELECT_COLUMNS}{where_clause}\n    order by action_id desc\n    limit ${arg};")
}

pub(super) async fn filtered(
    client: &Client,
    filter: &ActionsFilter,
) -> Result<(Vec<ActionRow>, bool), StoreError> {
    let limit = filter.limit.max(1);
    let fetch = limit + 1;
    let sql = filter_sql(filter);

    let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
    if let Some(ref action_type) = filter.action_type {
        params.push(action_type);
    }
    if let Some(ref creator) = filter.creator {
        params.push(creator);
    }
    if let Some(ref state) = filter.state {
        params.push(state);
    }
    if let Some(ref supernode) = filter.supernode {
        params.push(supernode);
    }
    if let Some(ref from_height) = filter.from_height {
        params.push(from_height);
    }
    if let Some(ref to_height) = filter.to_height {
        params.push(to_height);
    }
    if let Some(ref cursor_id) = filter.cursor_id {
        params.push(cursor_id);
    }
    params.push(&fetch);

    let rows = client.query(&sql, &params).await?;
    let mut results: Vec<ActionRow> = rows.iter().map(from_row).collect();
    let has_more = results.len() as i64 > limit;
    if has_more {
        results.truncate(limit as usize);
    }
    Ok((results, has_more))
}

pub(super) async fn get(client: &Client, action_id: i64) -> Result<ActionRow, StoreError> {
    let sql = format!("{SELECT_COLUMNS}\n    where action_id = $1;");
    match client.query_opt(&sql, &[&action_id]).await? {
        Some(row) => Ok(from_row(&row)),
        None => Err(StoreError::NotFound),
    }
}

/// State counts plus a MIME-type breakdown, optionally constrained to a
/// registration time window (joined through the register transaction).
pub(super) async fn stats(
    client: &Client,
    filter: &ActionStatsFilter,
) -> Result<ActionStats, StoreError> {
    let register = TxType::Register.as_str().to_owned();
    let mut conditions: Vec<String> = Vec::new();
    let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();

    if let Some(ref action_type) = filter.action_type {
        params.push(action_type);
        conditions.push(format!("a.action_type = ${}", params.len()));
    }
    if let Some(ref from) = filter.from {
        params.push(from);
        conditions.push(format!("t.block_time >= ${}", params.len()));
    }
    if let Some(ref to) = filter.to {
        params.push(to);
        conditions.push(format!("t.block_time <= ${}", params.len()));
    }

    // The join is only needed when a time window is requested.
    let from_clause = if filter.from.is_some() || filter.to.is_some() {
        params.push(&register);
        format!(
            "from actions a join action_transactions t on t.action_id = a.action_id and t.tx_type = ${}",
            params.len()
        )
    } else {
        "from actions a".to_owned()
    };
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("where {}", conditions.join(" and "))
    };

    let state_sql = format!(
        "select a.state, count(*) {from_clause} {where_clause} group by a.state;"
    );
    let mut stats = ActionStats::default();
    for row in client.query(&state_sql, &params).await? {
        let count: i64 = row.get(1);
        stats.total += count;
        stats.state_counts.push(StateCount {
            state: row.get(0),
            count,
        });
    }

    let mime_sql = format!(
        "select a.mime_type, count(*), coalesce(avg(a.size_bytes), 0)::double precision \
         {from_clause} {where_clause} group by a.mime_type;"
    );
    for row in client.query(&mime_sql, &params).await? {
        let mime_type: String = row.get(0);
        if mime_type.is_empty() {
            continue;
        }
        stats.mime_type_stats.push(MimeTypeStat {
            mime_type,
            count: row.get(1),
            avg_size: row.get(2),
        });
    }
    Ok(stats)
}

/// Per-state action counts for one assigned supernode.
pub(super) async fn supernode_stats(
    client: &Client,
    address: &str,
    action_type: Option<&str>,
) -> Result<SupernodeActionStats, StoreError> {
    let membership = serde_json::json!([address]);
    let action_type = action_type.map(str::to_owned);
    let mut sql = "
        select state
            , count(*)
        from actions
        where super_nodes @> $1"
        .to_owned();
    let mut params: Vec<&(dyn ToSql + Sync)> = vec![&membership];
    if let Some(ref t) = action_type {
        params.push(t);
        sql.push_str(&format!(" and action_type = ${}", params.len()));
    }
    sql.push_str(" group by state;");

    let mut stats = SupernodeActionStats::default();
    for row in client.query(&sql, &params).await? {
        let count: i64 = row.get(1);
        stats.total += count;
        stats.state_counts.push(StateCount {
            state: row.get(0),
            count,
        });
    }
    Ok(stats)
}

/// Actions with no register transaction on file yet, i.e. not yet checked
/// by the enricher. The placeholder row written for empty chain responses
/// satisfies the `not exists` and keeps checked actions out of this set.
pub(super) async fn unenriched(
    client: &Client,
    min_id: i64,
    limit: i64,
) -> Result<Vec<EnrichmentRow>, StoreError> {
    let sql = "
        select a.action_id
            , a.creator
            , a.action_type
            , a.state
            , a.super_nodes
            , a.created_at
        from actions a
        where a.action_id >= $1
          and not exists (
            select 1
            from action_transactions t
            where t.action_id = a.action_id and t.tx_type = $2
          )
        order by a.action_id asc
        limit $3;";
    let register = TxType::Register.as_str();
    let rows = client.query(sql, &[&min_id, &register, &limit]).await?;
    Ok(rows
        .iter()
        .map(|row| {
            let super_nodes: Option<Value> = row.get(4);
            EnrichmentRow {
                action_id: row.get(0),
                creator: row.get(1),
                action_type: row.get(2),
                state: row.get(3),
                supernode_account: first_supernode(super_nodes.as_ref()),
                created_at: row.get(5),
            }
        })
        .collect())
}

/// First entry of the assigned-supernode array, empty when there is none.
fn first_supernode(super_nodes: Option<&Value>) -> String {
    super_nodes
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalized(sql: &str) -> String {
        sql.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn filter_sql_no_filters() {
        let sql = normalized(&filter_sql(&ActionsFilter::default()));
        assert!(!sql.contains("where"));
        assert!(sql.ends_with("order by action_id desc limit $1;"));
    }

    #[test]
    fn filter_sql_all_filters() {
        let filter = ActionsFilter {
            action_type: Some("ACTION_TYPE_CASCADE".to_owned()),
            creator: Some("lumera1c".to_owned()),
            state: Some("ACTION_STATE_DONE".to_owned()),
            supernode: Some("lumera1sn".to_owned()),
            from_height: Some(100),
            to_height: Some(200),
            limit: 50,
            cursor_id: Some(9000),
        };
        let sql = normalized(&filter_sql(&filter));
        assert!(sql.contains("action_type = $1"));
        assert!(sql.contains("creator = $2"));
        assert!(sql.contains("state = $3"));
        assert!(sql.contains("super_nodes @> jsonb_build_array($4::text)"));
        assert!(sql.contains("block_height >= $5"));
        assert!(sql.contains("block_height <= $6"));
        assert!(sql.contains("action_id < $7"));
        assert!(sql.ends_with("limit $8;"));
    }

    #[test]
    fn filter_sql_sparse_filters_renumber() {
        let filter = ActionsFilter {
            state: Some("ACTION_STATE_PENDING".to_owned()),
            cursor_id: Some(77),
            limit: 10,
            ..Default::default()
        };
        let sql = normalized(&filter_sql(&filter));
        assert!(sql.contains("state = $1"));
        assert!(sql.contains("action_id < $2"));
        assert!(sql.ends_with("limit $3;"));
    }

    #[test]
    fn first_supernode_extraction() {
        assert_eq!(
            first_supernode(Some(&json!(["lumera1a", "lumera1b"]))),
            "lumera1a"
        );
        assert_eq!(first_supernode(Some(&json!([]))), "");
        assert_eq!(first_supernode(Some(&json!("not-an-array"))), "");
        assert_eq!(first_supernode(Some(&json!([42]))), "");
        assert_eq!(first_supernode(None), "");
    }
}
