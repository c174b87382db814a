//! Lifecycle transaction storage, unique on (action id, transaction type).
//!
//! The unique pair plus replace-on-conflict makes enrichment idempotent:
//! re-observing the same transaction rewrites identical content, and the
//! surrogate `created_at` keeps its original stamp.

use std::collections::HashMap;

use chrono::DateTime;
use chrono::Utc;
use tokio_postgres::Client;
use tokio_postgres::Row;

use super::StoreError;
use crate::chain::transfers::ObservedTx;
use crate::constants::PLACEHOLDER_TX_HASH;
use crate::types::TxType;

#[derive(Debug, Clone)]
pub struct ActionTxRecord {
    pub action_id: i64,
    pub tx_type: TxType,
    pub tx_hash: String,
    pub height: i64,
    pub block_time: DateTime<Utc>,
    pub gas_wanted: Option<i64>,
    pub gas_used: Option<i64>,
    pub action_price: Option<String>,
    pub action_price_denom: Option<String>,
    pub flow_payer: Option<String>,
    pub flow_payee: Option<String>,
    pub tx_fee: Option<String>,
    pub tx_fee_denom: Option<String>,
}

impl ActionTxRecord {
    /// Sentinel row marking an action as checked with nothing on chain.
    pub fn placeholder(action_id: i64, created_at: DateTime<Utc>) -> Self {
        Self {
            action_id,
            tx_type: TxType::Register,
            tx_hash: PLACEHOLDER_TX_HASH.to_owned(),
            height: 0,
            block_time: created_at,
            gas_wanted: None,
            gas_used: None,
            action_price: None,
            action_price_denom: None,
            flow_payer: None,
            flow_payee: None,
            tx_fee: None,
            tx_fee_denom: None,
        }
    }
}

impl From<ObservedTx> for ActionTxRecord {
    fn from(tx: ObservedTx) -> Self {
        Self {
            action_id: tx.action_id,
            tx_type: tx.tx_type,
            tx_hash: tx.tx_hash,
            height: tx.height,
            block_time: tx.block_time,
            gas_wanted: tx.gas_wanted,
            gas_used: tx.gas_used,
            action_price: tx.action_price,
            action_price_denom: tx.action_price_denom,
            flow_payer: tx.flow_payer,
            flow_payee: tx.flow_payee,
            tx_fee: tx.tx_fee,
            tx_fee_denom: tx.tx_fee_denom,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActionTxRow {
    pub action_id: i64,
    pub tx_type: String,
    pub tx_hash: String,
    pub height: i64,
    pub block_time: DateTime<Utc>,
    pub gas_wanted: Option<i64>,
    pub gas_used: Option<i64>,
    pub action_price: Option<String>,
    pub action_price_denom: Option<String>,
    pub flow_payer: Option<String>,
    pub flow_payee: Option<String>,
    pub tx_fee: Option<String>,
    pub tx_fee_denom: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ActionTxRow {
    /// True for the bookkeeping row the enricher writes when an action has
    /// no transactions on chain. Such rows never leave the API boundary.
    pub fn is_placeholder(&self) -> bool {
        self.tx_hash == PLACEHOLDER_TX_HASH
    }
}

pub(super) async fn upsert(client: &Client, record: &ActionTxRecord) -> Result<(), StoreError> {
    let sql = "
        insert into action_transactions (
            action_id
            , tx_type
            , tx_hash
            , height
            , block_time
            , gas_wanted
            , gas_used
            , action_price
            , action_price_denom
            , flow_payer
            , flow_payee
            , tx_fee
            , tx_fee_denom
        )
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        on conflict (action_id, tx_type) do update set
            tx_hash = excluded.tx_hash
            , height = excluded.height
            , block_time = excluded.block_time
            , gas_wanted = excluded.gas_wanted
            , gas_used = excluded.gas_used
            , action_price = excluded.action_price
            , action_price_denom = excluded.action_price_denom
            , flow_payer = excluded.flow_payer
            , flow_payee = excluded.flow_payee
            , tx_fee = excluded.tx_fee
            , tx_fee_denom = excluded.tx_fee_denom;";
    let tx_type = record.tx_type.as_str();
    client
        .execute(
            sql,
            &[
                &record.action_id,
                &tx_type,
                &record.tx_hash,
                &record.height,
                &record.block_time,
                &record.gas_wanted,
                &record.gas_used,
                &record.action_price,
                &record.action_price_denom,
                &record.flow_payer,
                &record.flow_payee,
                &record.tx_fee,
                &record.tx_fee_denom,
            ],
        )
        .await?;
    Ok(())
}

const SELECT_COLUMNS: &str = "
    select action_id
        , tx_type
        , tx_hash
        , height
        , block_time
        , gas_wanted
        , gas_used
        , action_price
        , action_price_denom
        , flow_payer
        , flow_payee
        , tx_fee
        , tx_fee_denom
        , created_at
    from action_transactions";

fn from_row(row: &Row) -> ActionTxRow {
    ActionTxRow {
        action_id: row.get(0),
        tx_type: row.get(1),
        tx_hash: row.get(2),
        height: row.get(3),
        block_time: row.get(4),
        gas_wanted: row.get(5),
        gas_used: row.get(6),
        action_price: row.get(7),
        action_price_denom: row.get(8),
        flow_payer: row.get(9),
        flow_payee: row.get(10),
        tx_fee: row.get(11),
        tx_fee_denom: row.get(12),
        created_at: row.get(13),
    }
}

pub(super) async fn for_action(
    client: &Client,
    action_id: i64,
) -> Result<Vec<ActionTxRow>, StoreError> {
    let sql = format!("{SELECT_COLUMNS}\n    where action_id = $1\n    order by height asc;");
    let rows = client.query(&sql, &[&action_id]).await?;
    Ok(rows.iter().map(from_row).collect())
}

/// One round trip for a whole page of actions.
pub(super) async fn for_actions(
    client: &Client,
    action_ids: &[i64],
) -> Result<HashMap<i64, Vec<ActionTxRow>>, StoreError> {
    let mut grouped: HashMap<i64, Vec<ActionTxRow>> = HashMap::new();
    if action_ids.is_empty() {
        return Ok(grouped);
    }
    let ids: Vec<i64> = action_ids.to_vec();
    let sql = format!(
        "{SELECT_COLUMNS}\n    where action_id = any($1)\n    order by action_id, height asc;"
    );
    for row in client.query(&sql, &[&ids]).await? {
        let tx = from_row(&row);
        grouped.entry(tx.action_id).or_default().push(tx);
    }
    Ok(grouped)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PaymentStat {
    pub denom: String,
    pub total_action_price: String,
    pub total_tx_fee: String,
}

/// Settlement totals per denomination for one supernode: finalize
/// transactions where the supernode is the payee. Amounts are summed as
/// numerics in SQL and returned as text to avoid precision loss.
pub(super) async fn payment_stats(
    client: &Client,
    supernode_account: &str,
) -> Result<Vec<PaymentStat>, StoreError> {
    let sql = "
        select coalesce(action_price_denom, '') as denom
            , coalesce(sum(action_price::numeric), 0)::text as total_price
            , coalesce(sum(tx_fee::numeric), 0)::text as total_fee
        from action_transactions
        where tx_type = $1 and flow_payee = $2
        group by action_price_denom;";
    let finalize = TxType::Finalize.as_str();
    let rows = client.query(sql, &[&finalize, &supernode_account]).await?;
    Ok(rows
        .iter()
        .map(|row| PaymentStat {
            denom: row.get(0),
            total_action_price: row.get(1),
            total_tx_fee: row.get(2),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn placeholder_shape() {
        let now = Utc::now();
        let row = ActionTxRecord::placeholder(42, now);
        assert_eq!(row.tx_type, TxType::Register);
        assert_eq!(row.tx_hash, PLACEHOLDER_TX_HASH);
        assert_eq!(row.height, 0);
        assert_eq!(row.block_time, now);
        assert_eq!(row.action_price, None);
    }

    #[test]
    fn placeholder_detection() {
        let row = ActionTxRow {
            action_id: 1,
            tx_type: "register".to_owned(),
            tx_hash: PLACEHOLDER_TX_HASH.to_owned(),
            height: 0,
            block_time: Utc::now(),
            gas_wanted: None,
            gas_used: None,
            action_price: None,
            action_price_denom: None,
            flow_payer: None,
            flow_payee: None,
            tx_fee: None,
            tx_fee_denom: None,
            created_at: Utc::now(),
        };
        assert!(row.is_placeholder());
        let real = ActionTxRow {
            tx_hash: "A1B2C3".to_owned(),
            ..row
        };
        assert!(!real.is_placeholder());
    }
}
