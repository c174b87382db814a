//! PostgreSQL persistence.
//!
//! One submodule per table. SQL lives next to the code that runs it; the
//! schema is additive-only and applied on startup. The supernode table has
//! two write entry points with disjoint column sets — see
//! [`supernodes::upsert`] and [`supernodes::update_probe_data`].

pub mod action_transactions;
pub mod actions;
pub mod supernodes;

use deadpool_postgres::Manager;
use deadpool_postgres::ManagerConfig;
use deadpool_postgres::Pool;
use deadpool_postgres::RecyclingMethod;
use thiserror::Error;
use tokio_postgres::NoTls;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("pool: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    #[error("pool build: {0}")]
    Build(#[from] deadpool_postgres::BuildError),
    #[error("postgres: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("row not found")]
    NotFound,
}

/// Shared handle to the database pool. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    pool: Pool,
}

impl Store {
    /// Opens a bounded connection pool and verifies connectivity.
    pub async fn connect(db_url: &str, max_conns: usize) -> Result<Self, StoreError> {
        let pg_config: tokio_postgres::Config = db_url.parse()?;
        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager).max_size(max_conns).build()?;
        // Fail fast on a bad DSN or unreachable server.
        let client = pool.get().await?;
        client.simple_query("select 1").await?;
        Ok(Self { pool })
    }

    /// Applies the embedded schema. Statements are all idempotent, so this
    /// runs unconditionally on every start.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        tx.batch_execute(include_str!("store/schema.sql")).await?;
        tx.commit().await?;
        tracing::debug!("schema initialized");
        Ok(())
    }

    pub(crate) async fn client(&self) -> Result<deadpool_postgres::Object, StoreError> {
        Ok(self.pool.get().await?)
    }

    // Supernodes

    pub async fn upsert_supernode(
        &self,
        record: &supernodes::SupernodeRecord,
    ) -> Result<(), StoreError> {
        supernodes::upsert(&*self.client().await?, record).await
    }

    pub async fn update_supernode_probe_data(
        &self,
        update: &supernodes::ProbeUpdate,
    ) -> Result<(), StoreError> {
        supernodes::update_probe_data(&*self.client().await?, update).await
    }

    pub async fn probe_targets(&self) -> Result<Vec<supernodes::ProbeTarget>, StoreError> {
        supernodes::probe_targets(&*self.client().await?).await
    }

    pub async fn supernodes_filtered(
        &self,
        filter: &supernodes::SupernodeFilter,
    ) -> Result<(Vec<supernodes::SupernodeRow>, bool), StoreError> {
        supernodes::filtered(&*self.client().await?, filter).await
    }

    pub async fn supernode_by_account(
        &self,
        account: &str,
    ) -> Result<supernodes::SupernodeRow, StoreError> {
        supernodes::get(&*self.client().await?, account).await
    }

    pub async fn unavailable_supernodes(
        &self,
        state_filter: supernodes::UnavailableStateFilter,
    ) -> Result<Vec<supernodes::SupernodeRow>, StoreError> {
        supernodes::unavailable(&*self.client().await?, state_filter).await
    }

    pub async fn version_matrix(&self) -> Result<Vec<supernodes::VersionRow>, StoreError> {
        supernodes::version_matrix(&*self.client().await?).await
    }

    pub async fn hardware_stats(&self) -> Result<supernodes::HardwareStats, StoreError> {
        supernodes::hardware_stats(&*self.client().await?).await
    }

    // Actions

    pub async fn upsert_action(&self, record: &actions::ActionRecord) -> Result<(), StoreError> {
        actions::upsert(&*self.client().await?, record).await
    }

    pub async fn actions_filtered(
        &self,
        filter: &actions::ActionsFilter,
    ) -> Result<(Vec<actions::ActionRow>, bool), StoreError> {
        actions::filtered(&*self.client().await?, filter).await
    }

    pub async fn action_by_id(&self, action_id: i64) -> Result<actions::ActionRow, StoreError> {
        actions::get(&*self.client().await?, action_id).await
    }

    pub async fn action_stats(
        &self,
        filter: &actions::ActionStatsFilter,
    ) -> Result<actions::ActionStats, StoreError> {
        actions::stats(&*self.client().await?, filter).await
    }

    pub async fn supernode_action_stats(
        &self,
        address: &str,
        action_type: Option<&str>,
    ) -> Result<actions::SupernodeActionStats, StoreError> {
        actions::supernode_stats(&*self.client().await?, address, action_type).await
    }

    pub async fn unenriched_actions(
        &self,
        min_id: i64,
        limit: i64,
    ) -> Result<Vec<actions::EnrichmentRow>, StoreError> {
        actions::unenriched(&*self.client().await?, min_id, limit).await
    }

    // Action transactions

    pub async fn upsert_action_tx(
        &self,
        record: &action_transactions::ActionTxRecord,
    ) -> Result<(), StoreError> {
        action_transactions::upsert(&*self.client().await?, record).await
    }

    pub async fn action_txs(
        &self,
        action_id: i64,
    ) -> Result<Vec<action_transactions::ActionTxRow>, StoreError> {
        action_transactions::for_action(&*self.client().await?, action_id).await
    }

    pub async fn action_txs_bulk(
        &self,
        action_ids: &[i64],
    ) -> Result<
        std::collections::HashMap<i64, Vec<action_transactions::ActionTxRow>>,
        StoreError,
    > {
        action_transactions::for_actions(&*self.client().await?, action_ids).await
    }

    pub async fn payment_stats(
        &self,
        supernode_account: &str,
    ) -> Result<Vec<action_transactions::PaymentStat>, StoreError> {
        action_transactions::payment_stats(&*self.client().await?, supernode_account).await
    }
}
