//! Background ingestion loops.
//!
//! Five independent periodic loops share one [`Runner`]: validator sync,
//! supernode sync, action sync, probing, and transaction enrichment. Each
//! loop runs one pass per tick, logs pass errors, and keeps going; only
//! cancellation stops a loop. Loops never wait on each other — the
//! supernode/probe pair is decoupled through the column ownership split in
//! the store, and the validator map below is swapped wholesale.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::chain::models::PrevIpAddress;
use crate::chain::models::Supernode;
use crate::chain::models::SupernodeState;
use crate::chain::transfers::ActionContext;
use crate::chain::ChainClient;
use crate::chain::ChainError;
use crate::config::Settings;
use crate::constants::DEFAULT_P2P_PORT;
use crate::constants::DEFAULT_PROTOCOL_VERSION;
use crate::constants::UNKNOWN_SUPERNODE_STATE;
use crate::decoder;
use crate::probe;
use crate::probe::Prober;
use crate::store::action_transactions::ActionTxRecord;
use crate::store::actions::ActionRecord;
use crate::store::supernodes::ProbeUpdate;
use crate::store::supernodes::SupernodeRecord;
use crate::store::Store;
use crate::store::StoreError;

const VALIDATOR_PAGE_LIMIT: u32 = 200;
const SUPERNODE_PAGE_LIMIT: u32 = 200;
const ACTION_PAGE_LIMIT: u32 = 100;
const ENRICHER_BATCH_SIZE: i64 = 50;
const ENRICHER_START_DELAY: Duration = Duration::from_secs(30);
const ENRICHER_BATCH_PAUSE: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum PassError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Mutex-guarded boolean for the manual trigger: at most one manual
/// sync+probe in flight, extra requests are refused.
struct SingleFlight {
    running: Mutex<bool>,
}

impl SingleFlight {
    fn new() -> Self {
        Self {
            running: Mutex::new(false),
        }
    }

    fn try_begin(&self) -> bool {
        let mut running = self.running.lock().expect("single-flight lock");
        if *running {
            return false;
        }
        *running = true;
        true
    }

    fn end(&self) {
        *self.running.lock().expect("single-flight lock") = false;
    }
}

type MonikerMap = Arc<HashMap<String, String>>;

pub struct Runner {
    settings: Settings,
    store: Store,
    chain: ChainClient,
    prober: Prober,
    /// Operator address -> moniker. Single writer (the validator loop);
    /// readers grab the current `Arc` and release the lock immediately.
    monikers: RwLock<MonikerMap>,
    manual_sync: SingleFlight,
}

impl Runner {
    pub fn new(settings: Settings, store: Store, chain: ChainClient, prober: Prober) -> Arc<Self> {
        Arc::new(Self {
            settings,
            store,
            chain,
            prober,
            monikers: RwLock::new(Arc::new(HashMap::new())),
            manual_sync: SingleFlight::new(),
        })
    }

    /// Runs the initial validator sync, then spawns all five loops.
    ///
    /// The validator pass runs to completion first so the supernode loop
    /// never observes an empty moniker map on a fresh start.
    pub async fn start(self: Arc<Self>, shutdown: CancellationToken) {
        if let Err(e) = self.sync_validators().await {
            tracing::warn!("initial validator sync failed: {e}");
        }
        tokio::spawn(Arc::clone(&self).validators_loop(shutdown.clone()));
        tokio::spawn(Arc::clone(&self).supernodes_loop(shutdown.clone()));
        tokio::spawn(Arc::clone(&self).actions_loop(shutdown.clone()));
        tokio::spawn(Arc::clone(&self).probes_loop(shutdown.clone()));
        tokio::spawn(Arc::clone(&self).enricher_loop(shutdown));
    }

    #[tracing::instrument(name = "validators", skip_all)]
    async fn validators_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.validators_sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The immediate first tick would re-run the synchronous startup sync.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(e) = self.sync_validators().await {
                        tracing::warn!("validator sync failed: {e}");
                    }
                }
            }
        }
    }

    #[tracing::instrument(name = "supernodes", skip_all)]
    async fn supernodes_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.supernodes_sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(e) = self.sync_supernodes().await {
                        tracing::warn!("supernode sync failed: {e}");
                    }
                }
            }
        }
    }

    #[tracing::instrument(name = "actions", skip_all)]
    async fn actions_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.actions_sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(e) = self.sync_actions().await {
                        tracing::warn!("action sync failed: {e}");
                    }
                }
            }
        }
    }

    #[tracing::instrument(name = "probes", skip_all)]
    async fn probes_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.probe_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(e) = self.probe_supernodes().await {
                        tracing::warn!("probe pass failed: {e}");
                    }
                }
            }
        }
    }

    #[tracing::instrument(name = "enricher", skip_all)]
    async fn enricher_loop(self: Arc<Self>, shutdown: CancellationToken) {
        // Grace period: let the first action sync land before searching
        // the chain for lifecycle transactions.
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(ENRICHER_START_DELAY) => (),
        }
        let mut ticker = tokio::time::interval(self.settings.enricher_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(e) = self.run_enricher().await {
                        tracing::warn!("enricher pass failed: {e}");
                    }
                    // A pass may overshoot the interval; start the next wait
                    // from now instead of firing a queued tick immediately.
                    ticker.reset();
                }
            }
        }
    }

    /// Rebuilds the operator -> moniker map from the full validator set.
    async fn sync_validators(&self) -> Result<(), PassError> {
        let mut monikers = HashMap::new();
        let mut cursor: Option<String> = None;
        loop {
            let (validators, next) = self
                .chain
                .validators(cursor.as_deref(), VALIDATOR_PAGE_LIMIT)
                .await?;
            for validator in validators {
                monikers.insert(validator.operator_address, validator.description.moniker);
            }
            match next {
                Some(key) => cursor = Some(key),
                None => break,
            }
        }
        tracing::debug!("validator monikers refreshed, {} entries", monikers.len());
        *self.monikers.write().expect("moniker lock") = Arc::new(monikers);
        Ok(())
    }

    fn moniker_for(&self, operator_address: &str) -> String {
        let map = Arc::clone(&self.monikers.read().expect("moniker lock"));
        map.get(operator_address).cloned().unwrap_or_default()
    }

    async fn sync_supernodes(&self) -> Result<(), PassError> {
        let mut cursor: Option<String> = None;
        loop {
            let (supernodes, next) = self
                .chain
                .supernodes(cursor.as_deref(), SUPERNODE_PAGE_LIMIT)
                .await?;
            for sn in supernodes {
                let moniker = self.moniker_for(&sn.validator_address);
                let record = supernode_record(&sn, moniker);
                if let Err(e) = self.store.upsert_supernode(&record).await {
                    tracing::warn!("upsert supernode {}: {e}", record.supernode_account);
                }
            }
            match next {
                Some(key) => cursor = Some(key),
                None => break,
            }
        }
        Ok(())
    }

    async fn sync_actions(&self) -> Result<(), PassError> {
        let mut cursor: Option<String> = None;
        loop {
            let (actions, next) = self.chain.actions(cursor.as_deref(), ACTION_PAGE_LIMIT).await?;
            for action in actions {
                let action_id: i64 = match action.action_id.parse() {
                    Ok(id) => id,
                    Err(_) => {
                        tracing::warn!("skipping action with bad id {:?}", action.action_id);
                        continue;
                    }
                };
                let (raw, decoded) =
                    decoder::decode_action_metadata(&action.action_type, &action.metadata_b64);
                let mime_type = decoder::mime_type_from_metadata(decoded.as_ref());
                let record = ActionRecord {
                    action_id,
                    creator: action.creator,
                    action_type: action.action_type,
                    state: action.state,
                    block_height: action.block_height.parse().unwrap_or(0),
                    price_denom: action.price.denom,
                    price_amount: action.price.amount,
                    expiration_time: action.expiration_time.parse().unwrap_or(0),
                    metadata_raw: raw,
                    metadata_json: decoded,
                    super_nodes: json!(action.super_nodes),
                    mime_type,
                    size_bytes: size_bytes_from_kbs(&action.file_size_kbs),
                };
                if let Err(e) = self.store.upsert_action(&record).await {
                    tracing::warn!("upsert action {action_id}: {e}");
                }
            }
            match next {
                Some(key) => cursor = Some(key),
                None => break,
            }
        }
        Ok(())
    }

    /// One probe pass over every known supernode.
    ///
    /// Rows with malformed endpoints are skipped entirely; unreachable
    /// nodes get a failure-path write. Neither aborts the pass.
    async fn probe_supernodes(&self) -> Result<(), PassError> {
        let targets = self.store.probe_targets().await?;
        for target in targets {
            if target.ip_address.is_empty() {
                tracing::debug!("skipping {}: empty endpoint", target.supernode_account);
                continue;
            }
            let Some((host, port1)) = probe::split_host_port(&target.ip_address) else {
                tracing::info!(
                    "skipping {}: endpoint {:?} has no usable port",
                    target.supernode_account,
                    target.ip_address
                );
                continue;
            };
            if !probe::is_valid_host(&host) {
                tracing::info!(
                    "skipping {}: invalid host {host:?}",
                    target.supernode_account
                );
                continue;
            }
            let p2p_port = effective_p2p_port(target.p2p_port);

            let outcome = self.prober.probe(&host, port1, p2p_port).await;
            let checked_at = Utc::now();
            let report = json!({
                "ports": {
                    "port1": outcome.port1_open,
                    "port1_num": outcome.port1,
                    "p2p": outcome.p2p_open,
                    "p2p_port": outcome.p2p_port,
                },
                "status": outcome.status,
            });
            let update = ProbeUpdate {
                supernode_account: target.supernode_account.clone(),
                actual_version: outcome.status.version.clone(),
                cpu_usage_percent: outcome.status.cpu_usage_percent,
                cpu_cores: outcome.status.cpu_cores,
                memory_total_gb: outcome.status.memory_total_gb,
                memory_used_gb: outcome.status.memory_used_gb,
                memory_usage_percent: outcome.status.memory_usage_percent,
                storage_total_bytes: outcome.status.storage_total_bytes,
                storage_used_bytes: outcome.status.storage_used_bytes,
                storage_usage_percent: outcome.status.storage_usage_percent,
                hardware_summary: outcome.status.hardware_summary.clone(),
                peers_count: outcome.status.peers_count,
                uptime_seconds: outcome.status.uptime_seconds,
                rank: outcome.status.rank,
                is_status_api_available: outcome.status.available,
                metrics_report: report,
                checked_at,
            };
            if let Err(e) = self.store.update_supernode_probe_data(&update).await {
                tracing::warn!("probe update {}: {e}", target.supernode_account);
            }
        }
        Ok(())
    }

    /// Walks unenriched actions in id order and correlates their lifecycle
    /// transactions. Actions with nothing on chain get a placeholder row so
    /// the selection query skips them next pass.
    async fn run_enricher(&self) -> Result<(), PassError> {
        let mut min_id = self.settings.enricher_start_id;
        let mut processed = 0u64;
        let mut stored = 0u64;
        let mut not_found = 0u64;

        loop {
            let batch = self
                .store
                .unenriched_actions(min_id, ENRICHER_BATCH_SIZE)
                .await?;
            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len() as i64;

            for action in batch {
                processed += 1;
                // The selection query uses >=, so step past this action.
                min_id = action.action_id + 1;

                let ctx = ActionContext {
                    action_id: action.action_id,
                    creator: action.creator.clone(),
                    supernode_account: action.supernode_account.clone(),
                };
                let observed = self.chain.action_lifecycle_txs(&ctx).await;

                if observed.is_empty() {
                    not_found += 1;
                    let placeholder =
                        ActionTxRecord::placeholder(action.action_id, action.created_at);
                    if let Err(e) = self.store.upsert_action_tx(&placeholder).await {
                        tracing::warn!("placeholder for action {}: {e}", action.action_id);
                    }
                    continue;
                }
                for tx in observed {
                    match self.store.upsert_action_tx(&tx.into()).await {
                        Ok(()) => stored += 1,
                        Err(e) => tracing::warn!("persist tx for action {}: {e}", action.action_id),
                    }
                }
            }

            if batch_len < ENRICHER_BATCH_SIZE {
                break;
            }
            // Keep off the chain API between batches.
            tokio::time::sleep(ENRICHER_BATCH_PAUSE).await;
        }

        if processed > 0 {
            tracing::info!(
                "enricher pass: {processed} actions checked, {stored} transactions stored, {not_found} with nothing on chain"
            );
        }
        Ok(())
    }

    /// Starts a manual supernode sync followed by a probe pass, unless one
    /// is already running. Returns whether the run was started.
    pub fn trigger_sync_and_probe(self: Arc<Self>) -> bool {
        if !self.manual_sync.try_begin() {
            return false;
        }
        let runner = self;
        tokio::spawn(async move {
            if let Err(e) = runner.sync_supernodes().await {
                tracing::warn!("manual supernode sync failed: {e}");
            }
            if let Err(e) = runner.probe_supernodes().await {
                tracing::warn!("manual probe failed: {e}");
            }
            runner.manual_sync.end();
        });
        true
    }
}

/// Maps one chain supernode onto its chain-owned row.
fn supernode_record(sn: &Supernode, validator_moniker: String) -> SupernodeRecord {
    let (current_state, current_state_height) = latest_state(&sn.states);
    SupernodeRecord {
        supernode_account: sn.supernode_account.clone(),
        validator_address: sn.validator_address.clone(),
        validator_moniker,
        current_state,
        current_state_height,
        ip_address: latest_ip_address(&sn.prev_ip_addresses),
        p2p_port: sn.p2p_port.parse().ok(),
        protocol_version: if sn.note.is_empty() {
            DEFAULT_PROTOCOL_VERSION.to_owned()
        } else {
            sn.note.clone()
        },
        state_history: serde_json::to_value(&sn.states).ok(),
        evidence: (!sn.evidence.is_null()).then(|| sn.evidence.clone()),
        prev_ip_addresses: serde_json::to_value(&sn.prev_ip_addresses).ok(),
        metrics_report: None,
        registered_services: None,
        running_tasks: None,
    }
}

/// The entry with the numerically greatest height. The history arrays are
/// chronological by convention only, so array position is never trusted.
fn latest_state(states: &[SupernodeState]) -> (String, String) {
    if states.is_empty() {
        return (UNKNOWN_SUPERNODE_STATE.to_owned(), String::new());
    }
    let mut max_idx = 0;
    let mut max_height: i64 = 0;
    for (i, entry) in states.iter().enumerate() {
        if let Ok(height) = entry.height.parse::<i64>() {
            if height > max_height {
                max_height = height;
                max_idx = i;
            }
        }
    }
    (states[max_idx].state.clone(), states[max_idx].height.clone())
}

/// Same argmax rule as [`latest_state`], for the IP history.
fn latest_ip_address(addresses: &[PrevIpAddress]) -> String {
    if addresses.is_empty() {
        return String::new();
    }
    let mut max_idx = 0;
    let mut max_height: i64 = 0;
    for (i, entry) in addresses.iter().enumerate() {
        if let Ok(height) = entry.height.parse::<i64>() {
            if height > max_height {
                max_height = height;
                max_idx = i;
            }
        }
    }
    addresses[max_idx].address.clone()
}

fn effective_p2p_port(stored: Option<i32>) -> u16 {
    match stored {
        Some(port) if port > 0 => u16::try_from(port).unwrap_or(DEFAULT_P2P_PORT),
        _ => DEFAULT_P2P_PORT,
    }
}

/// The chain reports declared file sizes in kilobytes.
fn size_bytes_from_kbs(file_size_kbs: &str) -> i64 {
    file_size_kbs.parse::<i64>().map(|kb| kb * 1024).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn state(state: &str, height: &str) -> SupernodeState {
        SupernodeState {
            state: state.to_owned(),
            height: height.to_owned(),
        }
    }

    #[test]
    fn latest_state_picks_numeric_argmax() {
        let states = vec![
            state("SUPERNODE_STATE_ACTIVE", "412540"),
            state("SUPERNODE_STATE_DISABLED", "517710"),
            state("SUPERNODE_STATE_ACTIVE", "517799"),
            state("SUPERNODE_STATE_STOPPED", "890394"),
            state("SUPERNODE_STATE_ACTIVE", "890403"),
        ];
        assert_eq!(
            latest_state(&states),
            ("SUPERNODE_STATE_ACTIVE".to_owned(), "890403".to_owned())
        );
    }

    #[test]
    fn latest_state_ignores_array_order() {
        let states = vec![
            state("SUPERNODE_STATE_ACTIVE", "890403"),
            state("SUPERNODE_STATE_STOPPED", "412540"),
        ];
        assert_eq!(
            latest_state(&states),
            ("SUPERNODE_STATE_ACTIVE".to_owned(), "890403".to_owned())
        );
    }

    #[test]
    fn latest_state_empty_history() {
        assert_eq!(
            latest_state(&[]),
            (UNKNOWN_SUPERNODE_STATE.to_owned(), String::new())
        );
    }

    #[test]
    fn latest_state_skips_unparseable_heights() {
        let states = vec![
            state("SUPERNODE_STATE_DISABLED", "not-a-number"),
            state("SUPERNODE_STATE_ACTIVE", "100"),
        ];
        assert_eq!(
            latest_state(&states),
            ("SUPERNODE_STATE_ACTIVE".to_owned(), "100".to_owned())
        );
    }

    #[test]
    fn latest_ip_picks_numeric_argmax() {
        let addresses = vec![
            PrevIpAddress {
                address: "1.1.1.1:4444".to_owned(),
                height: "100".to_owned(),
            },
            PrevIpAddress {
                address: "2.2.2.2:4444".to_owned(),
                height: "900".to_owned(),
            },
            PrevIpAddress {
                address: "3.3.3.3:4444".to_owned(),
                height: "500".to_owned(),
            },
        ];
        assert_eq!(latest_ip_address(&addresses), "2.2.2.2:4444");
        assert_eq!(latest_ip_address(&[]), "");
    }

    #[test]
    fn p2p_port_fallback() {
        assert_eq!(effective_p2p_port(Some(4445)), 4445);
        assert_eq!(effective_p2p_port(Some(26656)), 26656);
        assert_eq!(effective_p2p_port(Some(0)), DEFAULT_P2P_PORT);
        assert_eq!(effective_p2p_port(Some(-1)), DEFAULT_P2P_PORT);
        assert_eq!(effective_p2p_port(Some(100_000)), DEFAULT_P2P_PORT);
        assert_eq!(effective_p2p_port(None), DEFAULT_P2P_PORT);
    }

    #[test]
    fn size_conversion() {
        assert_eq!(size_bytes_from_kbs("2"), 2048);
        assert_eq!(size_bytes_from_kbs(""), 0);
        assert_eq!(size_bytes_from_kbs("x"), 0);
    }

    #[test]
    fn single_flight_guard() {
        let guard = SingleFlight::new();
        assert!(guard.try_begin());
        assert!(!guard.try_begin());
        guard.end();
        assert!(guard.try_begin());
    }

    #[test]
    fn supernode_record_derivations() {
        let sn = Supernode {
            validator_address: "lumeravaloper1v".to_owned(),
            supernode_account: "lumera1sn".to_owned(),
            states: vec![
                state("SUPERNODE_STATE_ACTIVE", "100"),
                state("SUPERNODE_STATE_STOPPED", "50"),
            ],
            prev_ip_addresses: vec![PrevIpAddress {
                address: "1.2.3.4:4444".to_owned(),
                height: "100".to_owned(),
            }],
            note: String::new(),
            p2p_port: "26656".to_owned(),
            evidence: serde_json::Value::Null,
        };
        let record = supernode_record(&sn, "alice".to_owned());
        assert_eq!(record.current_state, "SUPERNODE_STATE_ACTIVE");
        assert_eq!(record.current_state_height, "100");
        assert_eq!(record.ip_address, "1.2.3.4:4444");
        assert_eq!(record.p2p_port, Some(26656));
        assert_eq!(record.protocol_version, DEFAULT_PROTOCOL_VERSION);
        assert_eq!(record.validator_moniker, "alice");
        assert_eq!(record.evidence, None);
        // Probe-owned blobs are never supplied by the chain sync.
        assert_eq!(record.metrics_report, None);
        assert_eq!(record.registered_services, None);
        assert_eq!(record.running_tasks, None);
    }
}
