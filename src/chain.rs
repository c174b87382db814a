pub mod models;
pub mod transfers;

use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::types::TxType;
use models::Action;
use models::ActionsResponse;
use models::ModuleAccountResponse;
use models::Supernode;
use models::SupernodesResponse;
use models::TxSearchResponse;
use models::Validator;
use models::ValidatorsResponse;
use transfers::ActionContext;
use transfers::ObservedTx;

const VALIDATORS_PATH: &str = "/cosmos/staking/v1beta1/validators";
const SUPERNODES_PATH: &str = "/LumeraProtocol/lumera/supernode/v1/list_super_nodes";
const ACTIONS_PATH: &str = "/LumeraProtocol/lumera/action/v1/list_actions";
const TX_SEARCH_PATH: &str = "/cosmos/tx/v1beta1/txs";
const MODULE_ACCOUNT_PATH: &str = "/cosmos/auth/v1beta1/module_accounts/action";

/// How much of an error body is worth carrying around.
const MAX_ERROR_BODY: usize = 4096;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("http {method} {url}: {status}: {body}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("chain returned an empty module account address")]
    EmptyModuleAccount,
}

/// Typed client for the chain's REST surface.
///
/// Pagination is cursor-in/cursor-out; loop control stays with callers.
pub struct ChainClient {
    base_url: String,
    http: reqwest::Client,
    /// Settlement module address, cached for the process lifetime after the
    /// first successful lookup.
    module_account: OnceCell<String>,
}

impl ChainClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ChainError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("lumewatch/0.1")
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            http,
            module_account: OnceCell::new(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ChainError> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let url = response.url().to_string();
            let body = response.text().await.unwrap_or_default();
            return Err(ChainError::Status {
                method: "GET",
                url,
                status: status.as_u16(),
                body: truncate_body(body),
            });
        }
        Ok(response.json().await?)
    }

    /// Fetches one page of validators, all statuses.
    pub async fn validators(
        &self,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<(Vec<Validator>, Option<String>), ChainError> {
        let limit = limit.to_string();
        let mut query: Vec<(&str, &str)> = vec![("pagination.limit", &limit)];
        if let Some(key) = cursor {
            query.push(("pagination.key", key));
        }
        let out: ValidatorsResponse = self.get_json(VALIDATORS_PATH, &query).await?;
        Ok((out.validators, out.pagination.next_cursor()))
    }

    /// Fetches one page of supernodes.
    pub async fn supernodes(
        &self,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<(Vec<Supernode>, Option<String>), ChainError> {
        let limit = limit.to_string();
        let mut query: Vec<(&str, &str)> = vec![("pagination.limit", &limit)];
        if let Some(key) = cursor {
            query.push(("pagination.key", key));
        }
        let out: SupernodesResponse = self.get_json(SUPERNODES_PATH, &query).await?;
        Ok((out.supernodes, out.pagination.next_cursor()))
    }

    /// Fetches one page of actions, unfiltered by type and state.
    pub async fn actions(
        &self,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<(Vec<Action>, Option<String>), ChainError> {
        let limit = limit.to_string();
        let mut query: Vec<(&str, &str)> = vec![
            ("actionType", "ACTION_TYPE_UNSPECIFIED"),
            ("actionState", "ACTION_STATE_UNSPECIFIED"),
            ("pagination.limit", &limit),
        ];
        if let Some(key) = cursor {
            query.push(("pagination.key", key));
        }
        let out: ActionsResponse = self.get_json(ACTIONS_PATH, &query).await?;
        Ok((out.actions, out.pagination.next_cursor()))
    }

    /// Searches transactions by an event attribute, e.g.
    /// `action_registered.action_id = 123`.
    pub async fn search_txs_by_event(
        &self,
        attribute: &str,
        value: &str,
    ) -> Result<TxSearchResponse, ChainError> {
        let condition = format!("{attribute}={value}");
        let query: Vec<(&str, &str)> = vec![("query", &condition), ("pagination.limit", "10")];
        self.get_json(TX_SEARCH_PATH, &query).await
    }

    /// The settlement module's account address, fetched lazily and cached.
    pub async fn module_account(&self) -> Result<&str, ChainError> {
        self.module_account
            .get_or_try_init(|| async {
                let out: ModuleAccountResponse = self.get_json(MODULE_ACCOUNT_PATH, &[]).await?;
                let addr = out.account.base_account.address;
                if addr.is_empty() {
                    return Err(ChainError::EmptyModuleAccount);
                }
                tracing::info!("cached settlement module address {addr}");
                Ok(addr)
            })
            .await
            .map(String::as_str)
    }

    /// Pre-seeds the module address so no lookup happens. Test hook.
    pub fn set_module_account(&self, addr: &str) {
        let _ = self.module_account.set(addr.to_owned());
    }

    /// Observes all lifecycle transactions for one action.
    ///
    /// Runs one event search per transaction type. Failed searches are
    /// logged and skipped so a partial chain response still yields the
    /// transactions that could be observed.
    pub async fn action_lifecycle_txs(&self, ctx: &ActionContext) -> Vec<ObservedTx> {
        let module_addr = match self.module_account().await {
            Ok(addr) => Some(addr.to_owned()),
            Err(e) => {
                // Selection falls back to creator/signer tiers.
                tracing::warn!("settlement module address unavailable: {e}");
                None
            }
        };

        let action_id = ctx.action_id.to_string();
        let mut observed = Vec::new();
        for tx_type in TxType::ALL {
            let search = match self
                .search_txs_by_event(tx_type.event_attribute(), &action_id)
                .await
            {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("tx search for action {} ({tx_type}) failed: {e}", ctx.action_id);
                    continue;
                }
            };
            if !search.tx_responses.is_empty() {
                tracing::debug!(
                    "found {} {tx_type} transaction(s) for action {}",
                    search.tx_responses.len(),
                    ctx.action_id
                );
            }
            for (i, result) in search.tx_responses.iter().enumerate() {
                observed.push(transfers::parse_tx_result(
                    ctx,
                    tx_type,
                    result,
                    search.txs.get(i),
                    module_addr.as_deref(),
                ));
            }
        }
        observed
    }
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body.trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn truncate_body_respects_char_boundaries() {
        let ascii = "x".repeat(MAX_ERROR_BODY + 100);
        assert_eq!(truncate_body(ascii).len(), MAX_ERROR_BODY);

        // Multi-byte char straddling the cut point must not panic.
        let mut tricky = "x".repeat(MAX_ERROR_BODY - 1);
        tricky.push('é');
        tricky.push_str("tail");
        let truncated = truncate_body(tricky);
        assert!(truncated.len() <= MAX_ERROR_BODY);
        assert!(truncated.ends_with('x'));
    }

    #[test]
    fn truncate_body_leaves_short_bodies_alone() {
        assert_eq!(truncate_body("  short  ".to_owned()), "short");
    }
}
