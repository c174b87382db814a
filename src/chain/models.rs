//! Wire models for the chain REST surface.
//!
//! Every field is defaulted: the chain omits empty fields freely and a
//! missing attribute must never fail an entire page of records.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::types::Coin;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub next_key: Option<String>,
    #[serde(default)]
    pub total: Option<String>,
}

impl Pagination {
    /// The next cursor, with the chain's "empty means done" convention folded in.
    pub fn next_cursor(mut self) -> Option<String> {
        match self.next_key.take() {
            Some(key) if !key.is_empty() => Some(key),
            _ => None,
        }
    }
}

// Validators

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ValidatorsResponse {
    #[serde(default)]
    pub validators: Vec<Validator>,
    #[serde(default)]
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Validator {
    #[serde(default)]
    pub operator_address: String,
    #[serde(default)]
    pub jailed: bool,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub description: ValidatorDescription,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ValidatorDescription {
    #[serde(default)]
    pub moniker: String,
}

// Supernodes

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SupernodesResponse {
    #[serde(default)]
    pub supernodes: Vec<Supernode>,
    #[serde(default)]
    pub pagination: Pagination,
}

/// One state transition in a supernode's on-chain history.
///
/// Heights arrive as decimal strings and are ordered by convention only;
/// deriving the current state must go through a numeric argmax.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct SupernodeState {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub height: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct PrevIpAddress {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub height: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Supernode {
    #[serde(default)]
    pub validator_address: String,
    #[serde(default)]
    pub supernode_account: String,
    #[serde(default)]
    pub states: Vec<SupernodeState>,
    #[serde(default)]
    pub prev_ip_addresses: Vec<PrevIpAddress>,
    /// Protocol version note, e.g. "1.0.0".
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub p2p_port: String,
    /// Kept opaque; persisted as-is.
    #[serde(default)]
    pub evidence: Value,
}

// Actions

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionsResponse {
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Action {
    #[serde(default)]
    pub creator: String,
    #[serde(default, rename = "actionID")]
    pub action_id: String,
    #[serde(default, rename = "actionType")]
    pub action_type: String,
    /// Base64-encoded metadata payload.
    #[serde(default, rename = "metadata")]
    pub metadata_b64: String,
    #[serde(default)]
    pub price: Coin,
    #[serde(default, rename = "expirationTime")]
    pub expiration_time: String,
    #[serde(default)]
    pub state: String,
    #[serde(default, rename = "blockHeight")]
    pub block_height: String,
    #[serde(default, rename = "superNodes")]
    pub super_nodes: Vec<String>,
    #[serde(default, rename = "fileSizeKbs")]
    pub file_size_kbs: String,
}

// Module account

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleAccountResponse {
    #[serde(default)]
    pub account: ModuleAccount,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleAccount {
    #[serde(default)]
    pub base_account: BaseAccount,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BaseAccount {
    #[serde(default)]
    pub address: String,
}

// Transaction search

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxSearchResponse {
    /// Transaction bodies, parallel to `tx_responses`.
    #[serde(default)]
    pub txs: Vec<TxEnvelope>,
    /// Execution results, parallel to `txs`.
    #[serde(default)]
    pub tx_responses: Vec<TxResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxEnvelope {
    #[serde(default)]
    pub body: TxBody,
    #[serde(default)]
    pub auth_info: AuthInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxBody {
    #[serde(default)]
    pub messages: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthInfo {
    #[serde(default)]
    pub fee: Fee,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fee {
    #[serde(default)]
    pub amount: Vec<Coin>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxResult {
    #[serde(default, rename = "txhash")]
    pub tx_hash: String,
    #[serde(default)]
    pub height: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub gas_wanted: String,
    #[serde(default)]
    pub gas_used: String,
    #[serde(default)]
    pub events: Vec<TxEvent>,
    #[serde(default)]
    pub logs: Vec<AbciLog>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxEvent {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Vec<EventAttribute>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventAttribute {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// Per-message execution log. Some chain versions report transfer events
/// here instead of the top-level event list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AbciLog {
    #[serde(default)]
    pub events: Vec<TxEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn action_deserializes_with_string_price() {
        let json = r#"{
            "creator": "lumera1creator",
            "actionID": "123",
            "actionType": "ACTION_TYPE_CASCADE",
            "metadata": "aGVsbG8=",
            "price": "10090ulume",
            "expirationTime": "1000000",
            "state": "ACTION_STATE_DONE",
            "blockHeight": "517799",
            "superNodes": ["lumera1sn"]
        }"#;
        let action: Action = serde_json::from_str(json).unwrap();
        assert_eq!(action.action_id, "123");
        assert_eq!(action.price, Coin::new("10090", "ulume"));
        assert_eq!(action.super_nodes, vec!["lumera1sn".to_owned()]);
    }

    #[test]
    fn action_deserializes_with_struct_price() {
        let json = r#"{"actionID":"7","price":{"denom":"ulume","amount":"10090"}}"#;
        let action: Action = serde_json::from_str(json).unwrap();
        assert_eq!(action.price, Coin::new("10090", "ulume"));
    }

    #[test]
    fn action_tolerates_missing_fields() {
        let action: Action = serde_json::from_str("{}").unwrap();
        assert_eq!(action.action_id, "");
        assert!(action.price.is_empty());
        assert!(action.super_nodes.is_empty());
    }

    #[test]
    fn pagination_empty_key_means_done() {
        let p: Pagination = serde_json::from_str(r#"{"next_key":""}"#).unwrap();
        assert_eq!(p.next_cursor(), None);
        let p: Pagination = serde_json::from_str(r#"{"next_key":null}"#).unwrap();
        assert_eq!(p.next_cursor(), None);
        let p: Pagination = serde_json::from_str(r#"{"next_key":"abc"}"#).unwrap();
        assert_eq!(p.next_cursor(), Some("abc".to_owned()));
    }

    #[test]
    fn tx_search_response_parses_parallel_arrays() {
        let json = r#"{
            "txs": [{"body": {"messages": [{"creator": "lumera1x"}]}, "auth_info": {"fee": {"amount": [{"denom": "ulume", "amount": "500"}]}}}],
            "tx_responses": [{
                "txhash": "ABC123",
                "height": "42",
                "timestamp": "2024-05-01T12:00:00Z",
                "gas_wanted": "200000",
                "gas_used": "150000",
                "events": [{"type": "transfer", "attributes": [{"key": "sender", "value": "a"}]}],
                "logs": []
            }]
        }"#;
        let resp: TxSearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.txs.len(), 1);
        assert_eq!(resp.tx_responses.len(), 1);
        assert_eq!(resp.tx_responses[0].tx_hash, "ABC123");
        assert_eq!(resp.txs[0].auth_info.fee.amount[0].amount, "500");
        assert_eq!(resp.tx_responses[0].events[0].kind, "transfer");
    }
}
