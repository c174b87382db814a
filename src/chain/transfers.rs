//! Transfer-flow extraction for action lifecycle transactions.
//!
//! A lifecycle transaction can carry several `transfer` events; exactly one
//! of them is the action's economic settlement. Which one depends on the
//! transaction type and on which parties can be identified, so selection is
//! a cascade of preferences with the first match winning. Transaction shapes
//! vary across chain versions, hence the long tail of fallbacks.

use chrono::DateTime;
use chrono::Utc;
use serde_json::Value;

use super::models::EventAttribute;
use super::models::TxEnvelope;
use super::models::TxResult;
use crate::types::Coin;
use crate::types::TxType;

/// Action fields needed to classify transfer flows.
#[derive(Debug, Clone, Default)]
pub struct ActionContext {
    pub action_id: i64,
    pub creator: String,
    /// First assigned supernode account, when any.
    pub supernode_account: String,
}

/// One lifecycle transaction as observed on chain, ready for persistence.
#[derive(Debug, Clone)]
pub struct ObservedTx {
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

/// A single token transfer seen in a transaction's events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transfer {
    pub amount: Option<String>,
    pub denom: Option<String>,
    pub payer: Option<String>,
    pub payee: Option<String>,
}

impl Transfer {
    fn payer_is(&self, addr: &str) -> bool {
        !addr.is_empty() && self.payer.as_deref() == Some(addr)
    }

    fn payee_is(&self, addr: &str) -> bool {
        !addr.is_empty() && self.payee.as_deref() == Some(addr)
    }
}

/// Builds a persistence-ready record from one search hit.
///
/// `envelope` may be absent when the chain returned fewer bodies than
/// execution results; fee and signer extraction degrade gracefully.
pub fn parse_tx_result(
    ctx: &ActionContext,
    tx_type: TxType,
    result: &TxResult,
    envelope: Option<&TxEnvelope>,
    module_addr: Option<&str>,
) -> ObservedTx {
    let mut observed = ObservedTx {
        action_id: ctx.action_id,
        tx_type,
        tx_hash: result.tx_hash.clone(),
        height: result.height.parse().unwrap_or(0),
        block_time: parse_block_time(&result.timestamp),
        gas_wanted: result.gas_wanted.parse().ok(),
        gas_used: result.gas_used.parse().ok(),
        action_price: None,
        action_price_denom: None,
        flow_payer: None,
        flow_payee: None,
        tx_fee: None,
        tx_fee_denom: None,
    };

    if let Some(fee) = envelope.and_then(|e| e.auth_info.fee.amount.first()) {
        observed.tx_fee = Some(fee.amount.clone());
        observed.tx_fee_denom = Some(fee.denom.clone());
    }

    let signer = extract_tx_signer(envelope);
    let transfers = collect_transfers(result);
    if let Some(flow) = select_settlement(tx_type, &transfers, ctx, module_addr, signer.as_deref())
    {
        observed.action_price = flow.amount.clone();
        observed.action_price_denom = flow.denom.clone();
        observed.flow_payer = flow.payer.clone();
        observed.flow_payee = flow.payee.clone();
    }

    observed
}

fn parse_block_time(timestamp: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Signer of the first message body: `creator`, `sender`, `from_address`
/// or `signer`, first non-empty wins.
pub fn extract_tx_signer(envelope: Option<&TxEnvelope>) -> Option<String> {
    let message = envelope?.body.messages.first()?;
    for field in ["creator", "sender", "from_address", "signer"] {
        if let Some(Value::String(s)) = message.get(field) {
            if !s.is_empty() {
                return Some(s.clone());
            }
        }
    }
    None
}

/// All `transfer` events from the top-level list and the per-log lists.
pub fn collect_transfers(result: &TxResult) -> Vec<Transfer> {
    let top = result.events.iter();
    let logged = result.logs.iter().flat_map(|log| log.events.iter());
    top.chain(logged)
        .filter(|event| event.kind == "transfer")
        .filter_map(|event| parse_transfer_event(&event.attributes))
        .collect()
}

fn parse_transfer_event(attrs: &[EventAttribute]) -> Option<Transfer> {
    let mut transfer = Transfer::default();
    for attr in attrs {
        match attr.key.as_str() {
            "sender" => transfer.payer = Some(attr.value.clone()),
            "recipient" => transfer.payee = Some(attr.value.clone()),
            "amount" => {
                let coin = Coin::parse(&attr.value);
                if !coin.amount.is_empty() {
                    transfer.amount = Some(coin.amount);
                }
                if !coin.denom.is_empty() {
                    transfer.denom = Some(coin.denom);
                }
            }
            _ => (),
        }
    }
    // A transfer with neither party identified is useless for flow tracking.
    if transfer.payer.is_none() && transfer.payee.is_none() {
        return None;
    }
    Some(transfer)
}

/// Picks the settlement transfer for the given transaction type.
///
/// Register moves funds creator -> module; finalize and approve move them
/// module -> worker. Each preference tier only applies when the addresses it
/// needs are known.
pub fn select_settlement<'a>(
    tx_type: TxType,
    transfers: &'a [Transfer],
    ctx: &ActionContext,
    module_addr: Option<&str>,
    signer: Option<&str>,
) -> Option<&'a Transfer> {
    if transfers.is_empty() {
        return None;
    }
    let module = module_addr.unwrap_or_default();
    let signer = signer.unwrap_or_default();

    match tx_type {
        TxType::Register => transfers
            .iter()
            .find(|t| t.payee_is(module))
            .or_else(|| transfers.iter().find(|t| t.payer_is(&ctx.creator)))
            .or_else(|| transfers.first()),
        TxType::Finalize | TxType::Approve => transfers
            .iter()
            .find(|t| t.payer_is(module) && t.payee_is(signer))
            .or_else(|| {
                transfers
                    .iter()
                    .find(|t| t.payer_is(module) && t.payee_is(&ctx.supernode_account))
            })
            .or_else(|| transfers.iter().find(|t| t.payer_is(module)))
            .or_else(|| transfers.iter().find(|t| t.payee_is(signer)))
            .or_else(|| transfers.iter().find(|t| t.payee_is(&ctx.supernode_account)))
            .or_else(|| {
                transfers
                    .iter()
                    .find(|t| !ctx.creator.is_empty() && !t.payer_is(&ctx.creator))
            })
            .or_else(|| transfers.first()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn transfer(payer: &str, payee: &str, amount: &str) -> Transfer {
        let coin = Coin::parse(amount);
        Transfer {
            amount: (!coin.amount.is_empty()).then(|| coin.amount),
            denom: (!coin.denom.is_empty()).then(|| coin.denom),
            payer: (!payer.is_empty()).then(|| payer.to_owned()),
            payee: (!payee.is_empty()).then(|| payee.to_owned()),
        }
    }

    fn ctx() -> ActionContext {
        ActionContext {
            action_id: 123,
            creator: "lumera1creator".to_owned(),
            supernode_account: "lumera1sn".to_owned(),
        }
    }

    #[test]
    fn register_prefers_transfer_into_module() {
        let transfers = vec![
            transfer("other", "other2", "1ulume"),
            transfer("lumera1creator", "lumera1module", "10090ulume"),
        ];
        let selected =
            select_settlement(TxType::Register, &transfers, &ctx(), Some("lumera1module"), None)
                .unwrap();
        assert_eq!(selected, &transfers[1]);
        assert_eq!(selected.payer.as_deref(), Some("lumera1creator"));
        assert_eq!(selected.payee.as_deref(), Some("lumera1module"));
    }

    #[test]
    fn register_falls_back_to_creator_as_payer() {
        let transfers = vec![
            transfer("other", "other2", "1ulume"),
            transfer("lumera1creator", "somewhere", "10090ulume"),
        ];
        let selected = select_settlement(TxType::Register, &transfers, &ctx(), None, None).unwrap();
        assert_eq!(selected, &transfers[1]);
    }

    #[test]
    fn register_falls_back_to_first_transfer() {
        let transfers = vec![transfer("a", "b", "5ulume"), transfer("c", "d", "6ulume")];
        let selected = select_settlement(TxType::Register, &transfers, &ctx(), None, None).unwrap();
        assert_eq!(selected, &transfers[0]);
    }

    #[test]
    fn finalize_prefers_module_to_signer() {
        let transfers = vec![transfer("lumera1module", "lumera1sn", "10090ulume")];
        let selected = select_settlement(
            TxType::Finalize,
            &transfers,
            &ctx(),
            Some("lumera1module"),
            Some("lumera1sn"),
        )
        .unwrap();
        assert_eq!(selected, &transfers[0]);
    }

    #[test]
    fn finalize_module_to_supernode_when_signer_differs() {
        let transfers = vec![
            transfer("lumera1module", "lumera1other", "1ulume"),
            transfer("lumera1module", "lumera1sn", "10090ulume"),
        ];
        let selected = select_settlement(
            TxType::Finalize,
            &transfers,
            &ctx(),
            Some("lumera1module"),
            Some("lumera1nobody"),
        )
        .unwrap();
        assert_eq!(selected, &transfers[1]);
    }

    #[test]
    fn finalize_any_module_outflow_as_third_tier() {
        let transfers = vec![
            transfer("lumera1creator", "x", "1ulume"),
            transfer("lumera1module", "y", "2ulume"),
        ];
        let selected = select_settlement(
            TxType::Finalize,
            &transfers,
            &ctx(),
            Some("lumera1module"),
            None,
        )
        .unwrap();
        assert_eq!(selected, &transfers[1]);
    }

    #[test]
    fn finalize_avoids_creator_outflow_when_nothing_else_matches() {
        let transfers = vec![
            transfer("lumera1creator", "x", "1ulume"),
            transfer("stranger", "y", "2ulume"),
        ];
        let selected =
            select_settlement(TxType::Approve, &transfers, &ctx(), None, None).unwrap();
        assert_eq!(selected, &transfers[1]);
    }

    #[test]
    fn empty_transfer_list_selects_nothing() {
        assert_eq!(select_settlement(TxType::Register, &[], &ctx(), None, None), None);
    }

    #[test]
    fn unknown_module_never_matches_empty_addresses() {
        // A transfer with no payee must not match a "" module address.
        let transfers = vec![Transfer {
            amount: Some("1".to_owned()),
            denom: Some("ulume".to_owned()),
            payer: Some("someone".to_owned()),
            payee: None,
        }];
        let selected = select_settlement(TxType::Register, &transfers, &ctx(), None, None).unwrap();
        // Falls through to first transfer, not the module tier.
        assert_eq!(selected, &transfers[0]);
    }

    #[test]
    fn signer_extraction_field_order() {
        let envelope: TxEnvelope = serde_json::from_str(
            r#"{"body":{"messages":[{"sender":"lumera1sender","signer":"lumera1signer"}]}}"#,
        )
        .unwrap();
        assert_eq!(
            extract_tx_signer(Some(&envelope)),
            Some("lumera1sender".to_owned())
        );

        let envelope: TxEnvelope =
            serde_json::from_str(r#"{"body":{"messages":[{"creator":"lumera1c"}]}}"#).unwrap();
        assert_eq!(extract_tx_signer(Some(&envelope)), Some("lumera1c".to_owned()));

        let envelope: TxEnvelope =
            serde_json::from_str(r#"{"body":{"messages":[{"creator":""}]}}"#).unwrap();
        assert_eq!(extract_tx_signer(Some(&envelope)), None);

        assert_eq!(extract_tx_signer(None), None);
    }

    #[test]
    fn collects_transfers_from_events_and_logs() {
        let result: TxResult = serde_json::from_str(
            r#"{
                "events": [
                    {"type": "transfer", "attributes": [
                        {"key": "sender", "value": "a"},
                        {"key": "recipient", "value": "b"},
                        {"key": "amount", "value": "10090ulume"}
                    ]},
                    {"type": "message", "attributes": []}
                ],
                "logs": [
                    {"events": [{"type": "transfer", "attributes": [
                        {"key": "sender", "value": "c"},
                        {"key": "recipient", "value": "d"},
                        {"key": "amount", "value": "5ulume"}
                    ]}]}
                ]
            }"#,
        )
        .unwrap();
        let transfers = collect_transfers(&result);
        assert_eq!(transfers.len(), 2);
        assert_eq!(transfers[0].payer.as_deref(), Some("a"));
        assert_eq!(transfers[0].amount.as_deref(), Some("10090"));
        assert_eq!(transfers[0].denom.as_deref(), Some("ulume"));
        assert_eq!(transfers[1].payee.as_deref(), Some("d"));
    }

    #[test]
    fn transfer_without_parties_is_dropped() {
        let result: TxResult = serde_json::from_str(
            r#"{"events": [{"type": "transfer", "attributes": [{"key": "amount", "value": "1ulume"}]}]}"#,
        )
        .unwrap();
        assert!(collect_transfers(&result).is_empty());
    }

    #[test]
    fn parse_tx_result_stamps_envelope_fields() {
        let result: TxResult = serde_json::from_str(
            r#"{
                "txhash": "DEADBEEF",
                "height": "890403",
                "timestamp": "2024-06-01T10:30:00Z",
                "gas_wanted": "200000",
                "gas_used": "181234",
                "events": [{"type": "transfer", "attributes": [
                    {"key": "sender", "value": "lumera1creator"},
                    {"key": "recipient", "value": "lumera1module"},
                    {"key": "amount", "value": "10090ulume"}
                ]}]
            }"#,
        )
        .unwrap();
        let envelope: TxEnvelope = serde_json::from_str(
            r#"{"body":{"messages":[{"creator":"lumera1creator"}]},
                "auth_info":{"fee":{"amount":[{"denom":"ulume","amount":"500"}]}}}"#,
        )
        .unwrap();

        let observed = parse_tx_result(
            &ctx(),
            TxType::Register,
            &result,
            Some(&envelope),
            Some("lumera1module"),
        );
        assert_eq!(observed.tx_hash, "DEADBEEF");
        assert_eq!(observed.height, 890403);
        assert_eq!(observed.gas_wanted, Some(200000));
        assert_eq!(observed.gas_used, Some(181234));
        assert_eq!(observed.tx_fee.as_deref(), Some("500"));
        assert_eq!(observed.tx_fee_denom.as_deref(), Some("ulume"));
        assert_eq!(observed.action_price.as_deref(), Some("10090"));
        assert_eq!(observed.flow_payer.as_deref(), Some("lumera1creator"));
        assert_eq!(observed.flow_payee.as_deref(), Some("lumera1module"));
    }

    #[test]
    fn parse_tx_result_with_bad_timestamp_and_no_envelope() {
        let result: TxResult =
            serde_json::from_str(r#"{"txhash": "X", "height": "notanumber"}"#).unwrap();
        let observed = parse_tx_result(&ctx(), TxType::Finalize, &result, None, None);
        assert_eq!(observed.height, 0);
        assert_eq!(observed.block_time, DateTime::UNIX_EPOCH);
        assert_eq!(observed.tx_fee, None);
        assert_eq!(observed.action_price, None);
    }
}
