use std::fmt;

use serde::de::Deserializer;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// A coin amount as the chain reports it.
///
/// The chain emits two encodings for the same thing: a struct
/// `{"denom":"ulume","amount":"10090"}` and a bare string `"10090ulume"`.
/// Both must be accepted indefinitely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Coin {
    pub amount: String,
    pub denom: String,
}

impl Coin {
    pub fn new(amount: &str, denom: &str) -> Self {
        Self {
            amount: amount.to_owned(),
            denom: denom.to_owned(),
        }
    }

    /// Parses the bare string form by splitting on the first non-digit.
    pub fn parse(s: &str) -> Self {
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or_else(|| s.len());
        Self {
            amount: s[..split].to_owned(),
            denom: s[split..].to_owned(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.amount.is_empty() && self.denom.is_empty()
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

impl<'de> Deserialize<'de> for Coin {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Anything that is neither of the two known shapes decodes to an
        // empty coin rather than failing the enclosing record.
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::String(s) => Coin::parse(&s),
            Value::Object(map) => {
                let field = |key: &str| {
                    map.get(key)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned()
                };
                Coin {
                    amount: field("amount"),
                    denom: field("denom"),
                }
            }
            _ => Coin::default(),
        })
    }
}

/// Lifecycle transaction kinds tracked per action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxType {
    Register,
    Finalize,
    Approve,
}

impl TxType {
    pub const ALL: [TxType; 3] = [TxType::Register, TxType::Finalize, TxType::Approve];

    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Register => "register",
            TxType::Finalize => "finalize",
            TxType::Approve => "approve",
        }
    }

    /// Event attribute used to search the chain for this transaction kind.
    pub fn event_attribute(&self) -> &'static str {
        match self {
            TxType::Register => "action_registered.action_id",
            TxType::Finalize => "action_finalized.action_id",
            TxType::Approve => "action_approved.action_id",
        }
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn coin_parse_string_form() {
        let coin = Coin::parse("10090ulume");
        assert_eq!(coin.amount, "10090");
        assert_eq!(coin.denom, "ulume");
    }

    #[test]
    fn coin_parse_no_denom() {
        let coin = Coin::parse("42");
        assert_eq!(coin.amount, "42");
        assert_eq!(coin.denom, "");
    }

    #[test]
    fn coin_parse_no_amount() {
        let coin = Coin::parse("ulume");
        assert_eq!(coin.amount, "");
        assert_eq!(coin.denom, "ulume");
    }

    #[test]
    fn coin_parse_empty() {
        assert_eq!(Coin::parse(""), Coin::default());
    }

    #[test]
    fn coin_roundtrip_is_stable() {
        let coin = Coin::parse("10090ulume");
        let reparsed = Coin::parse(&coin.to_string());
        assert_eq!(coin, reparsed);
    }

    #[test]
    fn coin_deserializes_struct_form() {
        let coin: Coin = serde_json::from_str(r#"{"denom":"ulume","amount":"10090"}"#).unwrap();
        assert_eq!(coin, Coin::new("10090", "ulume"));
    }

    #[test]
    fn coin_deserializes_string_form() {
        let coin: Coin = serde_json::from_str(r#""10090ulume""#).unwrap();
        assert_eq!(coin, Coin::new("10090", "ulume"));
    }

    #[test]
    fn coin_both_forms_agree() {
        let from_struct: Coin =
            serde_json::from_str(r#"{"denom":"ulume","amount":"10090"}"#).unwrap();
        let from_string: Coin = serde_json::from_str(r#""10090ulume""#).unwrap();
        assert_eq!(from_struct, from_string);
    }

    #[test]
    fn coin_tolerates_unexpected_shapes() {
        let coin: Coin = serde_json::from_str("123").unwrap();
        assert_eq!(coin, Coin::default());
        let coin: Coin = serde_json::from_str("null").unwrap();
        assert_eq!(coin, Coin::default());
    }

    #[test]
    fn tx_type_event_attributes() {
        assert_eq!(
            TxType::Register.event_attribute(),
            "action_registered.action_id"
        );
        assert_eq!(
            TxType::Finalize.event_attribute(),
            "action_finalized.action_id"
        );
        assert_eq!(
            TxType::Approve.event_attribute(),
            "action_approved.action_id"
        );
    }
}
