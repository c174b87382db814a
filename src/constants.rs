/// Transaction hash recorded when an action was checked and no lifecycle
/// transactions exist on chain. Lets the enricher skip the action on later
/// passes. Never surfaced by the API.
pub const PLACEHOLDER_TX_HASH: &str = "_NO_TX_FOUND_";

/// P2P port assumed when the chain record does not carry one.
pub const DEFAULT_P2P_PORT: u16 = 4445;

/// Port serving the supernode status API.
pub const STATUS_API_PORT: u16 = 8002;

/// Protocol version assumed when the chain note is empty.
pub const DEFAULT_PROTOCOL_VERSION: &str = "1.0.0";

/// Chain state reported when a supernode has no state history.
pub const UNKNOWN_SUPERNODE_STATE: &str = "SUPERNODE_STATE_UNKNOWN";
