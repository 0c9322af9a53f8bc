// doc constants
pub const DOC_ID: &str = "_id";
pub const DOC_IN_FLIGHT: &str = "_trans";
pub const RESERVED_FIELDS: [&str; 2] = [DOC_ID, DOC_IN_FLIGHT];

// transaction record constants
pub const DEFAULT_TRANSACTION_COLLECTION: &str = "transaction";
pub const TX_NEW: &str = "new";
pub const TX_UPDATE: &str = "update";
pub const TX_DEL: &str = "del";
pub const TX_STATE: &str = "state";

// lifecycle state names as persisted in the transaction record
pub const STATE_INITIAL: &str = "initial";
pub const STATE_PENDING: &str = "pending";
pub const STATE_COMMIT: &str = "commit";
pub const STATE_FINISHED: &str = "finished";
