use thiserror::Error;

use crate::types::UserId;

/// Unexpected failures of the persistence layer.
///
/// Anything surfacing through this type aborts the operation in progress; sled
/// transactions guarantee that no partial balance mutation survives it.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Wrapper around IO errors (directory creation, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Returned when deserializing a record with an unexpected schema version.
    #[error("schema mismatch for {entity}: expected {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },

    /// A key in one of the trees does not have the expected layout.
    #[error("corrupt key in {tree}")]
    CorruptKey { tree: &'static str },
}

/// Expected business rejections. These are ordinary outcomes, not failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("player {0} not found")]
    PlayerNotFound(UserId),

    #[error("cannot transfer to yourself")]
    SelfTransfer,

    #[error("insufficient funds for {user_id}: balance {balance}, required {required}")]
    InsufficientFunds {
        user_id: UserId,
        balance: u64,
        required: u64,
    },

    #[error("amount must be positive")]
    ZeroAmount,

    #[error("purchase request {0} not found")]
    RequestNotFound(u64),

    /// The request exists but is not in a state that allows the operation.
    #[error("purchase request {0} is not actionable")]
    RequestNotActionable(u64),

    #[error("scheduled payment {0} not found")]
    PaymentNotFound(u64),

    #[error("scheduled payment {0} already executed")]
    PaymentAlreadyExecuted(u64),
}
