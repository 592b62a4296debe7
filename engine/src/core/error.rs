use crate::config::ConfigError;
use crate::core::{queue::QueueError, storage::StoreError};
use kolo_common::{
    amount::{Amount, AmountError},
    currency::{Currency, CurrencyError},
};
use thiserror::Error;

/// Error type for ledger engine operations.
///
/// Input, access and funds errors surface to the submitting caller and
/// leave no state behind. Invariant and store errors belong to the
/// processor side and drive the compensation paths.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),

    #[error("Invalid currency: {0}")]
    InvalidCurrency(#[from] CurrencyError),

    #[error("Amount must be greater than zero")]
    NonPositiveAmount,

    #[error("Sender and recipient accounts must differ")]
    SelfTransfer,

    #[error("Invalid address: {0}")]
    InvalidAddress(&'static str),

    #[error("Currency mismatch: account holds {account}, transfer is {requested}")]
    CurrencyMismatch {
        account: Currency,
        requested: Currency,
    },

    /// Recipient account does not exist.
    #[error("Account not found")]
    AccountNotFound,

    /// Sender account is missing or not owned by the requesting user.
    #[error("Account is not accessible by this user")]
    Forbidden,

    #[error("Insufficient funds: need {need}, available {available}")]
    InsufficientFunds { need: Amount, available: Amount },

    /// A ledger invariant did not hold at execution time.
    #[error("Invariant violation: {0}")]
    Invariant(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
