use crate::{
    account::Nonce,
    amount::Amount,
    config::{HANDLE_BYTES, TX_HASH_PREFIX},
    crypto::secure_random_bytes,
    currency::Currency,
    id::Id,
    time::TimestampMillis,
};
use serde::de::Error as SerdeError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Error, Formatter};
use strum::Display as StrumDisplay;

/// External transaction handle: `txn_` followed by 32 hex characters.
#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Debug, Hash)]
pub struct SystemTxHash(String);

impl SystemTxHash {
    pub fn generate() -> Self {
        let bytes = secure_random_bytes::<HANDLE_BYTES>();
        SystemTxHash(format!("{}{}", TX_HASH_PREFIX, hex::encode(bytes)))
    }

    pub fn parse(value: &str) -> Result<Self, &'static str> {
        let hex_part = value
            .strip_prefix(TX_HASH_PREFIX)
            .ok_or("Missing transaction hash prefix")?;
        if hex_part.len() != HANDLE_BYTES * 2 || hex::decode(hex_part).is_err() {
            return Err("Invalid transaction hash");
        }
        Ok(SystemTxHash(value.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SystemTxHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", self.0)
    }
}

impl Serialize for SystemTxHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'a> Deserialize<'a> for SystemTxHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let value = String::deserialize(deserializer)?;
        SystemTxHash::parse(&value).map_err(SerdeError::custom)
    }
}

/// Closed set of transaction states.
///
/// Legal transitions:
/// - PENDING -> PROCESSING (executor takes ownership)
/// - PROCESSING -> CONFIRMED (block seal)
/// - PENDING | PROCESSING -> FAILED
///
/// CONFIRMED, FAILED and CANCELLED are terminal. CANCELLED exists for
/// operator tooling and is never produced by the pipeline.
#[derive(Serialize, Deserialize, StrumDisplay, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "UPPERCASE")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Confirmed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Confirmed | TransactionStatus::Failed | TransactionStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Processing, Confirmed) | (Pending, Failed) | (Processing, Failed)
        )
    }
}

// this enum represents all transfer kinds the ledger records
#[derive(Serialize, Deserialize, StrumDisplay, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "UPPERCASE")]
pub enum TransactionKind {
    Transfer,
}

/// Ledger transaction row.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Transaction {
    pub id: Id,
    pub system_hash: SystemTxHash,
    pub from_account_id: Id,
    pub to_account_id: Id,
    pub amount: Amount,
    pub currency: Currency,
    pub fee: Amount,
    pub status: TransactionStatus,
    pub kind: TransactionKind,
    /// Sender nonce captured at submission, recorded for audit ordering.
    /// Not enforced at execution time.
    pub account_nonce: Nonce,
    pub description: Option<String>,
    /// Set when the row reaches FAILED; human-readable cause.
    pub failure_reason: Option<String>,
    pub block_id: Option<Id>,
    pub block_height: Option<u64>,
    pub created_at: TimestampMillis,
}
