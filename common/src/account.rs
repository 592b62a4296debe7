use crate::{
    amount::Amount,
    config::{ACCOUNT_ADDRESS_PREFIX, HANDLE_BYTES},
    crypto::secure_random_bytes,
    currency::Currency,
    id::Id,
};
use serde::de::Error as SerdeError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Error, Formatter};

// Account nonce, strictly increasing per outbound transfer
pub type Nonce = u64;

/// External account handle: `acc_` followed by 32 hex characters.
/// Opaque to clients; never derived from the row id.
#[derive(Eq, PartialEq, Clone, Debug, Hash)]
pub struct SystemAddress(String);

impl SystemAddress {
    pub fn generate() -> Self {
        let bytes = secure_random_bytes::<HANDLE_BYTES>();
        SystemAddress(format!("{}{}", ACCOUNT_ADDRESS_PREFIX, hex::encode(bytes)))
    }

    pub fn parse(value: &str) -> Result<Self, &'static str> {
        let hex_part = value
            .strip_prefix(ACCOUNT_ADDRESS_PREFIX)
            .ok_or("Missing account address prefix")?;
        if hex_part.len() != HANDLE_BYTES * 2 || hex::decode(hex_part).is_err() {
            return Err("Invalid account address");
        }
        Ok(SystemAddress(value.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SystemAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", self.0)
    }
}

impl Serialize for SystemAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'a> Deserialize<'a> for SystemAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let value = String::deserialize(deserializer)?;
        SystemAddress::parse(&value).map_err(SerdeError::custom)
    }
}

/// Wallet row. Owned by the account-management collaborator; the engine
/// only reads `user_id` for the ownership check. The mnemonic is stored
/// encrypted by the key vault and is opaque bytes here.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Wallet {
    pub id: Id,
    pub user_id: Id,
    #[serde(with = "hex")]
    pub encrypted_mnemonic: Vec<u8>,
}

/// Currency-scoped account under a wallet.
///
/// Invariants, also enforced by store check constraints:
/// - `balance >= locked` and both are non-negative by construction
/// - `address` is globally unique
/// - `(wallet_id, currency)` is unique
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Account {
    pub id: Id,
    pub address: SystemAddress,
    pub wallet_id: Id,
    pub currency: Currency,
    pub balance: Amount,
    pub locked: Amount,
    pub nonce: Nonce,
}

impl Account {
    pub fn new(wallet_id: Id, currency: Currency) -> Self {
        Account {
            id: Id::random(),
            address: SystemAddress::generate(),
            wallet_id,
            currency,
            balance: 0,
            locked: 0,
            nonce: 0,
        }
    }

    /// Funds not reserved against an in-flight outbound transfer.
    pub fn available(&self) -> Amount {
        self.balance.saturating_sub(self.locked)
    }
}
