use crate::crypto::secure_random_bytes;
use serde::de::Error as SerdeError;
use serde::{Deserialize, Serialize};
use std::{
    convert::TryInto,
    fmt::{Display, Error, Formatter},
    str::FromStr,
};

pub const ID_SIZE: usize = 16;

/// Row identifier: 16 random bytes, hex encoded for display and storage.
/// Every persisted entity (wallet, account, transaction, block) is keyed
/// by one of these.
#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Debug, Hash)]
pub struct Id([u8; ID_SIZE]);

impl Id {
    pub const fn new(bytes: [u8; ID_SIZE]) -> Self {
        Id(bytes)
    }

    pub fn random() -> Self {
        Id(secure_random_bytes::<ID_SIZE>())
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Id {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| "Invalid hex string")?;
        let bytes: [u8; ID_SIZE] = bytes.try_into().map_err(|_| "Invalid id")?;
        Ok(Id::new(bytes))
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", &self.to_hex())
    }
}

impl Serialize for Id {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'a> Deserialize<'a> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let hex = String::deserialize(deserializer)?;
        Id::from_str(&hex).map_err(SerdeError::custom)
    }
}
