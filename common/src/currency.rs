use serde::de::Error as SerdeError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Error, Formatter};
use thiserror::Error;

// Codes are short uppercase tickers ("NGN", "USD", "BTC")
const MAX_CODE_LEN: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CurrencyError {
    #[error("Invalid currency code: {0:?}")]
    InvalidCode(String),
}

/// Uppercase currency code. Construction normalizes case so that
/// comparisons are always exact.
#[derive(Eq, PartialEq, Clone, Debug, Hash)]
pub struct Currency(String);

impl Currency {
    pub fn from_code(code: &str) -> Result<Self, CurrencyError> {
        let normalized = code.trim().to_ascii_uppercase();
        if normalized.is_empty()
            || normalized.len() > MAX_CODE_LEN
            || !normalized.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(CurrencyError::InvalidCode(code.to_owned()));
        }
        Ok(Currency(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Currency {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Currency {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'a> Deserialize<'a> for Currency {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let code = String::deserialize(deserializer)?;
        Currency::from_code(&code).map_err(SerdeError::custom)
    }
}
