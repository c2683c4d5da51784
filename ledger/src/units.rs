//! Human-readable amounts and durations for configuration files.

use ethers::{
    types::U256,
    utils::{format_units, parse_units},
};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

/// An amount of the ledger's native currency, stored in wei.
///
/// Parsed from `"<value> <unit>"` (for example `"500 ether"` or `"27.3 gwei"`).
/// A bare number is read as wei.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Amount(pub U256);

impl Amount {
    /// Create an [Amount] from a whole number of wei.
    pub fn wei(value: u64) -> Self {
        Self(U256::from(value))
    }

    /// Create an [Amount] from a whole number of ether.
    pub fn ether(value: u64) -> Self {
        Self(U256::from(value) * U256::exp10(18))
    }

    /// Returns the amount in wei.
    pub fn as_wei(&self) -> U256 {
        self.0
    }
}

impl From<Amount> for U256 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl FromStr for Amount {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut parts = value.split_whitespace();
        let number = parts.next().ok_or_else(|| "empty amount".to_string())?;
        let unit = parts.next().unwrap_or("wei");
        if parts.next().is_some() {
            return Err(format!("malformed amount: {value}"));
        }
        let parsed = parse_units(number, unit).map_err(|err| format!("{value}: {err}"))?;
        Ok(Self(parsed.into()))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match format_units(self.0, "ether") {
            Ok(ether) => write!(f, "{ether} ether"),
            Err(_) => write!(f, "{} wei", self.0),
        }
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{} wei", self.0))
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(de::Error::custom)
    }
}

/// Serialize a [std::time::Duration] as whole milliseconds.
pub mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!("500 ether".parse::<Amount>().unwrap(), Amount::ether(500));
        assert_eq!(
            "27.3 gwei".parse::<Amount>().unwrap(),
            Amount::wei(27_300_000_000)
        );
        assert_eq!("21000".parse::<Amount>().unwrap(), Amount::wei(21_000));
        assert!("1 ether extra".parse::<Amount>().is_err());
        assert!("".parse::<Amount>().is_err());
    }

    #[test]
    fn test_amount_from_yaml() {
        let amount: Amount = serde_yaml::from_str("\"3 ether\"").unwrap();
        assert_eq!(amount, Amount::ether(3));
        assert_eq!(amount.to_string(), "3.000000000000000000 ether");
    }
}
