//! Per-run archive size budget as written in the config, e.g. `50M` or `700k`.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Display, Formatter};
use std::result;
use std::str::FromStr;

static DEFAULT_TARGET_SIZE: &str = "50M";

/// Target size that keeps the spelling it was written with
///
/// Lower case units are decimal (k = 1000), upper case units are binary
/// (K = 1024). A bare number is taken as bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct TargetSize {
    text: String,
    bytes: u64,
}

impl TargetSize {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn from_bytes(bytes: u64) -> Self {
        Self {
            text: bytes.to_string(),
            bytes,
        }
    }
}

impl Default for TargetSize {
    fn default() -> Self {
        DEFAULT_TARGET_SIZE
            .parse()
            .unwrap_or_else(|_| Self::from_bytes(50 * 1024 * 1024))
    }
}

fn unit_multiplier(unit: &str) -> Option<u64> {
    match unit {
        "" => Some(1),
        "k" => Some(1000),
        "K" => Some(1024),
        "m" => Some(1000 * 1000),
        "M" => Some(1024 * 1024),
        "g" => Some(1000 * 1000 * 1000),
        "G" => Some(1024 * 1024 * 1024),
        _ => None,
    }
}

impl FromStr for TargetSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        let split = text
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(text.len());
        let (digits, unit) = text.split_at(split);
        let invalid = || Error::Config(format!("invalid size {s:?}, expected e.g. 500k or 2G"));

        let number: u64 = digits.parse().map_err(|_| invalid())?;
        let bytes = unit_multiplier(unit.trim())
            .and_then(|m| number.checked_mul(m))
            .ok_or_else(invalid)?;

        Ok(Self {
            text: text.to_string(),
            bytes,
        })
    }
}

impl Display for TargetSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} bytes)", self.text, self.bytes)
    }
}

impl Debug for TargetSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl Serialize for TargetSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

struct TargetSizeVisitor;

impl Visitor<'_> for TargetSizeVisitor {
    type Value = TargetSize;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a size such as 50M, or a number of bytes")
    }

    fn visit_str<E>(self, v: &str) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        v.parse().map_err(serde::de::Error::custom)
    }

    fn visit_u64<E>(self, v: u64) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(TargetSize::from_bytes(v))
    }

    fn visit_i64<E>(self, v: i64) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        u64::try_from(v)
            .map(TargetSize::from_bytes)
            .map_err(serde::de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for TargetSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> result::Result<Self, D::Error> {
        deserializer.deserialize_any(TargetSizeVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units() {
        let cases = [
            ("700", 700),
            ("2k", 2_000),
            ("2K", 2_048),
            ("3m", 3_000_000),
            ("50M", 50 * 1024 * 1024),
            ("1g", 1_000_000_000),
            ("1G", 1024 * 1024 * 1024),
        ];
        for (text, bytes) in cases {
            let size: TargetSize = text.parse().unwrap();
            assert_eq!(size.bytes(), bytes, "{text}");
        }
    }

    #[test]
    fn test_invalid_sizes() {
        for text in ["", "M", "12x", "1.5G", "-3k", "99999999999999999999G"] {
            let result = text.parse::<TargetSize>();
            assert!(result.is_err(), "{text:?} should not parse");
            assert!(result.unwrap_err().is_config());
        }
    }

    #[test]
    fn test_default_is_50_mebibytes() {
        assert_eq!(TargetSize::default().bytes(), 50 * 1024 * 1024);
    }

    #[test]
    fn test_deserialize_string_and_number() {
        let size: TargetSize = serde_json::from_str("\"10K\"").unwrap();
        assert_eq!(size.bytes(), 10 * 1024);

        let size: TargetSize = serde_json::from_str("4096").unwrap();
        assert_eq!(size.bytes(), 4096);

        assert!(serde_json::from_str::<TargetSize>("\"ten\"").is_err());
    }

    #[test]
    fn test_serialize_keeps_spelling() {
        let size: TargetSize = "2G".parse().unwrap();
        assert_eq!(serde_json::to_string(&size).unwrap(), "\"2G\"");
    }
}
