//! Stable torrent identifier derived from the content hash.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::InfoHashError;

const INFO_HASH_HEX_LEN: usize = 40;

/// SHA-1 info hash rendered as 40 lowercase hexadecimal characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash(String);

impl InfoHash {
    /// Borrow the canonical lowercase hexadecimal form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for InfoHash {
    type Err = InfoHashError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.len() != INFO_HASH_HEX_LEN {
            return Err(InfoHashError::InvalidLength {
                length: trimmed.len(),
            });
        }
        if let Some(character) = trimmed.chars().find(|ch| !ch.is_ascii_hexdigit()) {
            return Err(InfoHashError::InvalidCharacter { character });
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }
}

impl Display for InfoHash {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl AsRef<str> for InfoHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for InfoHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for InfoHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalises_case_and_whitespace() {
        let hash: InfoHash = " 0123456789ABCDEF0123456789abcdef01234567 "
            .parse()
            .expect("valid hash");
        assert_eq!(hash.as_str(), "0123456789abcdef0123456789abcdef01234567");
        assert_eq!(hash.to_string(), hash.as_str());
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert_eq!(
            "abc".parse::<InfoHash>(),
            Err(InfoHashError::InvalidLength { length: 3 })
        );
        assert_eq!(
            "g123456789abcdef0123456789abcdef01234567".parse::<InfoHash>(),
            Err(InfoHashError::InvalidCharacter { character: 'g' })
        );
    }

    #[test]
    fn serde_uses_plain_string() {
        let hash: InfoHash = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".parse().expect("hash");
        let json = serde_json::to_string(&hash).expect("serialise");
        assert_eq!(json, "\"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\"");
        let back: InfoHash = serde_json::from_str(&json).expect("deserialise");
        assert_eq!(back, hash);
        assert!(serde_json::from_str::<InfoHash>("\"nope\"").is_err());
    }
}
