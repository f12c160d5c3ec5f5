use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Checksummed envelope for values held in the in-process cache layer.
///
/// The payload is kept as the exact JSON text that was written, so a read returns
/// byte-identical data. A checksum mismatch is treated as a miss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedCacheEntry {
    /// Serialized value (JSON text)
    pub data: String,
    /// SHA-256 of `data`, hex encoded
    pub checksum: String,
}

impl ValidatedCacheEntry {
    pub fn new(data: String) -> Self {
        let checksum = Self::compute_checksum(&data);
        Self { data, checksum }
    }

    /// Serializes `value` and wraps it.
    pub fn seal<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_string(value)?))
    }

    fn compute_checksum(data: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn is_valid(&self) -> bool {
        Self::compute_checksum(&self.data) == self.checksum
    }

    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Returns the stored JSON text when the envelope parses and its checksum holds.
    pub fn deserialize_and_validate(serialized: &str) -> Option<String> {
        let entry: ValidatedCacheEntry = serde_json::from_str(serialized).ok()?;

        if entry.is_valid() {
            Some(entry.data)
        } else {
            tracing::warn!(
                "Cache validation failed: checksum mismatch. Expected: {}, Data length: {}",
                entry.checksum,
                entry.data.len()
            );
            None
        }
    }

    /// Validates and decodes in one step; any failure reads as a miss.
    pub fn open<T: DeserializeOwned>(serialized: &str) -> Option<T> {
        let data = Self::deserialize_and_validate(serialized)?;
        match serde_json::from_str(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Cached value no longer decodes, ignoring it: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CategoryHint;

    #[test]
    fn sealed_value_opens_to_the_same_value() {
        let hint = CategoryHint {
            query: "restaurante".into(),
            codes: vec!["5611".into()],
            snippet: "CNAE 5611-2/01".into(),
        };
        let stored = ValidatedCacheEntry::seal(&hint).unwrap().serialize().unwrap();
        let back: CategoryHint = ValidatedCacheEntry::open(&stored).unwrap();
        assert_eq!(back, hint);
    }

    #[test]
    fn payload_text_is_preserved_exactly() {
        let data = r#"{"b":1,  "a":2}"#.to_string();
        let stored = ValidatedCacheEntry::new(data.clone()).serialize().unwrap();
        assert_eq!(ValidatedCacheEntry::deserialize_and_validate(&stored), Some(data));
    }

    #[test]
    fn tampered_cache_returns_none() {
        let stored = ValidatedCacheEntry::new(r#"{"codes":["5611"]}"#.to_string())
            .serialize()
            .unwrap();
        let tampered = stored.replace("5611", "4771");
        assert_eq!(ValidatedCacheEntry::deserialize_and_validate(&tampered), None);
    }

    #[test]
    fn garbage_is_a_miss() {
        assert!(ValidatedCacheEntry::open::<CategoryHint>("not json").is_none());
    }
}
