//! The persisted per-id manifest record.
//!
//! A manifest is the small piece of metadata written next to every cached
//! download. It remembers what the catalog promised (`crc32`, `size`), how
//! many times the blob has been fetched (`t`) and whether the bytes on disk
//! have been verified against the CRC since they were last written (`v`).
//!
//! The on-disk schema keeps the short historical keys:
//!
//! ```text
//! { "crc32": 2411361773, "size": 96157, "t": 1, "v": 1 }
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Persisted metadata for one content id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// CRC32 of the blob as declared by the catalog.
    pub crc32: u32,

    /// Size in bytes of the blob as declared by the catalog.
    pub size: u64,

    /// Number of completed downloads for this id.
    #[serde(rename = "t")]
    pub download_count: u32,

    /// Whether the data file's CRC has been confirmed since the last write.
    #[serde(
        rename = "v",
        serialize_with = "bool_as_int",
        deserialize_with = "bool_from_int"
    )]
    pub verified: bool,
}

impl Manifest {
    /// Create a fresh, unverified manifest mirroring a catalog entry.
    pub fn new(crc32: u32, size: u64) -> Self {
        Self {
            crc32,
            size,
            download_count: 0,
            verified: false,
        }
    }

    /// Whether this manifest still matches the catalog's `crc32` and `size`.
    pub fn matches(&self, crc32: u32, size: u64) -> bool {
        self.crc32 == crc32 && self.size == size
    }

    /// Parse a manifest from its JSON bytes.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::CatalogParse(format!("manifest: {}", e)))
    }

    /// Serialize the manifest to its JSON bytes.
    pub fn to_json_bytes(&self) -> Vec<u8> {
        // Serialization of this struct cannot fail: no maps, no non-string keys.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

fn bool_as_int<S: Serializer>(value: &bool, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*value))
}

fn bool_from_int<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    Ok(u8::deserialize(deserializer)? != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_new_is_unverified() {
        let manifest = Manifest::new(111, 10);
        assert_eq!(manifest.crc32, 111);
        assert_eq!(manifest.size, 10);
        assert_eq!(manifest.download_count, 0);
        assert!(!manifest.verified);
    }

    #[test]
    fn test_manifest_matches() {
        let manifest = Manifest::new(111, 10);
        assert!(manifest.matches(111, 10));
        assert!(!manifest.matches(222, 10));
        assert!(!manifest.matches(111, 11));
    }

    #[test]
    fn test_manifest_json_schema() {
        let manifest = Manifest {
            crc32: 2411361773,
            size: 96157,
            download_count: 1,
            verified: true,
        };

        let json: serde_json::Value =
            serde_json::from_slice(&manifest.to_json_bytes()).unwrap();
        assert_eq!(json["crc32"], 2411361773u32);
        assert_eq!(json["size"], 96157);
        assert_eq!(json["t"], 1);
        assert_eq!(json["v"], 1);
    }

    #[test]
    fn test_manifest_json_roundtrip() {
        let manifest = Manifest {
            crc32: 42,
            size: 1024,
            download_count: 3,
            verified: false,
        };

        let parsed = Manifest::from_json_bytes(&manifest.to_json_bytes()).unwrap();
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn test_manifest_verified_from_int() {
        let parsed =
            Manifest::from_json_bytes(br#"{"crc32": 1, "size": 2, "t": 0, "v": 1}"#).unwrap();
        assert!(parsed.verified);

        let parsed =
            Manifest::from_json_bytes(br#"{"crc32": 1, "size": 2, "t": 0, "v": 0}"#).unwrap();
        assert!(!parsed.verified);
    }

    #[test]
    fn test_manifest_rejects_garbage() {
        assert!(Manifest::from_json_bytes(b"not json").is_err());
        assert!(Manifest::from_json_bytes(br#"{"crc32": "nope"}"#).is_err());
    }
}
