//! The server-declared content catalog.
//!
//! A catalog maps content ids to the CRC32, size and permission groups of
//! the blob the server currently serves, plus the URL base downloads are
//! fetched from:
//!
//! ```text
//! {
//!   "urlBase": "http://cdn.example/content/",
//!   "entries": {
//!     "asset_cubes": { "crc32": 2411361773, "size": 96157, "groups": ["g1"] }
//!   }
//! }
//! ```
//!
//! Catalogs are immutable once loaded as far as the cache is concerned; a
//! new document means a new catalog. `to_document` round-trips the schema
//! so a catalog derived from a broader asset-delta document can be
//! persisted and reloaded.

mod resolver;

pub use resolver::{UrlResolver, CDN_PLACEHOLDER};

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One downloadable blob as declared by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// CRC32 of the blob's bytes.
    pub crc32: u32,

    /// Size of the blob in bytes.
    pub size: u64,

    /// Permission groups this id belongs to. May be empty.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub groups: BTreeSet<String>,
}

impl CatalogEntry {
    /// Entry with no group membership.
    pub fn new(crc32: u32, size: u64) -> Self {
        Self {
            crc32,
            size,
            groups: BTreeSet::new(),
        }
    }
}

/// Serde shape of the catalog document.
#[derive(Serialize, Deserialize)]
struct CatalogDocument {
    #[serde(rename = "urlBase", default)]
    url_base: String,
    #[serde(default)]
    entries: BTreeMap<String, CatalogEntry>,
}

/// Serde shape of one asset in a broader asset-delta document.
#[derive(Deserialize)]
struct DeltaAsset {
    crc32: u32,
    size: u64,
    #[serde(rename = "type", default)]
    asset_type: Option<String>,
}

/// Serde shape of a broader asset-delta document.
#[derive(Deserialize)]
struct DeltaDocument {
    #[serde(rename = "urlBase", default)]
    url_base: String,
    #[serde(default)]
    assets: BTreeMap<String, DeltaAsset>,
}

/// The set of downloadable content the server currently declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    url_base: String,
    entries: BTreeMap<String, CatalogEntry>,
}

impl Catalog {
    /// Empty catalog with the given URL base.
    pub fn new(url_base: impl Into<String>) -> Self {
        Self {
            url_base: url_base.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Parse a catalog document, resolving its URL base for the active
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CatalogParse`] for documents that do not match the
    /// schema. JSON object keys make in-document duplicate ids
    /// unobservable; the last occurrence wins, like the upsert in
    /// [`Catalog::add_entry`].
    pub fn load(document: &str, resolver: &UrlResolver) -> Result<Self> {
        let doc: CatalogDocument =
            serde_json::from_str(document).map_err(|e| Error::CatalogParse(e.to_string()))?;

        Ok(Self {
            url_base: resolver.resolve(&doc.url_base),
            entries: doc.entries,
        })
    }

    /// Derive a downloadables catalog from a broader asset-delta document.
    ///
    /// Only `"bundle"`-typed assets are downloadable content; other asset
    /// types ship inside the application. `strip_prefix` removes a build
    /// prefix (such as a platform directory) from each id; a collision
    /// after stripping is a hard [`Error::CatalogDuplicateId`].
    pub fn from_delta_document(
        document: &str,
        resolver: &UrlResolver,
        strip_prefix: Option<&str>,
    ) -> Result<Self> {
        let doc: DeltaDocument =
            serde_json::from_str(document).map_err(|e| Error::CatalogParse(e.to_string()))?;

        let mut catalog = Self::new(resolver.resolve(&doc.url_base));
        for (id, asset) in doc.assets {
            if asset.asset_type.as_deref() != Some("bundle") {
                continue;
            }

            let id = match strip_prefix {
                Some(prefix) => id.strip_prefix(prefix).unwrap_or(&id).to_string(),
                None => id,
            };

            catalog.try_add_entry(id, CatalogEntry::new(asset.crc32, asset.size))?;
        }

        Ok(catalog)
    }

    /// Serialize back to the catalog document schema.
    pub fn to_document(&self) -> String {
        let doc = CatalogDocument {
            url_base: self.url_base.clone(),
            entries: self.entries.clone(),
        };
        // Serialization of string-keyed maps and plain structs cannot fail.
        serde_json::to_string(&doc).unwrap_or_default()
    }

    /// Insert or replace the entry for `id`. Idempotent upsert.
    pub fn add_entry(&mut self, id: impl Into<String>, entry: CatalogEntry) {
        self.entries.insert(id.into(), entry);
    }

    /// Insert the entry for `id`, failing if the id is already present.
    pub fn try_add_entry(&mut self, id: impl Into<String>, entry: CatalogEntry) -> Result<()> {
        let id = id.into();
        if self.entries.contains_key(&id) {
            return Err(Error::CatalogDuplicateId(id));
        }
        self.entries.insert(id, entry);
        Ok(())
    }

    /// The resolved URL base, ending with `/` when non-empty.
    pub fn url_base(&self) -> &str {
        &self.url_base
    }

    /// Look up the entry for `id`.
    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.get(id)
    }

    /// All entries, ordered by id.
    pub fn entries(&self) -> &BTreeMap<String, CatalogEntry> {
        &self.entries
    }

    /// All ids, ordered.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Group memberships declared inline on entries: group id to member ids.
    pub fn inline_groups(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut groups: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (id, entry) in &self.entries {
            for group in &entry.groups {
                groups.entry(group.clone()).or_default().insert(id.clone());
            }
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const DOCUMENT: &str = r#"{
        "urlBase": "http://cdn.example/content/",
        "entries": {
            "asset_cubes": { "crc32": 2411361773, "size": 96157, "groups": ["g1"] },
            "asset_spheres": { "crc32": 42, "size": 10 }
        }
    }"#;

    #[test]
    fn test_load_document() {
        let catalog = Catalog::load(DOCUMENT, &UrlResolver::passthrough()).unwrap();

        assert_eq!(catalog.url_base(), "http://cdn.example/content/");
        assert_eq!(catalog.len(), 2);

        let cubes = catalog.get("asset_cubes").unwrap();
        assert_eq!(cubes.crc32, 2411361773);
        assert_eq!(cubes.size, 96157);
        assert!(cubes.groups.contains("g1"));

        let spheres = catalog.get("asset_spheres").unwrap();
        assert!(spheres.groups.is_empty());
    }

    #[test]
    fn test_load_rejects_malformed_document() {
        let err = Catalog::load("{ nope", &UrlResolver::passthrough()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CatalogParse);

        let err = Catalog::load(
            r#"{"entries": {"a": {"crc32": "not a number", "size": 1}}}"#,
            &UrlResolver::passthrough(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CatalogParse);
    }

    #[test]
    fn test_document_roundtrip() {
        let catalog = Catalog::load(DOCUMENT, &UrlResolver::passthrough()).unwrap();
        let reloaded =
            Catalog::load(&catalog.to_document(), &UrlResolver::passthrough()).unwrap();
        assert_eq!(reloaded, catalog);
    }

    #[test]
    fn test_add_entry_is_upsert() {
        let mut catalog = Catalog::new("http://cdn.example/");
        catalog.add_entry("a", CatalogEntry::new(1, 10));
        catalog.add_entry("a", CatalogEntry::new(2, 20));

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("a").unwrap().crc32, 2);
    }

    #[test]
    fn test_try_add_entry_rejects_duplicate() {
        let mut catalog = Catalog::new("http://cdn.example/");
        catalog.try_add_entry("a", CatalogEntry::new(1, 10)).unwrap();

        let err = catalog
            .try_add_entry("a", CatalogEntry::new(2, 20))
            .unwrap_err();
        assert_eq!(err, Error::CatalogDuplicateId("a".to_string()));
        assert_eq!(catalog.get("a").unwrap().crc32, 1);
    }

    #[test]
    fn test_environment_resolution_applies_to_url_base() {
        let document = r#"{ "urlBase": "http://localhost:7888/", "entries": {} }"#;
        let resolver = UrlResolver::for_environment("http://assets.example/prod");
        let catalog = Catalog::load(document, &resolver).unwrap();
        assert_eq!(catalog.url_base(), "http://assets.example/prod/");
    }

    #[test]
    fn test_from_delta_document_keeps_bundles_only() {
        let delta = r#"{
            "urlBase": "http://cdn.example/",
            "assets": {
                "Android/level_1": { "crc32": 11, "size": 100, "type": "bundle" },
                "Android/level_2": { "crc32": 22, "size": 200, "type": "bundle" },
                "rules.xml": { "crc32": 33, "size": 300, "type": "content" }
            }
        }"#;

        let catalog = Catalog::from_delta_document(
            delta,
            &UrlResolver::passthrough(),
            Some("Android/"),
        )
        .unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("level_1").unwrap().crc32, 11);
        assert_eq!(catalog.get("level_2").unwrap().size, 200);
        assert!(catalog.get("rules.xml").is_none());
    }

    #[test]
    fn test_from_delta_document_collision_after_strip_is_error() {
        let delta = r#"{
            "urlBase": "http://cdn.example/",
            "assets": {
                "Android/level_1": { "crc32": 11, "size": 100, "type": "bundle" },
                "level_1": { "crc32": 22, "size": 200, "type": "bundle" }
            }
        }"#;

        let err = Catalog::from_delta_document(
            delta,
            &UrlResolver::passthrough(),
            Some("Android/"),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CatalogDuplicateId);
    }

    #[test]
    fn test_inline_groups() {
        let catalog = Catalog::load(DOCUMENT, &UrlResolver::passthrough()).unwrap();
        let groups = catalog.inline_groups();

        assert_eq!(groups.len(), 1);
        assert!(groups["g1"].contains("asset_cubes"));
    }
}
