//! Local replica manifest.
//!
//! One YAML document at `<root>/.featcat/manifest.yaml` holding every feature
//! the user has locally (drafts with `FT-LOCAL-*` ids and synced copies with
//! `FT-NNNNNN` ids), when each was last synced, and the alias map from local
//! ids to the server ids they were eventually assigned.
//!
//! # API pattern
//!
//! Like the rest of this crate, I/O functions come in pairs: `fn_at(root, …)`
//! with an explicit repository root (tests use a `TempDir`), and `fn(…)` which
//! discovers the root from the working directory.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::{io_err, StoreError};
use crate::paths;
use crate::types::{Feature, FeatureId};

/// Current manifest schema version.
pub const MANIFEST_VERSION: u32 = 1;

const LOCAL_PREFIX: &str = "FT-LOCAL-";
const LOCAL_SLUG_MAX: usize = 40;

/// A feature as held by the local replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFeature {
    #[serde(flatten)]
    pub feature: Feature,
    /// When this entry last matched the remote catalog. `None` means never.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl LocalFeature {
    pub fn id(&self) -> &FeatureId {
        &self.feature.id
    }

    /// Synced entries carry a server-assigned identifier.
    pub fn is_synced(&self) -> bool {
        self.feature.id.is_synced()
    }
}

/// Root of the manifest file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    #[serde(default)]
    pub features: Vec<LocalFeature>,
    /// Local id → server id, recorded when a create proposal is adopted.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            features: Vec::new(),
            aliases: BTreeMap::new(),
        }
    }
}

impl Manifest {
    pub fn get(&self, id: &str) -> Option<&LocalFeature> {
        self.features.iter().find(|f| f.feature.id.0 == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut LocalFeature> {
        self.features.iter_mut().find(|f| f.feature.id.0 == id)
    }

    /// Look up `id`, following the alias map for adopted local ids.
    pub fn resolve(&self, id: &str) -> Option<&LocalFeature> {
        self.get(id)
            .or_else(|| self.aliases.get(id).and_then(|server| self.get(server)))
    }

    /// Add a new unsynced draft with a fresh local identifier.
    pub fn add_draft(&mut self, mut feature: Feature) -> FeatureId {
        let id = loop {
            let candidate = new_local_id(&feature.name);
            if self.get(candidate.as_str()).is_none() {
                break candidate;
            }
        };
        let now = Utc::now();
        feature.id = id.clone();
        feature.created_at.get_or_insert(now);
        feature.updated_at = Some(now);
        self.features.push(LocalFeature {
            feature,
            last_synced_at: None,
        });
        id
    }

    /// Insert or replace an entry with a remote snapshot, marking it synced.
    pub fn upsert_remote(&mut self, remote: Feature, synced_at: DateTime<Utc>) {
        match self.get_mut(remote.id.as_str()) {
            Some(entry) => {
                entry.feature = remote;
                entry.last_synced_at = Some(synced_at);
            }
            None => self.features.push(LocalFeature {
                feature: remote,
                last_synced_at: Some(synced_at),
            }),
        }
    }

    /// Record that `id` matches the remote as of `synced_at`.
    pub fn mark_synced(&mut self, id: &str, synced_at: DateTime<Utc>) -> Result<(), StoreError> {
        let entry = self
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownFeature(id.to_string()))?;
        entry.last_synced_at = Some(synced_at);
        Ok(())
    }

    /// Replace a local draft by its merged server counterpart.
    ///
    /// The draft is renamed to `server_id` (or replaced by `remote` when a
    /// snapshot is available), the alias `local_id → server_id` is recorded,
    /// and any stale entry already holding `server_id` is dropped.
    pub fn adopt(
        &mut self,
        local_id: &str,
        server_id: &FeatureId,
        remote: Option<Feature>,
        synced_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let pos = self
            .features
            .iter()
            .position(|f| f.feature.id.0 == local_id)
            .ok_or_else(|| StoreError::UnknownFeature(local_id.to_string()))?;
        let mut entry = self.features.remove(pos);
        self.features.retain(|f| f.feature.id != *server_id);

        match remote {
            Some(snapshot) => entry.feature = snapshot,
            None => entry.feature.id = server_id.clone(),
        }
        entry.last_synced_at = Some(synced_at);
        self.features.push(entry);
        self.aliases
            .insert(local_id.to_string(), server_id.0.clone());
        Ok(())
    }

    /// Discard every local entry and replace the set with `remote`.
    pub fn replace_all(&mut self, remote: Vec<Feature>, synced_at: DateTime<Utc>) {
        self.features = remote
            .into_iter()
            .map(|feature| LocalFeature {
                feature,
                last_synced_at: Some(synced_at),
            })
            .collect();
    }

    /// Remove an entry; absent ids are a no-op.
    pub fn remove(&mut self, id: &str) {
        self.features.retain(|f| f.feature.id.0 != id);
    }

    /// Entries sorted by identifier.
    pub fn sorted(&self) -> Vec<LocalFeature> {
        let mut all = self.features.clone();
        all.sort_by(|a, b| a.feature.id.cmp(&b.feature.id));
        all
    }
}

/// A fresh `FT-LOCAL-<slug>-<hex>` identifier for a draft named `name`.
pub fn new_local_id(name: &str) -> FeatureId {
    let slug = codec::slugify(name, LOCAL_SLUG_MAX);
    let suffix: u16 = rand::random();
    if slug.is_empty() {
        FeatureId(format!("{LOCAL_PREFIX}{suffix:04x}"))
    } else {
        FeatureId(format!("{LOCAL_PREFIX}{slug}-{suffix:04x}"))
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load the manifest under `root`. A missing file yields an empty manifest.
pub fn load_at(root: &Path) -> Result<Manifest, StoreError> {
    let path = paths::manifest_path(root);
    if !path.exists() {
        return Ok(Manifest::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Manifest, StoreError> {
    load_at(&paths::discover_root()?)
}

/// Atomically save the manifest under `root`.
pub fn save_at(root: &Path, manifest: &Manifest) -> Result<(), StoreError> {
    let yaml = serde_yaml::to_string(manifest)?;
    paths::atomic_write(&paths::manifest_path(root), yaml.as_bytes())
}

/// `save_at` convenience wrapper.
pub fn save(manifest: &Manifest) -> Result<(), StoreError> {
    save_at(&paths::discover_root()?, manifest)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn remote(id: &str, name: &str) -> Feature {
        let mut f = Feature::new(id, name);
        f.updated_at = Some(Utc::now());
        f
    }

    #[test]
    fn missing_manifest_is_empty() {
        let root = TempDir::new().unwrap();
        let m = load_at(root.path()).unwrap();
        assert_eq!(m.version, MANIFEST_VERSION);
        assert!(m.features.is_empty());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let root = TempDir::new().unwrap();
        let mut m = Manifest::default();
        let id = m.add_draft(Feature::new("", "Offline mode"));
        m.upsert_remote(remote("FT-000002", "Search"), Utc::now());
        save_at(root.path(), &m).unwrap();

        let loaded = load_at(root.path()).unwrap();
        assert_eq!(loaded, m);
        assert!(loaded.get(id.as_str()).is_some());
    }

    #[test]
    fn malformed_manifest_reports_path() {
        let root = TempDir::new().unwrap();
        let path = paths::manifest_path(root.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "version: [unterminated").unwrap();
        let err = load_at(root.path()).unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
    }

    #[test]
    fn drafts_get_local_ids() {
        let mut m = Manifest::default();
        let id = m.add_draft(Feature::new("", "Dark Mode!"));
        assert!(id.is_local(), "{id} should be a local id");
        assert!(id.as_str().starts_with("FT-LOCAL-dark-mode-"));
        let entry = m.get(id.as_str()).unwrap();
        assert!(entry.last_synced_at.is_none());
        assert!(!entry.is_synced());
    }

    #[test]
    fn unnamed_draft_still_gets_valid_id() {
        let id = new_local_id("???");
        assert!(id.is_local());
    }

    #[test]
    fn adopt_renames_and_records_alias() {
        let mut m = Manifest::default();
        let local = m.add_draft(Feature::new("", "Webhooks"));
        let server = FeatureId::from("FT-000010");
        let at = Utc::now();
        m.adopt(local.as_str(), &server, None, at).unwrap();

        assert!(m.get(local.as_str()).is_none());
        let adopted = m.get("FT-000010").unwrap();
        assert_eq!(adopted.feature.name, "Webhooks");
        assert_eq!(adopted.last_synced_at, Some(at));
        assert_eq!(m.aliases.get(local.as_str()).map(String::as_str), Some("FT-000010"));
        assert_eq!(m.resolve(local.as_str()).unwrap().id().as_str(), "FT-000010");
    }

    #[test]
    fn adopt_prefers_remote_snapshot_and_drops_duplicate() {
        let mut m = Manifest::default();
        let local = m.add_draft(Feature::new("", "Webhooks"));
        m.upsert_remote(remote("FT-000010", "stale copy"), Utc::now() - Duration::hours(1));
        m.adopt(
            local.as_str(),
            &FeatureId::from("FT-000010"),
            Some(remote("FT-000010", "Webhooks v1")),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(m.features.len(), 1);
        assert_eq!(m.get("FT-000010").unwrap().feature.name, "Webhooks v1");
    }

    #[test]
    fn adopt_unknown_local_fails() {
        let mut m = Manifest::default();
        let err = m
            .adopt("FT-LOCAL-nope", &FeatureId::from("FT-000001"), None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownFeature(_)));
    }

    #[test]
    fn replace_all_discards_local_state() {
        let mut m = Manifest::default();
        m.add_draft(Feature::new("", "Draft"));
        let at = Utc::now();
        m.replace_all(vec![remote("FT-000001", "A"), remote("FT-000002", "B")], at);
        assert_eq!(m.features.len(), 2);
        assert!(m.features.iter().all(|f| f.last_synced_at == Some(at)));
    }

    #[test]
    fn sorted_orders_by_id() {
        let mut m = Manifest::default();
        m.upsert_remote(remote("FT-000002", "B"), Utc::now());
        m.upsert_remote(remote("FT-000001", "A"), Utc::now());
        let ids: Vec<String> = m.sorted().into_iter().map(|f| f.feature.id.0).collect();
        assert_eq!(ids, ["FT-000001", "FT-000002"]);
    }
}
