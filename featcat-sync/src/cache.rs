//! Read-through cache of the full remote catalog.
//!
//! Loaded lazily on first read and replaced wholesale after
//! [`FeatureCache::invalidate`]. Loads use double-checked locking so that
//! concurrent readers trigger at most one load. Reads hand out copies.

use std::sync::{Arc, PoisonError, RwLock};

use featcat_core::{codec, Feature};

use crate::cancel::CancelToken;
use crate::error::{CatalogError, RemoteError};
use crate::remote::{EntryKind, GitRemote};
use crate::retry::RetryExecutor;

#[derive(Debug, Default)]
struct Snapshot {
    loaded: bool,
    features: Vec<Feature>,
}

pub struct FeatureCache {
    remote: Arc<dyn GitRemote>,
    retry: RetryExecutor,
    dir: String,
    git_ref: String,
    snapshot: RwLock<Snapshot>,
}

impl FeatureCache {
    /// Cache the catalog under `dir` on branch `git_ref`.
    pub fn new(
        remote: Arc<dyn GitRemote>,
        retry: RetryExecutor,
        dir: impl Into<String>,
        git_ref: impl Into<String>,
    ) -> Self {
        FeatureCache {
            remote,
            retry,
            dir: dir.into(),
            git_ref: git_ref.into(),
            snapshot: RwLock::new(Snapshot::default()),
        }
    }

    /// Every catalog feature, sorted by id.
    pub fn features(&self, cancel: &CancelToken) -> Result<Vec<Feature>, CatalogError> {
        {
            let snap = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
            if snap.loaded {
                return Ok(snap.features.clone());
            }
        }
        let mut snap = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        if snap.loaded {
            return Ok(snap.features.clone());
        }
        let features = self.load(cancel)?;
        tracing::debug!(count = features.len(), "feature cache loaded");
        snap.features = features;
        snap.loaded = true;
        Ok(snap.features.clone())
    }

    pub fn invalidate(&self) {
        let mut snap = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        snap.loaded = false;
        snap.features.clear();
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .loaded
    }

    fn load(&self, cancel: &CancelToken) -> Result<Vec<Feature>, CatalogError> {
        let mut paths = Vec::new();
        let mut page = 1u32;
        loop {
            let listing = self.retry.run("list_tree", cancel, || {
                self.remote.list_tree(&self.dir, &self.git_ref, page, cancel)
            });
            let listing = match listing {
                Ok(listing) => listing,
                Err(err) if err.is_not_found() && page == 1 => {
                    tracing::debug!(dir = %self.dir, "catalog directory does not exist yet");
                    return Ok(Vec::new());
                }
                Err(err) => return Err(err.into()),
            };
            paths.extend(
                listing
                    .entries
                    .into_iter()
                    .filter(|e| e.kind == EntryKind::Blob)
                    .filter(|e| e.name.ends_with(&format!(".{}", codec::CATALOG_EXT)))
                    .map(|e| e.path),
            );
            match listing.next_page {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }

        let mut features = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = match self.retry.run("get_file", cancel, || {
                self.remote.get_file(&path, &self.git_ref, cancel)
            }) {
                Ok(bytes) => bytes,
                Err(RemoteError::Cancelled) => return Err(CatalogError::Cancelled),
                Err(err) => {
                    tracing::warn!(path = %path, error = %err, "skipping unreadable catalog file");
                    continue;
                }
            };
            match codec::parse(&bytes) {
                Ok(feature) => features.push(feature),
                Err(err) => {
                    tracing::warn!(path = %path, error = %err, "skipping malformed catalog file");
                }
            }
        }
        features.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(features)
    }
}
