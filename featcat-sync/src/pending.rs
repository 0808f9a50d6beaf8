//! Proposal store: the ledger of merge requests this client has opened and
//! not yet consumed.
//!
//! Persisted as a versioned JSON document at
//! `<repo-root>/.featcat/pending-mrs.json`. A missing file is an empty
//! ledger; a malformed one is an error. Writes use the same atomic `.tmp` +
//! rename as the manifest.
//!
//! [`ProposalStore`] is a plain load / mutate / save value. Callers own it and
//! pass it by reference to the write pipeline and the sync executor.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use featcat_core::{paths, Operation, StoreError};

use crate::error::{io_err, CatalogError};

/// Current ledger schema version.
pub const LEDGER_VERSION: &str = "1";
pub const LEDGER_FILE: &str = "pending-mrs.json";

/// One in-flight proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMr {
    /// The local feature this proposal was opened for. For updates and
    /// deletes this is the synced id itself.
    pub local_id: String,
    /// Server-assigned id; empty until known.
    #[serde(default)]
    pub server_id: String,
    pub mr_iid: u64,
    pub mr_url: String,
    pub branch: String,
    pub operation: Operation,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    version: String,
    #[serde(default)]
    pending: Vec<PendingMr>,
}

/// `<root>/.featcat/pending-mrs.json`
pub fn ledger_path_at(root: &Path) -> PathBuf {
    paths::state_dir(root).join(LEDGER_FILE)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalStore {
    path: PathBuf,
    version: String,
    records: Vec<PendingMr>,
}

impl ProposalStore {
    /// An empty ledger that will be saved to `path`.
    pub fn empty_at(path: impl Into<PathBuf>) -> Self {
        ProposalStore {
            path: path.into(),
            version: LEDGER_VERSION.to_string(),
            records: Vec::new(),
        }
    }

    /// Load the ledger under repository root `root`.
    pub fn load_at(root: &Path) -> Result<Self, CatalogError> {
        Self::load_file(ledger_path_at(root))
    }

    /// Load the ledger under the root returned by `discover`.
    pub fn load_with<F>(discover: F) -> Result<Self, CatalogError>
    where
        F: FnOnce() -> Result<PathBuf, StoreError>,
    {
        Self::load_at(&discover()?)
    }

    /// Load from the discovered repository root of the working directory.
    pub fn load() -> Result<Self, CatalogError> {
        Self::load_with(paths::discover_root)
    }

    fn load_file(path: PathBuf) -> Result<Self, CatalogError> {
        if !path.exists() {
            return Ok(Self::empty_at(path));
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        let file: LedgerFile = match serde_json::from_str(&contents) {
            Ok(file) => file,
            Err(source) => return Err(CatalogError::Ledger { path, source }),
        };
        if file.version != LEDGER_VERSION {
            tracing::warn!(
                path = %path.display(),
                version = %file.version,
                "proposal ledger has an unexpected schema version; reading it anyway"
            );
        }
        Ok(ProposalStore {
            path,
            version: file.version,
            records: file.pending,
        })
    }

    /// Atomically write the ledger, creating parent directories.
    pub fn save(&self) -> Result<(), CatalogError> {
        let file = LedgerFile {
            version: LEDGER_VERSION.to_string(),
            pending: self.records.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        paths::atomic_write(&self.path, json.as_bytes())?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn records(&self) -> &[PendingMr] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert `record`, replacing any record with the same `local_id`.
    pub fn add(&mut self, record: PendingMr) {
        match self
            .records
            .iter_mut()
            .find(|r| r.local_id == record.local_id)
        {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    /// Remove by local id. Absent ids are a no-op.
    pub fn remove(&mut self, local_id: &str) {
        self.records.retain(|r| r.local_id != local_id);
    }

    /// Remove every record carrying `server_id`. Absent ids are a no-op.
    pub fn remove_by_server_id(&mut self, server_id: &str) {
        self.records.retain(|r| r.server_id != server_id);
    }

    pub fn find_by_local_id(&self, local_id: &str) -> Option<&PendingMr> {
        self.records.iter().find(|r| r.local_id == local_id)
    }

    pub fn find_by_server_id(&self, server_id: &str) -> Option<&PendingMr> {
        if server_id.is_empty() {
            return None;
        }
        self.records.iter().find(|r| r.server_id == server_id)
    }

    pub fn find_by_proposal_id(&self, mr_iid: u64) -> Option<&PendingMr> {
        self.records.iter().find(|r| r.mr_iid == mr_iid)
    }

    /// Server ids claimed by open create proposals.
    pub fn claimed_ids(&self) -> impl Iterator<Item = &str> {
        self.records
            .iter()
            .filter(|r| r.operation == Operation::Create && !r.server_id.is_empty())
            .map(|r| r.server_id.as_str())
    }
}
