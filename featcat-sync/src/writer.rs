//! Write pipeline: every catalog change is a branch, a one-file commit and a
//! merge request against the default branch.
//!
//! ```text
//! branch name ─▶ create branch ─▶ commit file ─▶ open MR ─▶ record in ledger
//!                     │                 │            │
//!                     └── on failure before the MR opens: delete the branch
//! ```
//!
//! Individual remote calls go through the [`RetryExecutor`]; the sequence
//! as a whole is not retried, except that a create whose commit loses an
//! identifier race is re-run with a fresh identifier.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use rand::TryRngCore;

use featcat_core::{codec, Config, Feature, FeatureId, FeaturePatch, Operation};
use featcat_renderer::{ProposalContext, ProposalRenderer};

use crate::cache::FeatureCache;
use crate::cancel::CancelToken;
use crate::error::{CatalogError, RemoteError};
use crate::pending::{PendingMr, ProposalStore};
use crate::remote::{FileCommit, GitRemote, NewMergeRequest};
use crate::retry::RetryExecutor;

/// Whole-pipeline attempts for a create that keeps losing the id race.
pub const CREATE_ATTEMPTS: u32 = 3;

const BRANCH_SLUG_MAX: usize = 40;
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub default_branch: String,
    pub catalog_dir: String,
    pub branch_area: String,
    pub labels: Vec<String>,
    pub remove_source_branch: bool,
    pub assignee: Option<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PipelineSettings {
    fn from(cfg: &Config) -> Self {
        PipelineSettings {
            default_branch: cfg.gitlab.default_branch.clone(),
            catalog_dir: cfg.catalog.dir.clone(),
            branch_area: cfg.catalog.branch_area.clone(),
            labels: cfg.catalog.labels.clone(),
            remove_source_branch: cfg.catalog.remove_source_branch,
            assignee: cfg.catalog.assignee.clone().filter(|a| !a.is_empty()),
        }
    }
}

// ---------------------------------------------------------------------------
// Branch naming
// ---------------------------------------------------------------------------

/// `<area>/<operation>-<slug>-<4 hex>`; the suffix keeps repeated attempts
/// for the same feature apart.
pub fn branch_name(area: &str, operation: Operation, subject: &str) -> String {
    let slug = codec::slugify(subject, BRANCH_SLUG_MAX);
    let slug = if slug.is_empty() { "feature" } else { slug.as_str() };
    format!("{area}/{operation}-{slug}-{:04x}", random_suffix())
}

fn random_suffix() -> u16 {
    match rand::rngs::OsRng.try_next_u32() {
        Ok(n) => n as u16,
        Err(err) => {
            tracing::debug!(error = %err, "OS random source unavailable; using clock suffix");
            clock_suffix()
        }
    }
}

fn clock_suffix() -> u16 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    (nanos ^ (nanos >> 16) ^ (nanos >> 32)) as u16
}

// ---------------------------------------------------------------------------
// Branch cleanup guard
// ---------------------------------------------------------------------------

/// Deletes the branch on drop unless [`BranchCleanup::disarm`] was called.
struct BranchCleanup<'a> {
    remote: &'a dyn GitRemote,
    branch: &'a str,
    armed: bool,
}

impl<'a> BranchCleanup<'a> {
    fn new(remote: &'a dyn GitRemote, branch: &'a str) -> Self {
        BranchCleanup { remote, branch, armed: true }
    }

    /// The open merge request now owns the branch.
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for BranchCleanup<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // The caller's token may be the reason we are unwinding.
        let cancel = CancelToken::with_timeout(CLEANUP_TIMEOUT);
        match self.remote.delete_branch(self.branch, &cancel) {
            Ok(()) => tracing::info!(branch = %self.branch, "deleted branch of failed proposal"),
            Err(err) => tracing::warn!(
                branch = %self.branch,
                error = %err,
                "could not delete branch of failed proposal"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// WritePipeline
// ---------------------------------------------------------------------------

/// What a proposal changes.
enum Change<'a> {
    Create(&'a Feature),
    Update { before: &'a Feature, after: &'a Feature },
    Delete(&'a Feature),
}

impl Change<'_> {
    fn operation(&self) -> Operation {
        match self {
            Change::Create(_) => Operation::Create,
            Change::Update { .. } => Operation::Update,
            Change::Delete(_) => Operation::Delete,
        }
    }

    fn feature(&self) -> &Feature {
        match self {
            Change::Create(f) | Change::Delete(f) => f,
            Change::Update { after, .. } => after,
        }
    }
}

pub struct WritePipeline {
    remote: Arc<dyn GitRemote>,
    retry: RetryExecutor,
    renderer: ProposalRenderer,
    settings: PipelineSettings,
}

impl WritePipeline {
    pub fn new(
        remote: Arc<dyn GitRemote>,
        retry: RetryExecutor,
        renderer: ProposalRenderer,
        settings: PipelineSettings,
    ) -> Self {
        WritePipeline { remote, retry, renderer, settings }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Propose a new feature. The identifier is `nextID` over the cached
    /// catalog plus ids claimed by open create proposals; if another writer
    /// takes that id first, the cache is invalidated and the whole pipeline
    /// re-runs, up to [`CREATE_ATTEMPTS`] times.
    ///
    /// `local_id` keys the ledger record; it defaults to the assigned id.
    pub fn create(
        &self,
        cache: &FeatureCache,
        store: &mut ProposalStore,
        draft: &Feature,
        local_id: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<(Feature, PendingMr), CatalogError> {
        if draft.name.trim().is_empty() {
            return Err(CatalogError::InvalidRequest("feature name is required".into()));
        }
        let mut attempt = 1;
        loop {
            let existing = cache.features(cancel)?;
            let id = codec::next_id(
                existing
                    .iter()
                    .map(|f| f.id.as_str())
                    .chain(store.claimed_ids()),
            )?;
            let now = Utc::now();
            let feature = Feature {
                id: id.clone(),
                created_at: Some(now),
                updated_at: Some(now),
                ..draft.clone()
            };
            let ledger_key = local_id.unwrap_or(id.as_str());

            match self.propose(Change::Create(&feature), ledger_key, store, cancel) {
                Ok(record) => {
                    cache.invalidate();
                    return Ok((feature, record));
                }
                Err(CatalogError::AlreadyExists(msg)) if attempt < CREATE_ATTEMPTS => {
                    tracing::warn!(
                        id = %id,
                        attempt,
                        error = %msg,
                        "feature id was taken concurrently; retrying with a fresh id"
                    );
                    cache.invalidate();
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Propose changing the non-empty fields of `patch` on feature `id`.
    pub fn update(
        &self,
        cache: &FeatureCache,
        store: &mut ProposalStore,
        id: &FeatureId,
        patch: &FeaturePatch,
        cancel: &CancelToken,
    ) -> Result<(Feature, PendingMr), CatalogError> {
        let before = self.fetch(id, cancel)?;
        let mut after = before.clone();
        patch.apply_to(&mut after);
        after.updated_at = Some(Utc::now());

        let record = self.propose(
            Change::Update { before: &before, after: &after },
            id.as_str(),
            store,
            cancel,
        )?;
        cache.invalidate();
        Ok((after, record))
    }

    /// Propose removing feature `id`.
    pub fn delete(
        &self,
        cache: &FeatureCache,
        store: &mut ProposalStore,
        id: &FeatureId,
        cancel: &CancelToken,
    ) -> Result<PendingMr, CatalogError> {
        let existing = self.fetch(id, cancel)?;
        let record = self.propose(Change::Delete(&existing), id.as_str(), store, cancel)?;
        cache.invalidate();
        Ok(record)
    }

    /// Current catalog content of a synced feature, read from the default
    /// branch rather than the cache.
    pub fn fetch(&self, id: &FeatureId, cancel: &CancelToken) -> Result<Feature, CatalogError> {
        if !id.is_synced() {
            return Err(CatalogError::InvalidId(id.to_string()));
        }
        let path = codec::catalog_path(&self.settings.catalog_dir, id);
        let bytes = self
            .retry
            .run("get_file", cancel, || {
                self.remote.get_file(&path, &self.settings.default_branch, cancel)
            })
            .map_err(|err| match err {
                e if e.is_not_found() => CatalogError::NotFound(id.to_string()),
                e => e.into(),
            })?;
        Ok(codec::parse(&bytes)?)
    }

    fn propose(
        &self,
        change: Change<'_>,
        ledger_key: &str,
        store: &mut ProposalStore,
        cancel: &CancelToken,
    ) -> Result<PendingMr, CatalogError> {
        let operation = change.operation();
        let feature = change.feature();
        let subject = if feature.name.trim().is_empty() {
            feature.id.as_str()
        } else {
            feature.name.as_str()
        };
        let branch = branch_name(&self.settings.branch_area, operation, subject);
        let path = codec::catalog_path(&self.settings.catalog_dir, &feature.id);

        let ctx = match &change {
            Change::Create(f) => ProposalContext::for_create(f, &branch, &path),
            Change::Update { before, after } => {
                ProposalContext::for_update(before, after, &branch, &path)
            }
            Change::Delete(f) => ProposalContext::for_delete(f, &branch, &path),
        };
        let texts = self.renderer.render(&ctx)?;
        let content = match &change {
            Change::Delete(_) => None,
            _ => Some(codec::format(feature)?),
        };

        self.retry.run("create_branch", cancel, || {
            self.remote
                .create_branch(&branch, &self.settings.default_branch, cancel)
        })?;
        let mut cleanup = BranchCleanup::new(self.remote.as_ref(), &branch);

        let commit = FileCommit {
            branch: branch.clone(),
            path: path.clone(),
            content,
            message: texts.commit_message.clone(),
        };
        self.retry.run("commit_file", cancel, || match operation {
            Operation::Create => self.remote.create_file(&commit, cancel),
            Operation::Update => self.remote.update_file(&commit, cancel),
            Operation::Delete => self.remote.delete_file(&commit, cancel),
        })?;

        let request = NewMergeRequest {
            source_branch: branch.clone(),
            target_branch: self.settings.default_branch.clone(),
            title: texts.title,
            description: texts.description,
            labels: self.settings.labels.clone(),
            remove_source_branch: self.settings.remove_source_branch,
            assignee_id: self.resolve_assignee(cancel)?,
        };
        let mr = self.retry.run("create_merge_request", cancel, || {
            self.remote.create_merge_request(&request, cancel)
        })?;
        cleanup.disarm();
        tracing::info!(
            operation = %operation,
            id = %feature.id,
            mr = mr.iid,
            branch = %branch,
            "opened catalog proposal"
        );

        let record = PendingMr {
            local_id: ledger_key.to_string(),
            server_id: feature.id.0.clone(),
            mr_iid: mr.iid,
            mr_url: mr.web_url,
            branch: branch.clone(),
            operation,
            created_at: Utc::now(),
        };
        store.add(record.clone());
        if let Err(err) = store.save() {
            tracing::warn!(
                error = %err,
                mr = record.mr_iid,
                "proposal opened but the local ledger could not be saved"
            );
        }
        Ok(record)
    }

    /// Best effort: lookup failures leave the proposal unassigned. Only
    /// cancellation propagates.
    fn resolve_assignee(&self, cancel: &CancelToken) -> Result<Option<u64>, CatalogError> {
        let Some(username) = self.settings.assignee.as_deref() else {
            return Ok(None);
        };
        match self
            .retry
            .run("find_user", cancel, || self.remote.find_user(username, cancel))
        {
            Ok(Some(user)) => Ok(Some(user.id)),
            Ok(None) => {
                tracing::warn!(username, "assignee not found; proposal will be unassigned");
                Ok(None)
            }
            Err(RemoteError::Cancelled) => Err(CatalogError::Cancelled),
            Err(err) => {
                tracing::warn!(username, error = %err, "assignee lookup failed; proposal will be unassigned");
                Ok(None)
            }
        }
    }
}
