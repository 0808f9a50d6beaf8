//! Sync execution: carry out planned [`SyncAction`]s against the remote and
//! the ledger, and fold their results into the local replica.
//!
//! Remote effects go through the [`WritePipeline`]; the executor never
//! commits to the default branch itself.

use chrono::{DateTime, Utc};

use featcat_core::{Feature, FeaturePatch, Manifest, Operation};

use crate::cache::FeatureCache;
use crate::cancel::CancelToken;
use crate::error::CatalogError;
use crate::pending::{PendingMr, ProposalStore};
use crate::planner::{SyncAction, SyncResult, UNKNOWN_SERVER_ID};
use crate::writer::WritePipeline;

/// What happened to one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing to do remotely.
    Skipped,
    /// A new proposal was opened.
    Proposed(PendingMr),
    /// The ledger record of a merged proposal was dropped.
    Cleared,
    /// A proposal is still under review.
    Pending,
    /// Needs a human.
    Conflict,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionReport {
    pub action: SyncAction,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub reports: Vec<ActionReport>,
    pub succeeded: usize,
    pub failed: usize,
    pub pending: usize,
    pub conflicts: usize,
    /// Set when cancellation stopped the run before every action ran.
    pub cancelled: bool,
}

impl ExecutionReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.conflicts == 0 && !self.cancelled
    }
}

pub struct SyncExecutor<'a> {
    pipeline: &'a WritePipeline,
    cache: &'a FeatureCache,
}

impl<'a> SyncExecutor<'a> {
    pub fn new(pipeline: &'a WritePipeline, cache: &'a FeatureCache) -> Self {
        SyncExecutor { pipeline, cache }
    }

    /// Execute one action. Returns the new ledger record for actions that
    /// open a proposal.
    pub fn apply(
        &self,
        action: &SyncAction,
        store: &mut ProposalStore,
        cancel: &CancelToken,
    ) -> Result<Option<PendingMr>, CatalogError> {
        match action {
            SyncAction::CreateProposal { local, .. } => {
                let (_, record) =
                    self.pipeline
                        .create(self.cache, store, local, Some(local.id.as_str()), cancel)?;
                Ok(Some(record))
            }
            SyncAction::PushRemote { local, .. } => {
                let patch = FeaturePatch::from_feature(local);
                let (_, record) = self
                    .pipeline
                    .update(self.cache, store, &local.id, &patch, cancel)?;
                Ok(Some(record))
            }
            SyncAction::ProposalMerged { proposal, .. } => {
                store.remove(&proposal.local_id);
                store.save()?;
                Ok(None)
            }
            SyncAction::None { .. }
            | SyncAction::ProposalPending { .. }
            | SyncAction::PullRemote { .. }
            | SyncAction::Conflict { .. }
            | SyncAction::UnseenRemote { .. } => Ok(None),
        }
    }

    /// Execute every action in order. Failures are recorded and the run
    /// continues; cancellation stops it.
    pub fn execute_all(
        &self,
        plan: &SyncResult,
        store: &mut ProposalStore,
        cancel: &CancelToken,
    ) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        for action in &plan.actions {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let outcome = match action {
                SyncAction::ProposalPending { .. } => {
                    report.pending += 1;
                    Outcome::Pending
                }
                SyncAction::Conflict { .. } => {
                    report.conflicts += 1;
                    Outcome::Conflict
                }
                _ => match self.apply(action, store, cancel) {
                    Ok(Some(record)) => {
                        report.succeeded += 1;
                        Outcome::Proposed(record)
                    }
                    Ok(None) => {
                        report.succeeded += 1;
                        if matches!(action, SyncAction::ProposalMerged { .. }) {
                            Outcome::Cleared
                        } else {
                            Outcome::Skipped
                        }
                    }
                    Err(err) if err.is_cancelled() => {
                        report.failed += 1;
                        report.cancelled = true;
                        report.reports.push(ActionReport {
                            action: action.clone(),
                            outcome: Outcome::Failed(err.to_string()),
                        });
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(
                            action = action.kind(),
                            id = ?action.local_id(),
                            error = %err,
                            "sync action failed"
                        );
                        report.failed += 1;
                        Outcome::Failed(err.to_string())
                    }
                },
            };
            report.reports.push(ActionReport {
                action: action.clone(),
                outcome,
            });
        }
        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            pending = report.pending,
            conflicts = report.conflicts,
            "sync finished"
        );
        report
    }

    /// Discard every local entry and replace the replica with the remote
    /// catalog. Aliases survive. Returns the number of entries written.
    pub fn force_remote(
        &self,
        manifest: &mut Manifest,
        cancel: &CancelToken,
    ) -> Result<usize, CatalogError> {
        self.cache.invalidate();
        let features = self.cache.features(cancel)?;
        let count = features.len();
        manifest.replace_all(features, Utc::now());
        Ok(count)
    }
}

/// Fold the result of an executed action into the local replica.
///
/// Returns whether the manifest changed.
pub fn reconcile_local(
    manifest: &mut Manifest,
    action: &SyncAction,
    at: DateTime<Utc>,
) -> Result<bool, CatalogError> {
    match action {
        SyncAction::PullRemote { remote, .. } => {
            manifest.upsert_remote(remote.clone(), at);
            Ok(true)
        }
        SyncAction::None { id, local_ahead: false } => {
            manifest.mark_synced(id.as_str(), at)?;
            Ok(true)
        }
        SyncAction::ProposalMerged { local_id, remote_id, proposal, remote } => {
            match proposal.operation {
                Operation::Create => {
                    if remote_id.as_str() == UNKNOWN_SERVER_ID {
                        return Ok(false);
                    }
                    if manifest.get(local_id.as_str()).is_some() {
                        manifest.adopt(local_id.as_str(), remote_id, remote.clone(), at)?;
                        return Ok(true);
                    }
                    Ok(upsert_snapshot(manifest, remote.as_ref(), at))
                }
                Operation::Update => {
                    if upsert_snapshot(manifest, remote.as_ref(), at) {
                        return Ok(true);
                    }
                    if manifest.get(remote_id.as_str()).is_some() {
                        manifest.mark_synced(remote_id.as_str(), at)?;
                        return Ok(true);
                    }
                    Ok(false)
                }
                Operation::Delete => {
                    let present = manifest.get(remote_id.as_str()).is_some();
                    manifest.remove(remote_id.as_str());
                    Ok(present)
                }
            }
        }
        _ => Ok(false),
    }
}

fn upsert_snapshot(manifest: &mut Manifest, remote: Option<&Feature>, at: DateTime<Utc>) -> bool {
    match remote {
        Some(feature) => {
            manifest.upsert_remote(feature.clone(), at);
            true
        }
        None => false,
    }
}
