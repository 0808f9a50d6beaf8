//! Sync planning: reconcile the local replica, the proposal ledger and the
//! remote catalog into an ordered list of [`SyncAction`]s.
//!
//! Per local entry, in id order:
//!
//! | entry  | ledger / remote state                     | action             |
//! |--------|-------------------------------------------|--------------------|
//! | draft  | no proposal                               | `CreateProposal`   |
//! | draft  | proposal open                             | `ProposalPending`  |
//! | draft  | proposal closed                           | `CreateProposal`   |
//! | draft  | proposal merged                           | `ProposalMerged`   |
//! | synced | missing remotely, no delete proposal      | `Conflict`         |
//! | synced | update/delete proposal open               | `ProposalPending`  |
//! | synced | update/delete proposal merged             | `ProposalMerged`   |
//! | synced | same content                              | `None`             |
//! | synced | remote changed only                       | `PullRemote`       |
//! | synced | local changed only                        | `None` / `PushRemote` with prefer-local |
//! | synced | both changed                              | `Conflict` / `PushRemote` with prefer-local |
//!
//! Then merged proposals whose local entry is gone, then remote features
//! with no local entry (`UnseenRemote`). Ids claimed by proposals that are
//! not merged in this run do not count as local.
//!
//! Remote "changed" means the entry was never synced or the remote
//! `updated_at` is after `last_synced_at`. Local "changed" means the entry
//! was never synced or its own `updated_at` is missing or after
//! `last_synced_at`.

use std::collections::{BTreeMap, HashSet};

use featcat_core::{codec, Feature, FeatureId, LocalFeature, Operation};

use crate::cancel::CancelToken;
use crate::error::{CatalogError, RemoteError};
use crate::pending::{PendingMr, ProposalStore};
use crate::remote::{GitRemote, MergeRequestState};
use crate::retry::RetryExecutor;

/// Server id recorded when a merged create's identifier cannot be found.
pub const UNKNOWN_SERVER_ID: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// The entry is synced locally but its catalog file is gone.
    DeletedRemotely,
    /// Local and remote both changed since the last sync.
    BothChanged,
}

/// One unit of reconciliation work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// Nothing to do. `local_ahead` marks local edits that were not pushed.
    None { id: FeatureId, local_ahead: bool },
    /// Open a create proposal for a draft. `superseded` is the closed
    /// proposal being replaced, if any.
    CreateProposal {
        local: Feature,
        superseded: Option<PendingMr>,
    },
    /// A tracked proposal is still under review (or its state could not be
    /// read).
    ProposalPending {
        local_id: FeatureId,
        proposal: PendingMr,
    },
    /// A tracked proposal was merged. `remote` is the merged catalog entry
    /// when it is already visible.
    ProposalMerged {
        local_id: FeatureId,
        remote_id: FeatureId,
        proposal: PendingMr,
        remote: Option<Feature>,
    },
    PullRemote { local: Feature, remote: Feature },
    PushRemote { local: Feature, remote: Feature },
    Conflict {
        local: Feature,
        remote: Option<Feature>,
        reason: ConflictReason,
    },
    /// A catalog feature with no local counterpart. Never adopted
    /// automatically.
    UnseenRemote { remote: Feature },
}

impl SyncAction {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncAction::None { .. } => "none",
            SyncAction::CreateProposal { .. } => "create-proposal",
            SyncAction::ProposalPending { .. } => "proposal-pending",
            SyncAction::ProposalMerged { .. } => "proposal-merged",
            SyncAction::PullRemote { .. } => "pull-remote",
            SyncAction::PushRemote { .. } => "push-remote",
            SyncAction::Conflict { .. } => "conflict",
            SyncAction::UnseenRemote { .. } => "unseen-remote",
        }
    }

    pub fn local_id(&self) -> Option<&FeatureId> {
        match self {
            SyncAction::None { id, .. } => Some(id),
            SyncAction::CreateProposal { local, .. }
            | SyncAction::PullRemote { local, .. }
            | SyncAction::PushRemote { local, .. }
            | SyncAction::Conflict { local, .. } => Some(&local.id),
            SyncAction::ProposalPending { local_id, .. }
            | SyncAction::ProposalMerged { local_id, .. } => Some(local_id),
            SyncAction::UnseenRemote { .. } => None,
        }
    }

    pub fn remote_id(&self) -> Option<&FeatureId> {
        match self {
            SyncAction::None { id, .. } => Some(id).filter(|id| id.is_synced()),
            SyncAction::CreateProposal { .. } => None,
            // A create's server id is only a claim until merged.
            SyncAction::ProposalPending { local_id, .. } => Some(local_id).filter(|id| id.is_synced()),
            SyncAction::ProposalMerged { remote_id, .. } => Some(remote_id),
            SyncAction::PullRemote { remote, .. }
            | SyncAction::PushRemote { remote, .. }
            | SyncAction::UnseenRemote { remote } => Some(&remote.id),
            SyncAction::Conflict { remote, .. } => remote.as_ref().map(|r| &r.id),
        }
    }

    /// The feature snapshot the action carries: remote for pulls, merges
    /// and unseen features, local otherwise.
    pub fn snapshot(&self) -> Option<&Feature> {
        match self {
            SyncAction::None { .. } | SyncAction::ProposalPending { .. } => None,
            SyncAction::CreateProposal { local, .. }
            | SyncAction::PushRemote { local, .. }
            | SyncAction::Conflict { local, .. } => Some(local),
            SyncAction::ProposalMerged { remote, .. } => remote.as_ref(),
            SyncAction::PullRemote { remote, .. } | SyncAction::UnseenRemote { remote } => {
                Some(remote)
            }
        }
    }

    pub fn proposal(&self) -> Option<&PendingMr> {
        match self {
            SyncAction::ProposalPending { proposal, .. }
            | SyncAction::ProposalMerged { proposal, .. } => Some(proposal),
            SyncAction::CreateProposal { superseded, .. } => superseded.as_ref(),
            _ => None,
        }
    }

    /// Whether executing the action touches the remote or the ledger.
    pub fn has_side_effect(&self) -> bool {
        matches!(
            self,
            SyncAction::CreateProposal { .. }
                | SyncAction::PushRemote { .. }
                | SyncAction::ProposalMerged { .. }
        )
    }

    pub fn description(&self) -> String {
        match self {
            SyncAction::None { id, local_ahead: false } => format!("{id}: up to date"),
            SyncAction::None { id, local_ahead: true } => {
                format!("{id}: local changes not pushed (use --prefer-local to propose them)")
            }
            SyncAction::CreateProposal { local, superseded: None } => {
                format!("{}: propose new feature \"{}\"", local.id, local.name)
            }
            SyncAction::CreateProposal { local, superseded: Some(old) } => format!(
                "{}: proposal !{} was closed; propose \"{}\" again",
                local.id, old.mr_iid, local.name
            ),
            SyncAction::ProposalPending { local_id, proposal } => format!(
                "{local_id}: {} proposal !{} awaiting review ({})",
                proposal.operation, proposal.mr_iid, proposal.mr_url
            ),
            SyncAction::ProposalMerged { local_id, remote_id, proposal, .. } => {
                if local_id == remote_id {
                    format!("{local_id}: {} proposal !{} merged", proposal.operation, proposal.mr_iid)
                } else {
                    format!(
                        "{local_id}: proposal !{} merged as {remote_id}",
                        proposal.mr_iid
                    )
                }
            }
            SyncAction::PullRemote { remote, .. } => {
                format!("{}: pull remote changes", remote.id)
            }
            SyncAction::PushRemote { local, .. } => {
                format!("{}: propose local changes over remote", local.id)
            }
            SyncAction::Conflict { local, reason: ConflictReason::DeletedRemotely, .. } => {
                format!("{}: conflict, deleted remotely", local.id)
            }
            SyncAction::Conflict { local, reason: ConflictReason::BothChanged, .. } => {
                format!("{}: conflict, changed locally and remotely", local.id)
            }
            SyncAction::UnseenRemote { remote } => {
                format!("{}: new remote feature \"{}\" not in local replica", remote.id, remote.name)
            }
        }
    }
}

/// Planner output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResult {
    pub actions: Vec<SyncAction>,
    pub warnings: Vec<String>,
}

impl SyncResult {
    pub fn count(&self, kind: &str) -> usize {
        self.actions.iter().filter(|a| a.kind() == kind).count()
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &SyncAction> {
        self.actions
            .iter()
            .filter(|a| matches!(a, SyncAction::Conflict { .. }))
    }
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

pub struct SyncPlanner<'a> {
    remote: &'a dyn GitRemote,
    retry: &'a RetryExecutor,
    catalog_dir: &'a str,
}

/// Per-run bookkeeping.
struct Run<'r> {
    remote_by_id: BTreeMap<&'r str, &'r Feature>,
    handled: HashSet<u64>,
    /// Local ids plus the ids merged proposals landed as in this run.
    known: HashSet<String>,
    result: SyncResult,
}

impl<'a> SyncPlanner<'a> {
    pub fn new(remote: &'a dyn GitRemote, retry: &'a RetryExecutor, catalog_dir: &'a str) -> Self {
        SyncPlanner { remote, retry, catalog_dir }
    }

    pub fn plan(
        &self,
        local: &[LocalFeature],
        store: &ProposalStore,
        remote: &[Feature],
        prefer_local: bool,
        cancel: &CancelToken,
    ) -> Result<SyncResult, CatalogError> {
        let mut run = Run {
            remote_by_id: remote.iter().map(|f| (f.id.as_str(), f)).collect(),
            handled: HashSet::new(),
            known: local.iter().map(|e| e.id().0.clone()).collect(),
            result: SyncResult::default(),
        };

        let mut entries: Vec<&LocalFeature> = local.iter().collect();
        entries.sort_by(|a, b| a.id().cmp(b.id()));
        for entry in entries {
            cancel.check()?;
            let id = entry.id();
            let action = if id.is_local() {
                self.plan_draft(entry, store, &mut run, cancel)?
            } else if id.is_synced() {
                self.plan_synced(entry, store, prefer_local, &mut run, cancel)?
            } else {
                run.result
                    .warnings
                    .push(format!("{id}: not a valid feature id; skipped"));
                continue;
            };
            run.result.actions.push(action);
        }

        self.plan_orphans(local, store, &mut run, cancel)?;

        let mut unseen: Vec<&Feature> = remote
            .iter()
            .filter(|f| !run.known.contains(f.id.as_str()))
            .collect();
        unseen.sort_by(|a, b| a.id.cmp(&b.id));
        run.result.actions.extend(
            unseen
                .into_iter()
                .map(|f| SyncAction::UnseenRemote { remote: f.clone() }),
        );
        Ok(run.result)
    }

    fn plan_draft(
        &self,
        entry: &LocalFeature,
        store: &ProposalStore,
        run: &mut Run<'_>,
        cancel: &CancelToken,
    ) -> Result<SyncAction, CatalogError> {
        let local = &entry.feature;
        let Some(record) = store.find_by_local_id(local.id.as_str()) else {
            return Ok(SyncAction::CreateProposal { local: local.clone(), superseded: None });
        };
        run.handled.insert(record.mr_iid);

        Ok(match self.proposal_state(record, run, cancel)? {
            None => pending(&local.id, record),
            Some(state) if state.is_open() => pending(&local.id, record),
            Some(MergeRequestState::Merged) => {
                let remote_id = self.discover_server_id(record, run, cancel)?;
                run.known.insert(remote_id.0.clone());
                SyncAction::ProposalMerged {
                    local_id: local.id.clone(),
                    remote: run.remote_by_id.get(remote_id.as_str()).map(|f| (*f).clone()),
                    remote_id,
                    proposal: record.clone(),
                }
            }
            Some(_) => SyncAction::CreateProposal {
                local: local.clone(),
                superseded: Some(record.clone()),
            },
        })
    }

    fn plan_synced(
        &self,
        entry: &LocalFeature,
        store: &ProposalStore,
        prefer_local: bool,
        run: &mut Run<'_>,
        cancel: &CancelToken,
    ) -> Result<SyncAction, CatalogError> {
        let local = &entry.feature;
        let remote = run.remote_by_id.get(local.id.as_str()).map(|f| (*f).clone());

        let tracked = store
            .find_by_local_id(local.id.as_str())
            .filter(|r| r.operation != Operation::Create);
        // Only a delete proposal explains a missing catalog file.
        if remote.is_none() && tracked.map_or(true, |r| r.operation != Operation::Delete) {
            return Ok(SyncAction::Conflict {
                local: local.clone(),
                remote: None,
                reason: ConflictReason::DeletedRemotely,
            });
        }
        if let Some(record) = tracked {
            run.handled.insert(record.mr_iid);
            match self.proposal_state(record, run, cancel)? {
                None => return Ok(pending(&local.id, record)),
                Some(state) if state.is_open() => return Ok(pending(&local.id, record)),
                Some(MergeRequestState::Merged) => {
                    return Ok(SyncAction::ProposalMerged {
                        local_id: local.id.clone(),
                        remote_id: local.id.clone(),
                        proposal: record.clone(),
                        remote,
                    })
                }
                Some(_) => run.result.warnings.push(format!(
                    "{}: {} proposal !{} was closed without merging",
                    local.id, record.operation, record.mr_iid
                )),
            }
        }

        let Some(remote) = remote else {
            return Ok(SyncAction::Conflict {
                local: local.clone(),
                remote: None,
                reason: ConflictReason::DeletedRemotely,
            });
        };
        if local.same_content(&remote) {
            return Ok(SyncAction::None { id: local.id.clone(), local_ahead: false });
        }

        let (remote_changed, local_changed) = match entry.last_synced_at {
            None => (true, true),
            Some(at) => (
                remote.updated_at.is_some_and(|u| u > at),
                local.updated_at.map_or(true, |u| u > at),
            ),
        };
        Ok(match (remote_changed, local_changed, prefer_local) {
            (true, false, _) => SyncAction::PullRemote { local: local.clone(), remote },
            (true, true, false) => SyncAction::Conflict {
                local: local.clone(),
                remote: Some(remote),
                reason: ConflictReason::BothChanged,
            },
            (_, _, true) => SyncAction::PushRemote { local: local.clone(), remote },
            (false, _, false) => SyncAction::None { id: local.id.clone(), local_ahead: true },
        })
    }

    /// Re-check proposals whose local entry no longer exists; merged ones
    /// become cleanup actions.
    fn plan_orphans(
        &self,
        local: &[LocalFeature],
        store: &ProposalStore,
        run: &mut Run<'_>,
        cancel: &CancelToken,
    ) -> Result<(), CatalogError> {
        let local_ids: HashSet<&str> = local.iter().map(|e| e.id().as_str()).collect();
        let mut orphans: Vec<&PendingMr> = store
            .records()
            .iter()
            .filter(|r| !run.handled.contains(&r.mr_iid))
            .filter(|r| !local_ids.contains(r.local_id.as_str()))
            .collect();
        orphans.sort_by_key(|r| r.mr_iid);

        for record in orphans {
            match self.proposal_state(record, run, cancel)? {
                Some(MergeRequestState::Merged) => {
                    let remote_id = if record.operation == Operation::Create {
                        self.discover_server_id(record, run, cancel)?
                    } else {
                        FeatureId::from(record.local_id.as_str())
                    };
                    run.known.insert(remote_id.0.clone());
                    run.result.actions.push(SyncAction::ProposalMerged {
                        local_id: FeatureId::from(record.local_id.as_str()),
                        remote: run.remote_by_id.get(remote_id.as_str()).map(|f| (*f).clone()),
                        remote_id,
                        proposal: record.clone(),
                    });
                }
                Some(MergeRequestState::Closed) => run.result.warnings.push(format!(
                    "proposal !{} for {} was closed and its local entry is gone",
                    record.mr_iid, record.local_id
                )),
                _ => {}
            }
        }
        Ok(())
    }

    /// `None` when the lookup failed; the failure becomes a warning.
    fn proposal_state(
        &self,
        record: &PendingMr,
        run: &mut Run<'_>,
        cancel: &CancelToken,
    ) -> Result<Option<MergeRequestState>, CatalogError> {
        match self.retry.run("get_merge_request", cancel, || {
            self.remote.get_merge_request(record.mr_iid, cancel)
        }) {
            Ok(mr) => Ok(Some(mr.state)),
            Err(RemoteError::Cancelled) => Err(CatalogError::Cancelled),
            Err(err) => {
                run.result.warnings.push(format!(
                    "{}: could not check proposal !{}: {err}",
                    record.local_id, record.mr_iid
                ));
                Ok(None)
            }
        }
    }

    /// The id a merged create landed as: the catalog file the merge request
    /// added, else the id recorded when it was opened, else
    /// [`UNKNOWN_SERVER_ID`].
    fn discover_server_id(
        &self,
        record: &PendingMr,
        run: &mut Run<'_>,
        cancel: &CancelToken,
    ) -> Result<FeatureId, CatalogError> {
        let prefix = format!("{}/", self.catalog_dir.trim_end_matches('/'));
        match self.retry.run("merge_request_diffs", cancel, || {
            self.remote.merge_request_diffs(record.mr_iid, cancel)
        }) {
            Ok(diffs) => {
                let found = diffs
                    .iter()
                    .filter(|d| d.new_file && !d.deleted_file && d.new_path.starts_with(&prefix))
                    .find_map(|d| codec::synced_id_from_path(&d.new_path));
                if let Some(id) = found {
                    return Ok(id);
                }
            }
            Err(RemoteError::Cancelled) => return Err(CatalogError::Cancelled),
            Err(err) => {
                tracing::debug!(mr = record.mr_iid, error = %err, "could not read merge request diffs");
            }
        }
        if codec::is_synced_id(&record.server_id) {
            return Ok(FeatureId::from(record.server_id.as_str()));
        }
        run.result.warnings.push(format!(
            "{}: proposal !{} merged but its feature id could not be determined",
            record.local_id, record.mr_iid
        ));
        Ok(FeatureId::from(UNKNOWN_SERVER_ID))
    }
}

fn pending(local_id: &FeatureId, record: &PendingMr) -> SyncAction {
    SyncAction::ProposalPending {
        local_id: local_id.clone(),
        proposal: record.clone(),
    }
}
