//! End-to-end sync runs: plan, execute, reconcile, against the in-memory
//! remote with merges and closes simulated between runs.

use std::sync::Arc;

use chrono::{Duration, Utc};
use featcat_core::{Config, Feature, FeatureId, FeaturePatch, Manifest, Operation};
use featcat_sync::{
    planner::UNKNOWN_SERVER_ID, remote::GitRemote, CancelToken, ConflictReason, FeatureBackend,
    GitBackend, MemoryRemote, PendingMr, ProposalStore, RemoteError, RemoteOp, SyncAction,
};
use rstest::rstest;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config() -> Config {
    let mut config = Config::default();
    config.retry.base_delay_ms = 0;
    config.retry.max_delay_ms = 0;
    config
}

fn backend_with(remote: &Arc<MemoryRemote>, store: ProposalStore) -> GitBackend {
    GitBackend::new(remote.clone(), &config(), store).expect("backend")
}

fn backend(remote: &Arc<MemoryRemote>, root: &TempDir) -> GitBackend {
    backend_with(remote, ProposalStore::load_at(root.path()).expect("ledger"))
}

fn kinds(actions: &[SyncAction]) -> Vec<&'static str> {
    actions.iter().map(SyncAction::kind).collect()
}

fn stamped(id: &str, name: &str, hours_ago: i64) -> Feature {
    let at = Utc::now() - Duration::hours(hours_ago);
    Feature {
        created_at: Some(at),
        updated_at: Some(at),
        ..Feature::new(id, name)
    }
}

/// A manifest holding `feature` as last synced `hours_ago`.
fn synced_manifest(feature: Feature, hours_ago: i64) -> Manifest {
    let mut manifest = Manifest::default();
    manifest.upsert_remote(feature, Utc::now() - Duration::hours(hours_ago));
    manifest
}

fn edit_local(manifest: &mut Manifest, id: &str, summary: &str) {
    let entry = manifest
        .features
        .iter_mut()
        .find(|e| e.feature.id.as_str() == id)
        .expect("entry");
    entry.feature.summary = summary.to_string();
    entry.feature.updated_at = Some(Utc::now());
}

// ---------------------------------------------------------------------------
// Create lifecycle
// ---------------------------------------------------------------------------

#[test]
fn draft_is_proposed_then_adopted_after_merge() {
    let remote = Arc::new(MemoryRemote::new("main"));
    let root = TempDir::new().unwrap();
    let b = backend(&remote, &root);
    let mut manifest = Manifest::default();
    let draft_id = manifest.add_draft(Feature::new("", "Search"));

    let plan = b.plan_sync(&manifest, false).unwrap();
    assert_eq!(kinds(&plan.actions), ["create-proposal"]);
    let report = b.execute_sync(&plan, &mut manifest);
    assert_eq!((report.succeeded, report.failed), (1, 0));
    let record = b.pending().pop().expect("ledger record");
    assert_eq!(record.local_id, draft_id.as_str());
    assert_eq!(record.server_id, "FT-000001");

    let plan = b.plan_sync(&manifest, false).unwrap();
    assert_eq!(kinds(&plan.actions), ["proposal-pending"]);
    let report = b.execute_sync(&plan, &mut manifest);
    assert_eq!(report.pending, 1);

    remote.merge(record.mr_iid).unwrap();
    let plan = b.plan_sync(&manifest, false).unwrap();
    match plan.actions.as_slice() {
        [SyncAction::ProposalMerged { local_id, remote_id, remote: Some(snapshot), .. }] => {
            assert_eq!(*local_id, draft_id);
            assert_eq!(remote_id.as_str(), "FT-000001");
            assert_eq!(snapshot.name, "Search");
        }
        other => panic!("expected a single merge, got {other:?}"),
    }
    b.execute_sync(&plan, &mut manifest);
    assert!(b.pending().is_empty());
    assert!(ProposalStore::load_at(root.path()).unwrap().is_empty());
    assert!(manifest.get(draft_id.as_str()).is_none());
    assert_eq!(
        manifest.resolve(draft_id.as_str()).unwrap().id().as_str(),
        "FT-000001"
    );

    let plan = b.plan_sync(&manifest, false).unwrap();
    assert_eq!(
        plan.actions,
        vec![SyncAction::None { id: "FT-000001".into(), local_ahead: false }]
    );
}

#[test]
fn closed_create_is_proposed_again() {
    let remote = Arc::new(MemoryRemote::new("main"));
    let root = TempDir::new().unwrap();
    let b = backend(&remote, &root);
    let mut manifest = Manifest::default();
    manifest.add_draft(Feature::new("", "Rejected idea"));

    let plan = b.plan_sync(&manifest, false).unwrap();
    b.execute_sync(&plan, &mut manifest);
    let first = b.pending().pop().unwrap();
    remote.close(first.mr_iid).unwrap();

    let plan = b.plan_sync(&manifest, false).unwrap();
    match plan.actions.as_slice() {
        [SyncAction::CreateProposal { superseded: Some(old), .. }] => {
            assert_eq!(old.mr_iid, first.mr_iid)
        }
        other => panic!("expected re-proposal, got {other:?}"),
    }
    b.execute_sync(&plan, &mut manifest);
    let pending = b.pending();
    assert_eq!(pending.len(), 1);
    assert_ne!(pending[0].mr_iid, first.mr_iid);
}

#[test]
fn merged_proposal_without_local_entry_is_cleaned_up() {
    let remote = Arc::new(MemoryRemote::new("main"));
    let root = TempDir::new().unwrap();
    let b = backend(&remote, &root);
    let mut manifest = Manifest::default();
    let draft_id = manifest.add_draft(Feature::new("", "Orphan"));
    let plan = b.plan_sync(&manifest, false).unwrap();
    b.execute_sync(&plan, &mut manifest);
    let record = b.pending().pop().unwrap();

    manifest.remove(draft_id.as_str());
    remote.merge(record.mr_iid).unwrap();

    let plan = b.plan_sync(&manifest, false).unwrap();
    assert_eq!(kinds(&plan.actions), ["proposal-merged"], "not also unseen");
    b.execute_sync(&plan, &mut manifest);
    assert!(b.pending().is_empty());
    assert_eq!(manifest.get("FT-000001").unwrap().feature.name, "Orphan");
}

#[test]
fn undiscoverable_merged_id_uses_sentinel() {
    let remote = Arc::new(MemoryRemote::new("main"));
    let root = TempDir::new().unwrap();
    let c = CancelToken::new();
    remote.create_branch("catalog/legacy", "main", &c).unwrap();
    let mr = remote
        .create_merge_request(
            &featcat_sync::remote::NewMergeRequest {
                source_branch: "catalog/legacy".into(),
                target_branch: "main".into(),
                title: "legacy".into(),
                description: String::new(),
                labels: Vec::new(),
                remove_source_branch: true,
                assignee_id: None,
            },
            &c,
        )
        .unwrap();
    remote.merge(mr.iid).unwrap();

    let mut manifest = Manifest::default();
    let draft_id = manifest.add_draft(Feature::new("", "Legacy"));
    let mut store = ProposalStore::load_at(root.path()).unwrap();
    store.add(PendingMr {
        local_id: draft_id.0.clone(),
        server_id: String::new(),
        mr_iid: mr.iid,
        mr_url: mr.web_url.clone(),
        branch: "catalog/legacy".into(),
        operation: Operation::Create,
        created_at: Utc::now(),
    });
    let b = backend_with(&remote, store);

    let plan = b.plan_sync(&manifest, false).unwrap();
    match plan.actions.as_slice() {
        [SyncAction::ProposalMerged { remote_id, .. }] => {
            assert_eq!(remote_id.as_str(), UNKNOWN_SERVER_ID)
        }
        other => panic!("expected merge with sentinel id, got {other:?}"),
    }
    assert_eq!(plan.warnings.len(), 1);

    b.execute_sync(&plan, &mut manifest);
    assert!(b.pending().is_empty());
    assert!(manifest.get(draft_id.as_str()).is_some(), "draft left in place");
}

// ---------------------------------------------------------------------------
// Update / delete lifecycle
// ---------------------------------------------------------------------------

#[test]
fn local_edit_waits_then_pushes_with_prefer_local() {
    let remote = Arc::new(MemoryRemote::new("main"));
    let root = TempDir::new().unwrap();
    remote.seed_feature(&stamped("FT-000002", "Export", 48));
    let b = backend(&remote, &root);
    let mut manifest = synced_manifest(stamped("FT-000002", "Export", 48), 24);
    edit_local(&mut manifest, "FT-000002", "CSV and JSON");

    let plan = b.plan_sync(&manifest, false).unwrap();
    assert_eq!(
        plan.actions,
        vec![SyncAction::None { id: "FT-000002".into(), local_ahead: true }]
    );

    let plan = b.plan_sync(&manifest, true).unwrap();
    assert_eq!(kinds(&plan.actions), ["push-remote"]);
    b.execute_sync(&plan, &mut manifest);
    let record = b.pending().pop().unwrap();
    assert_eq!(record.operation, Operation::Update);
    assert_eq!(record.local_id, "FT-000002");

    let plan = b.plan_sync(&manifest, true).unwrap();
    assert_eq!(kinds(&plan.actions), ["proposal-pending"], "no second proposal");

    remote.merge(record.mr_iid).unwrap();
    let plan = b.plan_sync(&manifest, false).unwrap();
    assert_eq!(kinds(&plan.actions), ["proposal-merged"]);
    b.execute_sync(&plan, &mut manifest);
    let entry = manifest.get("FT-000002").unwrap();
    assert_eq!(entry.feature.summary, "CSV and JSON");

    let plan = b.plan_sync(&manifest, false).unwrap();
    assert_eq!(kinds(&plan.actions), ["none"]);
}

#[test]
fn remote_change_is_pulled() {
    let remote = Arc::new(MemoryRemote::new("main"));
    let root = TempDir::new().unwrap();
    let mut manifest = synced_manifest(stamped("FT-000003", "Old name", 48), 24);
    remote.seed_feature(&stamped("FT-000003", "New name", 1));
    let b = backend(&remote, &root);

    let plan = b.plan_sync(&manifest, false).unwrap();
    assert_eq!(kinds(&plan.actions), ["pull-remote"]);
    b.execute_sync(&plan, &mut manifest);
    assert_eq!(manifest.get("FT-000003").unwrap().feature.name, "New name");
}

#[rstest]
#[case::both_changed(false, "conflict")]
#[case::prefer_local(true, "push-remote")]
fn concurrent_edits(#[case] prefer_local: bool, #[case] expected: &str) {
    let remote = Arc::new(MemoryRemote::new("main"));
    let root = TempDir::new().unwrap();
    let mut manifest = synced_manifest(stamped("FT-000004", "Billing", 48), 24);
    edit_local(&mut manifest, "FT-000004", "mine");
    remote.seed_feature(&Feature {
        summary: "theirs".into(),
        ..stamped("FT-000004", "Billing", 1)
    });
    let b = backend(&remote, &root);

    let plan = b.plan_sync(&manifest, prefer_local).unwrap();
    assert_eq!(kinds(&plan.actions), [expected]);
    let report = b.execute_sync(&plan, &mut manifest);
    assert_eq!(report.conflicts, usize::from(!prefer_local));
}

#[test]
fn merged_delete_removes_local_entry_without_conflict() {
    let remote = Arc::new(MemoryRemote::new("main"));
    let root = TempDir::new().unwrap();
    remote.seed_feature(&stamped("FT-000005", "Legacy export", 48));
    let mut manifest = synced_manifest(stamped("FT-000005", "Legacy export", 48), 24);
    let b = backend(&remote, &root);

    b.delete_feature(&"FT-000005".into()).unwrap();
    let record = b.pending().pop().unwrap();
    remote.merge(record.mr_iid).unwrap();
    assert!(remote.feature("FT-000005").is_none());

    let plan = b.plan_sync(&manifest, false).unwrap();
    assert_eq!(kinds(&plan.actions), ["proposal-merged"]);
    b.execute_sync(&plan, &mut manifest);
    assert!(manifest.get("FT-000005").is_none());
    assert!(b.pending().is_empty());
}

#[test]
fn closed_update_warns_and_compares_normally() {
    let remote = Arc::new(MemoryRemote::new("main"));
    let root = TempDir::new().unwrap();
    remote.seed_feature(&stamped("FT-000006", "Alerts", 48));
    let mut manifest = synced_manifest(stamped("FT-000006", "Alerts", 48), 24);
    edit_local(&mut manifest, "FT-000006", "email and sms");
    let b = backend(&remote, &root);

    let plan = b.plan_sync(&manifest, true).unwrap();
    b.execute_sync(&plan, &mut manifest);
    let record = b.pending().pop().unwrap();
    remote.close(record.mr_iid).unwrap();

    let plan = b.plan_sync(&manifest, false).unwrap();
    assert_eq!(
        plan.actions,
        vec![SyncAction::None { id: "FT-000006".into(), local_ahead: true }]
    );
    assert_eq!(plan.warnings.len(), 1);
    assert!(plan.warnings[0].contains("closed"));
}

#[test]
fn remotely_deleted_entry_is_a_conflict() {
    let remote = Arc::new(MemoryRemote::new("main"));
    let root = TempDir::new().unwrap();
    let manifest = synced_manifest(stamped("FT-000007", "Gone", 48), 24);
    let b = backend(&remote, &root);

    let plan = b.plan_sync(&manifest, false).unwrap();
    assert!(matches!(
        plan.actions.as_slice(),
        [SyncAction::Conflict { reason: ConflictReason::DeletedRemotely, remote: None, .. }]
    ));
}

#[rstest]
#[case::open_update(Operation::Update, "conflict")]
#[case::open_delete(Operation::Delete, "proposal-pending")]
fn missing_catalog_file_with_open_proposal(#[case] operation: Operation, #[case] expected: &str) {
    let remote = Arc::new(MemoryRemote::new("main"));
    let root = TempDir::new().unwrap();
    remote.seed_feature(&stamped("FT-000010", "Audit log", 48));
    let manifest = synced_manifest(stamped("FT-000010", "Audit log", 48), 24);
    let b = backend(&remote, &root);

    let id: FeatureId = "FT-000010".into();
    match operation {
        Operation::Update => {
            let patch = FeaturePatch {
                summary: Some("per tenant".into()),
                ..FeaturePatch::default()
            };
            b.update_feature(&id, &patch).unwrap();
        }
        Operation::Delete => b.delete_feature(&id).unwrap(),
        Operation::Create => unreachable!(),
    }
    assert_eq!(b.pending().pop().unwrap().operation, operation);
    remote.remove_feature("FT-000010");

    let plan = b.plan_sync(&manifest, false).unwrap();
    assert_eq!(kinds(&plan.actions), [expected]);
    if operation == Operation::Update {
        assert!(matches!(
            plan.actions[0],
            SyncAction::Conflict { reason: ConflictReason::DeletedRemotely, remote: None, .. }
        ));
    }
}

// ---------------------------------------------------------------------------
// Run-level behaviour
// ---------------------------------------------------------------------------

#[test]
fn unseen_remote_features_are_reported_not_adopted() {
    let remote = Arc::new(MemoryRemote::new("main"));
    let root = TempDir::new().unwrap();
    remote.seed_feature(&stamped("FT-000009", "Theirs", 1));
    remote.seed_feature(&stamped("FT-000008", "Also theirs", 1));
    let mut manifest = Manifest::default();
    let b = backend(&remote, &root);

    let plan = b.plan_sync(&manifest, false).unwrap();
    let ids: Vec<&FeatureId> = plan.actions.iter().filter_map(SyncAction::remote_id).collect();
    assert_eq!(kinds(&plan.actions), ["unseen-remote", "unseen-remote"]);
    assert_eq!(ids, [&FeatureId::from("FT-000008"), &FeatureId::from("FT-000009")]);
    b.execute_sync(&plan, &mut manifest);
    assert!(manifest.features.is_empty());
}

#[rstest]
#[case::proposal_closed(true, ["create-proposal", "unseen-remote"])]
#[case::proposal_open(false, ["proposal-pending", "unseen-remote"])]
fn remote_feature_on_a_claimed_id_is_unseen(#[case] close: bool, #[case] expected: [&str; 2]) {
    let remote = Arc::new(MemoryRemote::new("main"));
    let root = TempDir::new().unwrap();
    let b = backend(&remote, &root);
    let mut manifest = Manifest::default();
    manifest.add_draft(Feature::new("", "Rejected idea"));
    let plan = b.plan_sync(&manifest, false).unwrap();
    b.execute_sync(&plan, &mut manifest);
    let record = b.pending().pop().unwrap();
    assert_eq!(record.server_id, "FT-000001");

    if close {
        remote.close(record.mr_iid).unwrap();
    }
    remote.seed_feature(&stamped("FT-000001", "Someone else's", 1));

    let plan = b.plan_sync(&manifest, false).unwrap();
    assert_eq!(kinds(&plan.actions), expected);
    assert_eq!(plan.actions[1].remote_id().unwrap().as_str(), "FT-000001");
}

#[test]
fn one_failure_does_not_stop_the_run() {
    let remote = Arc::new(MemoryRemote::new("main"));
    let root = TempDir::new().unwrap();
    let b = backend(&remote, &root);
    let mut manifest = Manifest::default();
    manifest.add_draft(Feature::new("", "Alpha"));
    manifest.add_draft(Feature::new("", "Beta"));
    remote.fail_next(RemoteOp::CreateBranch, RemoteError::status_code(403, "forbidden"));

    let plan = b.plan_sync(&manifest, false).unwrap();
    let report = b.execute_sync(&plan, &mut manifest);
    assert_eq!((report.succeeded, report.failed), (1, 1));
    assert!(!report.is_clean());
    assert_eq!(b.pending().len(), 1);
}

#[test]
fn cancellation_stops_before_remaining_actions() {
    let remote = Arc::new(MemoryRemote::new("main"));
    let root = TempDir::new().unwrap();
    let cancel = CancelToken::new();
    let b = backend(&remote, &root).with_cancel(cancel.clone());
    let mut manifest = Manifest::default();
    manifest.add_draft(Feature::new("", "Alpha"));

    let plan = b.plan_sync(&manifest, false).unwrap();
    cancel.cancel();
    let report = b.execute_sync(&plan, &mut manifest);
    assert!(report.cancelled);
    assert_eq!(report.succeeded + report.failed, 0);
    assert_eq!(remote.calls(RemoteOp::CreateBranch), 0);
}

#[test]
fn unreadable_proposal_state_is_treated_as_pending() {
    let remote = Arc::new(MemoryRemote::new("main"));
    let root = TempDir::new().unwrap();
    let b = backend(&remote, &root);
    let mut manifest = Manifest::default();
    manifest.add_draft(Feature::new("", "Alpha"));
    let plan = b.plan_sync(&manifest, false).unwrap();
    b.execute_sync(&plan, &mut manifest);

    remote.fail_times(
        RemoteOp::GetMergeRequest,
        3,
        RemoteError::status_code(503, "unavailable"),
    );
    let plan = b.plan_sync(&manifest, false).unwrap();
    assert_eq!(kinds(&plan.actions), ["proposal-pending"]);
    assert_eq!(plan.warnings.len(), 1);
}

#[test]
fn force_remote_replaces_replica_but_keeps_aliases() {
    let remote = Arc::new(MemoryRemote::new("main"));
    let root = TempDir::new().unwrap();
    remote.seed_feature(&stamped("FT-000001", "One", 1));
    remote.seed_feature(&stamped("FT-000002", "Two", 1));
    let b = backend(&remote, &root);
    let mut manifest = Manifest::default();
    manifest.add_draft(Feature::new("", "Local only"));
    manifest
        .aliases
        .insert("FT-LOCAL-old-0001".into(), "FT-000001".into());

    let written = b.force_remote(&mut manifest).unwrap();
    assert_eq!(written, 2);
    let ids: Vec<&str> = manifest.features.iter().map(|e| e.id().as_str()).collect();
    assert_eq!(ids, ["FT-000001", "FT-000002"]);
    assert!(manifest.features.iter().all(|e| e.last_synced_at.is_some()));
    assert_eq!(manifest.resolve("FT-LOCAL-old-0001").unwrap().feature.name, "One");
}
