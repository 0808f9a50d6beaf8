//! In-process [`GitRemote`] with GitLab-like semantics.
//!
//! Holds branches as path → bytes maps, merge requests with their source
//! branch's pending changes, and a small user directory. Tests drive review
//! outcomes through [`MemoryRemote::merge`] and [`MemoryRemote::close`] and
//! inject failures per operation with [`MemoryRemote::fail_next`].

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use featcat_core::{codec, Feature, FeatureId};

use crate::cancel::CancelToken;
use crate::error::RemoteError;

use super::{
    AccessLevel, EntryKind, FileCommit, GitRemote, MergeRequest, MergeRequestState, MrFileDiff,
    NewMergeRequest, RemoteUser, TreeEntry, TreePage,
};

/// Operation names for call counting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    ListTree,
    GetFile,
    CreateFile,
    UpdateFile,
    DeleteFile,
    CreateBranch,
    DeleteBranch,
    CreateMergeRequest,
    GetMergeRequest,
    MergeRequestDiffs,
    FindUser,
    CurrentUser,
    MemberAccess,
}

#[derive(Debug, Default, Clone)]
struct Branch {
    files: BTreeMap<String, Vec<u8>>,
    /// Commits since the branch was cut, in order. `None` is a deletion.
    changes: Vec<(String, Option<Vec<u8>>)>,
}

/// A merge request as stored by [`MemoryRemote`].
#[derive(Debug, Clone)]
pub struct StoredMergeRequest {
    pub request: NewMergeRequest,
    pub mr: MergeRequest,
    /// Filled in when merged.
    pub diffs: Vec<MrFileDiff>,
}

#[derive(Debug, Default)]
struct State {
    branches: BTreeMap<String, Branch>,
    merge_requests: BTreeMap<u64, StoredMergeRequest>,
    next_iid: u64,
    users: Vec<(RemoteUser, AccessLevel)>,
    current_user: Option<u64>,
    faults: HashMap<RemoteOp, VecDeque<RemoteError>>,
    calls: HashMap<RemoteOp, usize>,
    page_size: usize,
}

#[derive(Debug)]
pub struct MemoryRemote {
    default_branch: String,
    catalog_dir: String,
    state: Mutex<State>,
}

fn status(code: u16, message: &str) -> RemoteError {
    RemoteError::status_code(code, message)
}

impl MemoryRemote {
    /// An empty repository whose default branch is `default_branch` and
    /// whose catalog lives under `features/`.
    pub fn new(default_branch: &str) -> Self {
        let mut state = State {
            next_iid: 1,
            page_size: 20,
            ..State::default()
        };
        state
            .branches
            .insert(default_branch.to_string(), Branch::default());
        MemoryRemote {
            default_branch: default_branch.to_string(),
            catalog_dir: codec::CATALOG_DIR.to_string(),
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the call and pop an injected fault, if any.
    fn enter(&self, op: RemoteOp, cancel: &CancelToken) -> Result<MutexGuard<'_, State>, RemoteError> {
        cancel.check()?;
        let mut state = self.lock();
        *state.calls.entry(op).or_insert(0) += 1;
        if let Some(err) = state.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }

    // -----------------------------------------------------------------------
    // Seeding and inspection
    // -----------------------------------------------------------------------

    /// Write `feature` straight to the default branch.
    pub fn seed_feature(&self, feature: &Feature) {
        let path = codec::catalog_path(&self.catalog_dir, &feature.id);
        let yaml = codec::format(feature).unwrap_or_default();
        self.seed_file(&path, yaml.as_bytes());
    }

    /// Write raw bytes straight to the default branch.
    pub fn seed_file(&self, path: &str, bytes: &[u8]) {
        let mut state = self.lock();
        if let Some(branch) = state.branches.get_mut(&self.default_branch) {
            branch.files.insert(path.to_string(), bytes.to_vec());
        }
    }

    /// Remove a feature from the default branch, as if deleted elsewhere.
    pub fn remove_feature(&self, id: &str) {
        let path = codec::catalog_path(&self.catalog_dir, &FeatureId::from(id));
        let mut state = self.lock();
        if let Some(branch) = state.branches.get_mut(&self.default_branch) {
            branch.files.remove(&path);
        }
    }

    /// Decode a feature from the default branch.
    pub fn feature(&self, id: &str) -> Option<Feature> {
        let path = codec::catalog_path(&self.catalog_dir, &FeatureId::from(id));
        self.file(&self.default_branch, &path)
            .and_then(|bytes| codec::parse(&bytes).ok())
    }

    pub fn file(&self, branch: &str, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .branches
            .get(branch)
            .and_then(|b| b.files.get(path).cloned())
    }

    pub fn branch_names(&self) -> Vec<String> {
        self.lock().branches.keys().cloned().collect()
    }

    pub fn merge_request(&self, iid: u64) -> Option<StoredMergeRequest> {
        self.lock().merge_requests.get(&iid).cloned()
    }

    pub fn merge_requests(&self) -> Vec<StoredMergeRequest> {
        self.lock().merge_requests.values().cloned().collect()
    }

    pub fn add_user(&self, user: RemoteUser, access: AccessLevel) {
        self.lock().users.push((user, access));
    }

    pub fn set_current_user(&self, id: u64) {
        self.lock().current_user = Some(id);
    }

    /// Tree listing page size (default 20).
    pub fn set_page_size(&self, size: usize) {
        self.lock().page_size = size.max(1);
    }

    /// Fail the next call of `op` with `err`. Faults queue in order.
    pub fn fail_next(&self, op: RemoteOp, err: RemoteError) {
        self.lock().faults.entry(op).or_default().push_back(err);
    }

    pub fn fail_times(&self, op: RemoteOp, times: usize, err: RemoteError) {
        for _ in 0..times {
            self.fail_next(op, err.clone());
        }
    }

    pub fn calls(&self, op: RemoteOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    // -----------------------------------------------------------------------
    // Review simulation
    // -----------------------------------------------------------------------

    /// Apply the merge request's branch changes to its target branch.
    pub fn merge(&self, iid: u64) -> Result<(), RemoteError> {
        let mut state = self.lock();
        let stored = state
            .merge_requests
            .get(&iid)
            .cloned()
            .ok_or_else(|| status(404, "404 Not found"))?;
        if !stored.mr.state.is_open() {
            return Err(status(405, "Method Not Allowed"));
        }
        let source = state
            .branches
            .get(&stored.request.source_branch)
            .cloned()
            .ok_or_else(|| status(404, "404 Branch Not Found"))?;
        let target = state
            .branches
            .get_mut(&stored.request.target_branch)
            .ok_or_else(|| status(404, "404 Branch Not Found"))?;

        let mut diffs = Vec::new();
        for (path, content) in source.changes {
            let existed = target.files.contains_key(&path);
            match content {
                Some(bytes) => {
                    target.files.insert(path.clone(), bytes);
                }
                None => {
                    target.files.remove(&path);
                }
            }
            diffs.retain(|d: &MrFileDiff| d.new_path != path);
            diffs.push(MrFileDiff {
                old_path: path.clone(),
                new_path: path.clone(),
                new_file: !existed,
                deleted_file: !target.files.contains_key(&path),
            });
        }

        if stored.request.remove_source_branch {
            state.branches.remove(&stored.request.source_branch);
        }
        if let Some(entry) = state.merge_requests.get_mut(&iid) {
            entry.mr.state = MergeRequestState::Merged;
            entry.diffs = diffs;
        }
        Ok(())
    }

    pub fn close(&self, iid: u64) -> Result<(), RemoteError> {
        let mut state = self.lock();
        let entry = state
            .merge_requests
            .get_mut(&iid)
            .ok_or_else(|| status(404, "404 Not found"))?;
        entry.mr.state = MergeRequestState::Closed;
        Ok(())
    }

    fn commit(
        &self,
        op: RemoteOp,
        commit: &FileCommit,
        cancel: &CancelToken,
    ) -> Result<(), RemoteError> {
        let mut state = self.enter(op, cancel)?;
        let branch = state
            .branches
            .get_mut(&commit.branch)
            .ok_or_else(|| status(400, "You can only create or edit files when you are on a branch"))?;
        let exists = branch.files.contains_key(&commit.path);
        match (op, exists) {
            (RemoteOp::CreateFile, true) => {
                return Err(status(400, "A file with this name already exists"))
            }
            (RemoteOp::UpdateFile | RemoteOp::DeleteFile, false) => {
                return Err(status(400, "A file with this name doesn't exist"))
            }
            _ => {}
        }
        let content = commit.content.as_ref().map(|c| c.as_bytes().to_vec());
        match &content {
            Some(bytes) => {
                branch.files.insert(commit.path.clone(), bytes.clone());
            }
            None => {
                branch.files.remove(&commit.path);
            }
        }
        branch.changes.push((commit.path.clone(), content));
        Ok(())
    }
}

impl GitRemote for MemoryRemote {
    fn list_tree(
        &self,
        path: &str,
        git_ref: &str,
        page: u32,
        cancel: &CancelToken,
    ) -> Result<TreePage, RemoteError> {
        let state = self.enter(RemoteOp::ListTree, cancel)?;
        let branch = state
            .branches
            .get(git_ref)
            .ok_or_else(|| status(404, "404 Tree Not Found"))?;
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut entries: Vec<TreeEntry> = branch
            .files
            .keys()
            .filter_map(|p| {
                let rest = p.strip_prefix(&prefix)?;
                (!rest.contains('/')).then(|| TreeEntry {
                    name: rest.to_string(),
                    path: p.clone(),
                    kind: EntryKind::Blob,
                })
            })
            .collect();
        if entries.is_empty() {
            return Err(status(404, "404 Tree Not Found"));
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        let size = state.page_size;
        let page = page.max(1) as usize;
        let start = (page - 1) * size;
        let next_page = (start + size < entries.len()).then_some(page as u32 + 1);
        let entries = entries.into_iter().skip(start).take(size).collect();
        Ok(TreePage { entries, next_page })
    }

    fn get_file(
        &self,
        path: &str,
        git_ref: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, RemoteError> {
        let state = self.enter(RemoteOp::GetFile, cancel)?;
        state
            .branches
            .get(git_ref)
            .and_then(|b| b.files.get(path).cloned())
            .ok_or_else(|| status(404, "404 File Not Found"))
    }

    fn create_file(&self, commit: &FileCommit, cancel: &CancelToken) -> Result<(), RemoteError> {
        self.commit(RemoteOp::CreateFile, commit, cancel)
    }

    fn update_file(&self, commit: &FileCommit, cancel: &CancelToken) -> Result<(), RemoteError> {
        self.commit(RemoteOp::UpdateFile, commit, cancel)
    }

    fn delete_file(&self, commit: &FileCommit, cancel: &CancelToken) -> Result<(), RemoteError> {
        self.commit(RemoteOp::DeleteFile, commit, cancel)
    }

    fn create_branch(
        &self,
        branch: &str,
        from_ref: &str,
        cancel: &CancelToken,
    ) -> Result<(), RemoteError> {
        let mut state = self.enter(RemoteOp::CreateBranch, cancel)?;
        if state.branches.contains_key(branch) {
            return Err(status(400, "Branch already exists"));
        }
        let files = state
            .branches
            .get(from_ref)
            .map(|b| b.files.clone())
            .ok_or_else(|| status(400, "Invalid reference name"))?;
        state.branches.insert(
            branch.to_string(),
            Branch {
                files,
                changes: Vec::new(),
            },
        );
        Ok(())
    }

    fn delete_branch(&self, branch: &str, cancel: &CancelToken) -> Result<(), RemoteError> {
        let mut state = self.enter(RemoteOp::DeleteBranch, cancel)?;
        if branch == self.default_branch {
            return Err(status(405, "Cannot remove the default branch"));
        }
        state
            .branches
            .remove(branch)
            .map(|_| ())
            .ok_or_else(|| status(404, "404 Branch Not Found"))
    }

    fn create_merge_request(
        &self,
        request: &NewMergeRequest,
        cancel: &CancelToken,
    ) -> Result<MergeRequest, RemoteError> {
        let mut state = self.enter(RemoteOp::CreateMergeRequest, cancel)?;
        if !state.branches.contains_key(&request.source_branch) {
            return Err(status(404, "404 Source branch Not Found"));
        }
        let iid = state.next_iid;
        state.next_iid += 1;
        let mr = MergeRequest {
            iid,
            web_url: format!("memory://merge_requests/{iid}"),
            state: MergeRequestState::Opened,
            source_branch: request.source_branch.clone(),
        };
        state.merge_requests.insert(
            iid,
            StoredMergeRequest {
                request: request.clone(),
                mr: mr.clone(),
                diffs: Vec::new(),
            },
        );
        Ok(mr)
    }

    fn get_merge_request(
        &self,
        iid: u64,
        cancel: &CancelToken,
    ) -> Result<MergeRequest, RemoteError> {
        let state = self.enter(RemoteOp::GetMergeRequest, cancel)?;
        state
            .merge_requests
            .get(&iid)
            .map(|m| m.mr.clone())
            .ok_or_else(|| status(404, "404 Not found"))
    }

    fn merge_request_diffs(
        &self,
        iid: u64,
        cancel: &CancelToken,
    ) -> Result<Vec<MrFileDiff>, RemoteError> {
        let state = self.enter(RemoteOp::MergeRequestDiffs, cancel)?;
        state
            .merge_requests
            .get(&iid)
            .map(|m| m.diffs.clone())
            .ok_or_else(|| status(404, "404 Not found"))
    }

    fn find_user(
        &self,
        username: &str,
        cancel: &CancelToken,
    ) -> Result<Option<RemoteUser>, RemoteError> {
        let state = self.enter(RemoteOp::FindUser, cancel)?;
        Ok(state
            .users
            .iter()
            .find(|(u, _)| u.username == username)
            .map(|(u, _)| u.clone()))
    }

    fn current_user(&self, cancel: &CancelToken) -> Result<RemoteUser, RemoteError> {
        let state = self.enter(RemoteOp::CurrentUser, cancel)?;
        let id = state
            .current_user
            .ok_or_else(|| status(401, "401 Unauthorized"))?;
        state
            .users
            .iter()
            .find(|(u, _)| u.id == id)
            .map(|(u, _)| u.clone())
            .ok_or_else(|| status(401, "401 Unauthorized"))
    }

    fn member_access(
        &self,
        user_id: u64,
        cancel: &CancelToken,
    ) -> Result<AccessLevel, RemoteError> {
        let state = self.enter(RemoteOp::MemberAccess, cancel)?;
        Ok(state
            .users
            .iter()
            .find(|(u, _)| u.id == user_id)
            .map(|(_, level)| *level)
            .unwrap_or(AccessLevel::None))
    }
}
