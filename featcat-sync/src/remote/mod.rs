//! The Git-hosting operations the engine consumes.
//!
//! [`GitRemote`] is implemented by [`GitLabClient`]. The in-process
//! `MemoryRemote` used by tests is built only with the `testing` feature.
//! Every method takes the
//! caller's [`CancelToken`]; implementations must not start work on a
//! cancelled token.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::error::RemoteError;

pub mod gitlab;
#[cfg(any(test, feature = "testing"))]
pub mod memory;

pub use gitlab::GitLabClient;
#[cfg(any(test, feature = "testing"))]
pub use memory::{MemoryRemote, RemoteOp};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Blob,
    Tree,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

/// One page of a directory listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreePage {
    pub entries: Vec<TreeEntry>,
    /// `None` on the last page.
    pub next_page: Option<u32>,
}

/// A single-file commit on a branch. `content` is `None` for deletions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCommit {
    pub branch: String,
    pub path: String,
    pub content: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMergeRequest {
    pub source_branch: String,
    pub target_branch: String,
    pub title: String,
    pub description: String,
    pub labels: Vec<String>,
    pub remove_source_branch: bool,
    pub assignee_id: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeRequestState {
    Opened,
    Closed,
    Merged,
    Locked,
}

impl MergeRequestState {
    /// Still awaiting a decision. `locked` is GitLab's transient
    /// merging-in-progress state.
    pub fn is_open(&self) -> bool {
        matches!(self, MergeRequestState::Opened | MergeRequestState::Locked)
    }
}

impl fmt::Display for MergeRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MergeRequestState::Opened => "opened",
            MergeRequestState::Closed => "closed",
            MergeRequestState::Merged => "merged",
            MergeRequestState::Locked => "locked",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub iid: u64,
    pub web_url: String,
    pub state: MergeRequestState,
    pub source_branch: String,
}

/// One file touched by a merge request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MrFileDiff {
    pub old_path: String,
    pub new_path: String,
    #[serde(default)]
    pub new_file: bool,
    #[serde(default)]
    pub deleted_file: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUser {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub name: String,
}

/// Project role, ordered by privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessLevel {
    None,
    Minimal,
    Guest,
    Reporter,
    Developer,
    Maintainer,
    Owner,
}

impl AccessLevel {
    /// Map GitLab's numeric `access_level`.
    pub fn from_level(level: u32) -> Self {
        match level {
            50.. => AccessLevel::Owner,
            40..=49 => AccessLevel::Maintainer,
            30..=39 => AccessLevel::Developer,
            20..=29 => AccessLevel::Reporter,
            10..=19 => AccessLevel::Guest,
            5..=9 => AccessLevel::Minimal,
            _ => AccessLevel::None,
        }
    }

    pub fn level(&self) -> u32 {
        match self {
            AccessLevel::None => 0,
            AccessLevel::Minimal => 5,
            AccessLevel::Guest => 10,
            AccessLevel::Reporter => 20,
            AccessLevel::Developer => 30,
            AccessLevel::Maintainer => 40,
            AccessLevel::Owner => 50,
        }
    }

    /// Developers and above can push branches and open merge requests.
    pub fn can_propose(&self) -> bool {
        *self >= AccessLevel::Developer
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessLevel::None => "none",
            AccessLevel::Minimal => "minimal",
            AccessLevel::Guest => "guest",
            AccessLevel::Reporter => "reporter",
            AccessLevel::Developer => "developer",
            AccessLevel::Maintainer => "maintainer",
            AccessLevel::Owner => "owner",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// GitRemote
// ---------------------------------------------------------------------------

pub trait GitRemote: Send + Sync {
    /// List `path` at `git_ref`. Pages are 1-based. A missing directory is a
    /// 404 status error.
    fn list_tree(
        &self,
        path: &str,
        git_ref: &str,
        page: u32,
        cancel: &CancelToken,
    ) -> Result<TreePage, RemoteError>;

    /// Raw (already base64-decoded) file bytes.
    fn get_file(&self, path: &str, git_ref: &str, cancel: &CancelToken)
        -> Result<Vec<u8>, RemoteError>;

    /// Fails with an already-exists status if the file is present.
    fn create_file(&self, commit: &FileCommit, cancel: &CancelToken) -> Result<(), RemoteError>;

    fn update_file(&self, commit: &FileCommit, cancel: &CancelToken) -> Result<(), RemoteError>;

    fn delete_file(&self, commit: &FileCommit, cancel: &CancelToken) -> Result<(), RemoteError>;

    fn create_branch(
        &self,
        branch: &str,
        from_ref: &str,
        cancel: &CancelToken,
    ) -> Result<(), RemoteError>;

    fn delete_branch(&self, branch: &str, cancel: &CancelToken) -> Result<(), RemoteError>;

    fn create_merge_request(
        &self,
        request: &NewMergeRequest,
        cancel: &CancelToken,
    ) -> Result<MergeRequest, RemoteError>;

    fn get_merge_request(&self, iid: u64, cancel: &CancelToken)
        -> Result<MergeRequest, RemoteError>;

    fn merge_request_diffs(
        &self,
        iid: u64,
        cancel: &CancelToken,
    ) -> Result<Vec<MrFileDiff>, RemoteError>;

    /// `Ok(None)` when no user has that username.
    fn find_user(&self, username: &str, cancel: &CancelToken)
        -> Result<Option<RemoteUser>, RemoteError>;

    fn current_user(&self, cancel: &CancelToken) -> Result<RemoteUser, RemoteError>;

    /// The user's effective role in the catalog project; non-members are
    /// [`AccessLevel::None`].
    fn member_access(&self, user_id: u64, cancel: &CancelToken)
        -> Result<AccessLevel, RemoteError>;
}
