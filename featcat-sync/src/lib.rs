//! # featcat-sync
//!
//! Reconciliation engine between a local feature replica and the catalog
//! repository on GitLab.
//!
//! Reads go through [`FeatureCache`]; every write is a merge request opened
//! by [`WritePipeline`] and tracked in the [`ProposalStore`] until
//! [`SyncPlanner`] sees it merged or closed. [`GitBackend`] ties these
//! together behind the [`FeatureBackend`] capability trait.

pub mod backend;
pub mod cache;
pub mod cancel;
pub mod diff;
pub mod error;
pub mod executor;
pub mod pending;
pub mod planner;
pub mod remote;
pub mod retry;
pub mod search;
pub mod writer;

pub use backend::{AuthInfo, FeatureBackend, GitBackend};
pub use cache::FeatureCache;
pub use cancel::{CancelToken, Cancelled};
pub use diff::{conflict_diff, conflict_diffs, ConflictDiff};
pub use error::{CatalogError, ErrorKind, RemoteError};
pub use executor::{reconcile_local, ActionReport, ExecutionReport, Outcome, SyncExecutor};
pub use pending::{PendingMr, ProposalStore};
pub use planner::{ConflictReason, SyncAction, SyncPlanner, SyncResult};
pub use remote::{AccessLevel, GitLabClient, GitRemote};
#[cfg(any(test, feature = "testing"))]
pub use remote::{MemoryRemote, RemoteOp};
pub use retry::{RetryExecutor, RetryPolicy};
pub use search::Suggestion;
pub use writer::{PipelineSettings, WritePipeline};
