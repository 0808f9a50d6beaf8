//! The capability interface the CLI talks to, and its Git-backed
//! implementation.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use featcat_core::{BackendMode, Config, Feature, FeatureId, FeaturePatch, Manifest};
use featcat_renderer::ProposalRenderer;

use crate::cache::FeatureCache;
use crate::cancel::CancelToken;
use crate::error::{CatalogError, RemoteError};
use crate::executor::{reconcile_local, ExecutionReport, Outcome, SyncExecutor};
use crate::pending::{PendingMr, ProposalStore};
use crate::planner::{SyncPlanner, SyncResult};
use crate::remote::{AccessLevel, GitLabClient, GitRemote};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::search::{self, Suggestion};
use crate::writer::{PipelineSettings, WritePipeline};

/// Who the backend is acting as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthInfo {
    pub username: String,
    pub display_name: String,
    pub access_level: String,
    pub can_propose: bool,
    pub mode: BackendMode,
}

pub trait FeatureBackend: Send + Sync {
    fn suggest(&self, query: &str, limit: usize) -> Result<Vec<Suggestion>, CatalogError>;
    fn search(&self, query: &str, limit: usize) -> Result<Vec<Feature>, CatalogError>;
    fn get_feature(&self, id: &FeatureId) -> Result<Feature, CatalogError>;
    fn feature_exists(&self, id: &FeatureId) -> Result<bool, CatalogError>;
    fn list_all(&self) -> Result<Vec<Feature>, CatalogError>;
    /// Propose a new feature; the returned copy carries its assigned id.
    fn create_feature(&self, feature: &Feature) -> Result<Feature, CatalogError>;
    fn update_feature(&self, id: &FeatureId, patch: &FeaturePatch) -> Result<Feature, CatalogError>;
    fn delete_feature(&self, id: &FeatureId) -> Result<(), CatalogError>;
    fn auth_info(&self) -> Result<AuthInfo, CatalogError>;
    fn mode(&self) -> BackendMode;
    fn invalidate_cache(&self);
}

// ---------------------------------------------------------------------------
// GitBackend
// ---------------------------------------------------------------------------

/// Reads come from the [`FeatureCache`]; writes become merge requests.
pub struct GitBackend {
    remote: Arc<dyn GitRemote>,
    retry: RetryExecutor,
    cache: FeatureCache,
    pipeline: WritePipeline,
    proposals: Mutex<ProposalStore>,
    catalog_dir: String,
    cancel: CancelToken,
}

impl GitBackend {
    pub fn new(
        remote: Arc<dyn GitRemote>,
        config: &Config,
        proposals: ProposalStore,
    ) -> Result<Self, CatalogError> {
        let retry = RetryExecutor::new(RetryPolicy::from(&config.retry));
        let renderer = ProposalRenderer::new(config.catalog.templates_dir.as_deref())?;
        let settings = PipelineSettings::from(config);
        let cache = FeatureCache::new(
            Arc::clone(&remote),
            retry.clone(),
            settings.catalog_dir.clone(),
            settings.default_branch.clone(),
        );
        let catalog_dir = settings.catalog_dir.clone();
        let pipeline = WritePipeline::new(Arc::clone(&remote), retry.clone(), renderer, settings);
        Ok(GitBackend {
            remote,
            retry,
            cache,
            pipeline,
            proposals: Mutex::new(proposals),
            catalog_dir,
            cancel: CancelToken::new(),
        })
    }

    /// Connect to the GitLab project named in `config`, keeping the ledger
    /// under repository root `root`. Every call made through the backend
    /// shares one deadline of `operation_timeout_secs`.
    pub fn connect(config: &Config, root: &Path) -> Result<Self, CatalogError> {
        if config.backend == BackendMode::Http {
            return Err(CatalogError::NotSupported(
                "the http backend is not available in this build".into(),
            ));
        }
        if config.gitlab.project.trim().is_empty() {
            return Err(CatalogError::InvalidRequest(
                "gitlab.project is not configured".into(),
            ));
        }
        let token = config.token();
        if token.is_none() {
            tracing::warn!(
                var = %config.gitlab.token_env,
                "no access token set; requests are anonymous"
            );
        }
        let client = GitLabClient::new(
            &config.gitlab.base_url,
            &config.gitlab.project,
            token,
            Duration::from_secs(config.request_timeout_secs.max(1)),
        );
        let proposals = ProposalStore::load_at(root)?;
        let backend = Self::new(Arc::new(client), config, proposals)?;
        Ok(match config.operation_timeout_secs {
            0 => backend,
            secs => backend.with_cancel(CancelToken::with_timeout(Duration::from_secs(secs))),
        })
    }

    /// Use `cancel` for every subsequent call.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn catalog_dir(&self) -> &str {
        &self.catalog_dir
    }

    fn store(&self) -> MutexGuard<'_, ProposalStore> {
        self.proposals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the proposal ledger.
    pub fn pending(&self) -> Vec<PendingMr> {
        self.store().records().to_vec()
    }

    /// Create a proposal and return the ledger record alongside the feature.
    pub fn propose_create(
        &self,
        feature: &Feature,
        local_id: Option<&str>,
    ) -> Result<(Feature, PendingMr), CatalogError> {
        let mut store = self.store();
        self.pipeline
            .create(&self.cache, &mut store, feature, local_id, &self.cancel)
    }

    pub fn propose_update(
        &self,
        id: &FeatureId,
        patch: &FeaturePatch,
    ) -> Result<(Feature, PendingMr), CatalogError> {
        if patch.is_empty() {
            return Err(CatalogError::InvalidRequest("nothing to update".into()));
        }
        let mut store = self.store();
        self.pipeline
            .update(&self.cache, &mut store, id, patch, &self.cancel)
    }

    pub fn propose_delete(&self, id: &FeatureId) -> Result<PendingMr, CatalogError> {
        let mut store = self.store();
        self.pipeline.delete(&self.cache, &mut store, id, &self.cancel)
    }

    /// Plan a sync of `manifest` against a fresh catalog snapshot.
    pub fn plan_sync(&self, manifest: &Manifest, prefer_local: bool) -> Result<SyncResult, CatalogError> {
        self.cache.invalidate();
        let remote = self.cache.features(&self.cancel)?;
        let store = self.store();
        SyncPlanner::new(self.remote.as_ref(), &self.retry, &self.catalog_dir).plan(
            &manifest.features,
            &store,
            &remote,
            prefer_local,
            &self.cancel,
        )
    }

    /// Execute `plan` and fold the results into `manifest`.
    pub fn execute_sync(&self, plan: &SyncResult, manifest: &mut Manifest) -> ExecutionReport {
        let mut store = self.store();
        let report = SyncExecutor::new(&self.pipeline, &self.cache)
            .execute_all(plan, &mut store, &self.cancel);
        let now = Utc::now();
        for entry in &report.reports {
            if matches!(entry.outcome, Outcome::Failed(_)) {
                continue;
            }
            if let Err(err) = reconcile_local(manifest, &entry.action, now) {
                tracing::warn!(
                    action = entry.action.kind(),
                    error = %err,
                    "could not update local replica"
                );
            }
        }
        report
    }

    /// Replace the local replica with the remote catalog.
    pub fn force_remote(&self, manifest: &mut Manifest) -> Result<usize, CatalogError> {
        SyncExecutor::new(&self.pipeline, &self.cache).force_remote(manifest, &self.cancel)
    }
}

impl FeatureBackend for GitBackend {
    fn suggest(&self, query: &str, limit: usize) -> Result<Vec<Suggestion>, CatalogError> {
        Ok(search::suggest(&self.cache.features(&self.cancel)?, query, limit))
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<Feature>, CatalogError> {
        Ok(search::search(&self.cache.features(&self.cancel)?, query, limit))
    }

    fn get_feature(&self, id: &FeatureId) -> Result<Feature, CatalogError> {
        if !id.is_synced() {
            return Err(CatalogError::InvalidId(id.to_string()));
        }
        self.cache
            .features(&self.cancel)?
            .into_iter()
            .find(|f| f.id == *id)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }

    fn feature_exists(&self, id: &FeatureId) -> Result<bool, CatalogError> {
        match self.get_feature(id) {
            Ok(_) => Ok(true),
            Err(CatalogError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn list_all(&self) -> Result<Vec<Feature>, CatalogError> {
        self.cache.features(&self.cancel)
    }

    fn create_feature(&self, feature: &Feature) -> Result<Feature, CatalogError> {
        self.propose_create(feature, None).map(|(f, _)| f)
    }

    fn update_feature(&self, id: &FeatureId, patch: &FeaturePatch) -> Result<Feature, CatalogError> {
        self.propose_update(id, patch).map(|(f, _)| f)
    }

    fn delete_feature(&self, id: &FeatureId) -> Result<(), CatalogError> {
        self.propose_delete(id).map(|_| ())
    }

    fn auth_info(&self) -> Result<AuthInfo, CatalogError> {
        let user = self
            .retry
            .run("current_user", &self.cancel, || self.remote.current_user(&self.cancel))?;
        let access = match self.retry.run("member_access", &self.cancel, || {
            self.remote.member_access(user.id, &self.cancel)
        }) {
            Ok(level) => level,
            Err(RemoteError::Cancelled) => return Err(CatalogError::Cancelled),
            Err(err) => {
                tracing::warn!(user = %user.username, error = %err, "could not read project membership");
                AccessLevel::None
            }
        };
        Ok(AuthInfo {
            username: user.username,
            display_name: user.name,
            access_level: access.to_string(),
            can_propose: access.can_propose(),
            mode: self.mode(),
        })
    }

    fn mode(&self) -> BackendMode {
        BackendMode::Git
    }

    fn invalidate_cache(&self) {
        self.cache.invalidate();
    }
}
