//! Proposal context: the serializable payload handed to the proposal templates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use featcat_core::{Feature, Operation};

use crate::error::RenderError;

/// Everything a proposal template may reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalContext {
    /// `create`, `update` or `delete`; selects the template set.
    pub operation: Operation,
    /// The feature as it will look once the proposal merges (for deletes,
    /// the feature being removed).
    pub feature: FeatureCtx,
    /// Field-level changes; only populated for updates.
    pub changes: Vec<ChangeCtx>,
    pub branch: String,
    pub catalog_path: String,
    pub meta: MetaCtx,
}

/// Flattened feature fields. Absent values are empty so templates can use
/// plain truthiness checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureCtx {
    pub id: String,
    pub name: String,
    pub summary: String,
    pub owner: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCtx {
    pub field: String,
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaCtx {
    pub featcat_version: String,
    pub generated_at: DateTime<Utc>,
}

impl From<&Feature> for FeatureCtx {
    fn from(f: &Feature) -> Self {
        FeatureCtx {
            id: f.id.0.clone(),
            name: f.name.clone(),
            summary: f.summary.clone(),
            owner: f.owner.clone().unwrap_or_default(),
            tags: f.tags.clone(),
        }
    }
}

impl ProposalContext {
    fn new(
        operation: Operation,
        feature: &Feature,
        branch: impl Into<String>,
        catalog_path: impl Into<String>,
    ) -> Self {
        ProposalContext {
            operation,
            feature: FeatureCtx::from(feature),
            changes: Vec::new(),
            branch: branch.into(),
            catalog_path: catalog_path.into(),
            meta: MetaCtx {
                featcat_version: env!("CARGO_PKG_VERSION").to_string(),
                generated_at: Utc::now(),
            },
        }
    }

    pub fn for_create(
        feature: &Feature,
        branch: impl Into<String>,
        catalog_path: impl Into<String>,
    ) -> Self {
        Self::new(Operation::Create, feature, branch, catalog_path)
    }

    /// Update context; `changes` is derived by comparing `before` and `after`.
    pub fn for_update(
        before: &Feature,
        after: &Feature,
        branch: impl Into<String>,
        catalog_path: impl Into<String>,
    ) -> Self {
        let mut ctx = Self::new(Operation::Update, after, branch, catalog_path);
        ctx.changes = field_changes(before, after);
        ctx
    }

    pub fn for_delete(
        feature: &Feature,
        branch: impl Into<String>,
        catalog_path: impl Into<String>,
    ) -> Self {
        Self::new(Operation::Delete, feature, branch, catalog_path)
    }

    /// Convert to a [`tera::Context`] for rendering.
    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        let value = serde_json::to_value(self)?;
        Ok(tera::Context::from_value(value)?)
    }
}

/// Fields whose content differs between `before` and `after`, in file order.
/// Tags compare as sets.
pub fn field_changes(before: &Feature, after: &Feature) -> Vec<ChangeCtx> {
    let mut changes = Vec::new();
    let mut push = |field: &str, b: String, a: String| {
        if b != a {
            changes.push(ChangeCtx {
                field: field.to_string(),
                before: b,
                after: a,
            });
        }
    };
    push("name", before.name.clone(), after.name.clone());
    push("summary", before.summary.clone(), after.summary.clone());
    push(
        "owner",
        before.owner.clone().unwrap_or_default(),
        after.owner.clone().unwrap_or_default(),
    );
    if before.tag_set() != after.tag_set() {
        let join = |f: &Feature| f.tag_set().into_iter().collect::<Vec<_>>().join(", ");
        changes.push(ChangeCtx {
            field: "tags".to_string(),
            before: join(before),
            after: join(after),
        });
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature() -> Feature {
        Feature {
            summary: "Sign in with email".to_string(),
            owner: Some("identity".to_string()),
            tags: vec!["auth".to_string(), "web".to_string()],
            ..Feature::new("FT-000004", "Login")
        }
    }

    #[test]
    fn absent_owner_becomes_empty() {
        let mut f = feature();
        f.owner = None;
        let ctx = FeatureCtx::from(&f);
        assert_eq!(ctx.owner, "");
    }

    #[test]
    fn update_context_lists_changed_fields_only() {
        let before = feature();
        let mut after = feature();
        after.summary = "Sign in with email or passkey".to_string();
        after.tags = vec!["web".to_string(), "auth".to_string()];

        let ctx = ProposalContext::for_update(&before, &after, "b", "features/FT-000004.yaml");
        assert_eq!(ctx.changes.len(), 1);
        assert_eq!(ctx.changes[0].field, "summary");
        assert_eq!(ctx.changes[0].after, "Sign in with email or passkey");
    }

    #[test]
    fn tag_change_is_reported_sorted() {
        let before = feature();
        let mut after = feature();
        after.tags = vec!["mobile".to_string(), "auth".to_string()];
        let changes = field_changes(&before, &after);
        assert_eq!(
            changes,
            vec![ChangeCtx {
                field: "tags".to_string(),
                before: "auth, web".to_string(),
                after: "auth, mobile".to_string(),
            }]
        );
    }

    #[test]
    fn tera_context_exposes_nested_fields() {
        let ctx = ProposalContext::for_create(&feature(), "catalog/create-login-00ff", "p");
        let tera_ctx = ctx.to_tera_context().unwrap();
        let json = tera_ctx.into_json();
        assert_eq!(json["operation"], "create");
        assert_eq!(json["feature"]["id"], "FT-000004");
        assert_eq!(json["branch"], "catalog/create-login-00ff");
    }
}
