//! Case-insensitive ranking over a feature list.
//!
//! Lower scores rank first; ties break on id.

use featcat_core::{Feature, FeatureId};
use serde::Serialize;

/// A completion candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    pub id: FeatureId,
    pub name: String,
}

fn score(feature: &Feature, query: &str) -> Option<u8> {
    let id = feature.id.as_str().to_lowercase();
    let name = feature.name.to_lowercase();
    if id == query {
        return Some(0);
    }
    if id.starts_with(query) {
        return Some(1);
    }
    if name.starts_with(query) {
        return Some(2);
    }
    if name.contains(query) {
        return Some(3);
    }
    let in_summary = feature.summary.to_lowercase().contains(query);
    let in_owner = feature
        .owner
        .as_deref()
        .is_some_and(|o| o.to_lowercase().contains(query));
    let in_tags = feature.tags.iter().any(|t| t.to_lowercase().contains(query));
    (in_summary || in_owner || in_tags).then_some(4)
}

/// Features matching `query`, best first, at most `limit`. An empty query
/// matches nothing.
pub fn search(features: &[Feature], query: &str, limit: usize) -> Vec<Feature> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return Vec::new();
    }
    let mut ranked: Vec<(u8, &Feature)> = features
        .iter()
        .filter_map(|f| score(f, &query).map(|s| (s, f)))
        .collect();
    ranked.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(_, f)| f.clone())
        .collect()
}

/// Id or name prefix matches. An empty query lists the first `limit` ids.
pub fn suggest(features: &[Feature], query: &str, limit: usize) -> Vec<Suggestion> {
    let query = query.trim().to_lowercase();
    let mut ranked: Vec<(u8, &Feature)> = features
        .iter()
        .filter_map(|f| {
            if f.id.as_str().to_lowercase().starts_with(&query) {
                Some((0, f))
            } else if f.name.to_lowercase().starts_with(&query) {
                Some((1, f))
            } else {
                None
            }
        })
        .collect();
    ranked.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(_, f)| Suggestion {
            id: f.id.clone(),
            name: f.name.clone(),
        })
        .collect()
}
