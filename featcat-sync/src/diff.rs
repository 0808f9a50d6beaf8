//! Unified diffs between the local and remote catalog encodings of a
//! conflicting feature.

use similar::TextDiff;

use featcat_core::{codec, CodecError, Feature, FeatureId};

use crate::planner::SyncAction;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictDiff {
    pub id: FeatureId,
    /// Catalog path of the feature, used in the diff headers.
    pub path: String,
    pub unified_diff: String,
}

/// Diff `local` against `remote` (or against nothing when the remote copy
/// was deleted). Returns an empty diff body when the encodings match.
pub fn conflict_diff(
    catalog_dir: &str,
    local: &Feature,
    remote: Option<&Feature>,
) -> Result<ConflictDiff, CodecError> {
    let path = codec::catalog_path(catalog_dir, &local.id);
    let ours = normalize_line_endings(&codec::format(local)?);
    let theirs = match remote {
        Some(remote) => normalize_line_endings(&codec::format(remote)?),
        None => String::new(),
    };
    let unified_diff = if ours == theirs {
        String::new()
    } else {
        TextDiff::from_lines(&ours, &theirs)
            .unified_diff()
            .header(&format!("local/{path}"), &format!("remote/{path}"))
            .context_radius(3)
            .to_string()
    };
    Ok(ConflictDiff {
        id: local.id.clone(),
        path,
        unified_diff,
    })
}

/// Diffs for every conflict in `actions`.
pub fn conflict_diffs(catalog_dir: &str, actions: &[SyncAction]) -> Result<Vec<ConflictDiff>, CodecError> {
    actions
        .iter()
        .filter_map(|a| match a {
            SyncAction::Conflict { local, remote, .. } => Some((local, remote.as_ref())),
            _ => None,
        })
        .map(|(local, remote)| conflict_diff(catalog_dir, local, remote))
        .collect()
}

fn normalize_line_endings(content: &str) -> String {
    content.replace("\r\n", "\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::ConflictReason;
    use chrono::{TimeZone, Utc};

    fn stamped(id: &str, name: &str) -> Feature {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        Feature {
            created_at: Some(at),
            updated_at: Some(at),
            ..Feature::new(id, name)
        }
    }

    #[test]
    fn changed_name_shows_in_diff() {
        let diff = conflict_diff(
            "features",
            &stamped("FT-000001", "Mine"),
            Some(&stamped("FT-000001", "Theirs")),
        )
        .unwrap();
        assert_eq!(diff.path, "features/FT-000001.yaml");
        assert!(diff.unified_diff.contains("--- local/features/FT-000001.yaml"));
        assert!(diff.unified_diff.contains("+++ remote/features/FT-000001.yaml"));
        assert!(diff.unified_diff.contains("-name: Mine"));
        assert!(diff.unified_diff.contains("+name: Theirs"));
    }

    #[test]
    fn deleted_remote_removes_every_line() {
        let diff = conflict_diff("features", &stamped("FT-000001", "Mine"), None).unwrap();
        assert!(diff.unified_diff.lines().any(|l| l == "-id: FT-000001"));
        assert!(!diff.unified_diff.lines().any(|l| l.starts_with("+id")));
    }

    #[test]
    fn only_conflicts_are_diffed() {
        let actions = vec![
            SyncAction::None { id: "FT-000002".into(), local_ahead: false },
            SyncAction::Conflict {
                local: stamped("FT-000003", "A"),
                remote: Some(stamped("FT-000003", "B")),
                reason: ConflictReason::BothChanged,
            },
        ];
        let diffs = conflict_diffs("features", &actions).unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].id.as_str(), "FT-000003");
    }
}
