//! Roundtrip tests for the catalog codec and manifest.
//!
//! Each `#[case]` is isolated; no shared state.

use chrono::{TimeZone, Utc};
use featcat_core::{
    codec,
    manifest::{self, Manifest},
    types::{Feature, FeatureId},
};
use rstest::rstest;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn minimal_feature() -> Feature {
    let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    Feature {
        created_at: Some(ts),
        updated_at: Some(ts),
        ..Feature::new("FT-000001", "Login")
    }
}

fn full_feature() -> Feature {
    Feature {
        id: FeatureId::from("FT-000123"),
        name: "Usage-based billing".to_string(),
        summary: "Meter API calls and invoice monthly".to_string(),
        owner: Some("billing".to_string()),
        tags: vec!["billing".to_string(), "api".to_string(), "beta".to_string()],
        created_at: Some(Utc.with_ymd_and_hms(2023, 6, 1, 9, 30, 0).unwrap()),
        updated_at: Some(Utc::now()),
    }
}

fn unicode_feature() -> Feature {
    Feature {
        id: FeatureId::from("FT-LOCAL-i18n-9f3c"),
        name: "アプリ-проект-项目".to_string(),
        summary: "Summary with émojis 🚀 & spéçïal chars: <>&\"'".to_string(),
        owner: Some("日本語・한국어".to_string()),
        tags: vec!["i18n".to_string()],
        created_at: Some(Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap()),
        updated_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()),
    }
}

fn multiline_feature() -> Feature {
    Feature {
        summary: "First line\nsecond line\n\n- a bullet\n".to_string(),
        ..minimal_feature()
    }
}

fn yaml_lookalike_feature() -> Feature {
    Feature {
        name: "yes".to_string(),
        summary: "null".to_string(),
        owner: Some("~".to_string()),
        tags: vec!["true".to_string(), "1.0".to_string()],
        ..minimal_feature()
    }
}

// ---------------------------------------------------------------------------
// Parameterised codec roundtrip
// ---------------------------------------------------------------------------

#[rstest]
#[case("minimal", minimal_feature())]
#[case("all_fields", full_feature())]
#[case("unicode_strings", unicode_feature())]
#[case("multiline_summary", multiline_feature())]
#[case("yaml_lookalikes", yaml_lookalike_feature())]
fn catalog_file_roundtrip(#[case] label: &str, #[case] feature: Feature) {
    let yaml =
        codec::format(&feature).unwrap_or_else(|e| panic!("[{label}] encode failed: {e}"));
    let back = codec::parse(yaml.as_bytes())
        .unwrap_or_else(|e| panic!("[{label}] decode failed: {e}\n{yaml}"));
    assert_eq!(back, feature, "[{label}] fields differ after roundtrip");
}

// ---------------------------------------------------------------------------
// Identifier assignment
// ---------------------------------------------------------------------------

#[rstest]
#[case(&[], "FT-000001")]
#[case(&["FT-000001", "FT-000005", "FT-000003"], "FT-000006")]
#[case(&["FT-000001", "FT-LOCAL-x"], "FT-000002")]
#[case(&["FT-LOCAL-a", "FT-LOCAL-b"], "FT-000001")]
#[case(&["FT-000009", "garbage", "FT-00010"], "FT-000010")]
fn next_id_cases(#[case] existing: &[&str], #[case] expected: &str) {
    let next = codec::next_id(existing.iter().copied()).expect("next id");
    assert_eq!(next.as_str(), expected);
}

// ---------------------------------------------------------------------------
// Manifest persistence
// ---------------------------------------------------------------------------

#[rstest]
#[case("empty", Manifest::default())]
#[case("with_entries", {
    let mut m = Manifest::default();
    m.add_draft(Feature::new("", "Draft one"));
    m.upsert_remote(full_feature(), Utc::now());
    m
})]
fn manifest_roundtrip(#[case] label: &str, #[case] manifest: Manifest) {
    let root = TempDir::new().expect("root");
    manifest::save_at(root.path(), &manifest)
        .unwrap_or_else(|e| panic!("[{label}] save failed: {e}"));
    let back = manifest::load_at(root.path())
        .unwrap_or_else(|e| panic!("[{label}] load failed: {e}"));
    assert_eq!(back, manifest, "[{label}] manifest differs after roundtrip");
}
