//! Catalog codec: the canonical YAML file format for a [`Feature`].
//!
//! # File layout
//!
//! ```text
//! features/
//!   FT-000001.yaml
//!   FT-000002.yaml
//! ```
//!
//! Field order on encode is fixed (`id`, `name`, `summary`, `owner`, `tags`,
//! `created_at`, `updated_at`) so diffs stay readable. Decoding is tolerant of
//! field order and accepts `createdAt` / `updatedAt` spellings.

use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::types::{Feature, FeatureId};

/// Default catalog directory in the repository.
pub const CATALOG_DIR: &str = "features";

/// Extension of a catalog file.
pub const CATALOG_EXT: &str = "yaml";

const SYNCED_PREFIX: &str = "FT-";
const MAX_SYNCED_SUFFIX: u32 = 999_999;

static SYNCED_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^FT-[0-9]{6}$").expect("static regex"));
static LOCAL_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^FT-LOCAL-[a-z0-9-]{1,64}$").expect("static regex"));

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// `FT-` followed by exactly six ASCII digits.
pub fn is_synced_id(id: &str) -> bool {
    SYNCED_ID.is_match(id)
}

/// `FT-LOCAL-` followed by 1–64 lowercase letters, digits or hyphens.
pub fn is_local_id(id: &str) -> bool {
    LOCAL_ID.is_match(id)
}

/// Either identifier form.
pub fn is_valid_id(id: &str) -> bool {
    is_synced_id(id) || is_local_id(id)
}

/// Next free synced identifier: the maximum synced suffix in `existing`
/// plus one, zero-padded to six digits.
///
/// Local-form ids and anything malformed are ignored. Pure: concurrent
/// assignment races are resolved by the write path, not here.
pub fn next_id<'a, I>(existing: I) -> Result<FeatureId, CodecError>
where
    I: IntoIterator<Item = &'a str>,
{
    let max = existing
        .into_iter()
        .filter(|id| is_synced_id(id))
        .filter_map(|id| id[SYNCED_PREFIX.len()..].parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    if max >= MAX_SYNCED_SUFFIX {
        return Err(CodecError::IdSpaceExhausted(max));
    }
    Ok(FeatureId(format!("{SYNCED_PREFIX}{:06}", max + 1)))
}

/// Lowercase `[a-z0-9-]` slug of `input`, at most `max_len` characters, with
/// runs of other characters collapsed to a single hyphen.
pub fn slugify(input: &str, max_len: usize) -> String {
    let mut slug = String::with_capacity(input.len().min(max_len));
    let mut pending_hyphen = false;
    for c in input.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else {
            pending_hyphen = true;
        }
        if slug.len() >= max_len {
            break;
        }
    }
    slug.truncate(max_len);
    slug.trim_end_matches('-').to_string()
}

/// Repository path of the catalog file for `id` under `dir`.
pub fn catalog_path(dir: &str, id: &FeatureId) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        format!("{}.{CATALOG_EXT}", id.0)
    } else {
        format!("{dir}/{}.{CATALOG_EXT}", id.0)
    }
}

/// Recover a synced identifier from a catalog file path such as
/// `features/FT-000012.yaml`. Returns `None` for anything else.
pub fn synced_id_from_path(path: &str) -> Option<FeatureId> {
    let file = path.rsplit('/').next()?;
    let stem = file.strip_suffix(&format!(".{CATALOG_EXT}"))?;
    is_synced_id(stem).then(|| FeatureId::from(stem))
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawFeature {
    id: Option<String>,
    name: Option<String>,
    summary: Option<String>,
    owner: Option<String>,
    tags: Option<Vec<String>>,
    #[serde(alias = "createdAt")]
    created_at: Option<String>,
    #[serde(alias = "updatedAt")]
    updated_at: Option<String>,
}

/// Decode a catalog file.
///
/// `id` and `name` must be present and non-empty. Timestamps, when present,
/// must be RFC 3339; absent timestamps stay `None`.
pub fn parse(bytes: &[u8]) -> Result<Feature, CodecError> {
    let raw: RawFeature = serde_yaml::from_slice(bytes)?;

    let id = raw
        .id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(CodecError::MissingField("id"))?;
    let name = raw
        .name
        .filter(|s| !s.trim().is_empty())
        .ok_or(CodecError::MissingField("name"))?;

    Ok(Feature {
        id: FeatureId(id),
        name,
        summary: raw.summary.unwrap_or_default(),
        owner: raw.owner.filter(|o| !o.is_empty()),
        tags: raw.tags.unwrap_or_default(),
        created_at: parse_timestamp("created_at", raw.created_at)?,
        updated_at: parse_timestamp("updated_at", raw.updated_at)?,
    })
}

fn parse_timestamp(
    field: &'static str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, CodecError> {
    let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(value.trim())
        .map(|ts| Some(ts.with_timezone(&Utc)))
        .map_err(|_| CodecError::InvalidTimestamp { field, value })
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct CatalogFile<'a> {
    id: &'a str,
    name: &'a str,
    summary: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    owner: Option<&'a str>,
    tags: &'a [String],
    created_at: String,
    updated_at: String,
}

/// Encode a feature, filling absent timestamps with the current time.
pub fn format(feature: &Feature) -> Result<String, CodecError> {
    format_at(feature, Utc::now())
}

/// [`format`] with an explicit "now" for absent timestamps.
pub fn format_at(feature: &Feature, now: DateTime<Utc>) -> Result<String, CodecError> {
    let created = feature.created_at.unwrap_or(now);
    let updated = feature.updated_at.unwrap_or(now);
    let file = CatalogFile {
        id: feature.id.as_str(),
        name: &feature.name,
        summary: &feature.summary,
        owner: feature.owner.as_deref().filter(|o| !o.is_empty()),
        tags: &feature.tags,
        created_at: created.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        updated_at: updated.to_rfc3339_opts(SecondsFormat::AutoSi, true),
    };
    Ok(serde_yaml::to_string(&file)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
