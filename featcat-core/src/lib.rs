//! featcat core library: feature types, catalog codec, local state.
//!
//! - [`types`]: `Feature`, `FeatureId`, `FeaturePatch`, `Operation`
//! - [`codec`]: canonical YAML catalog file format and identifier rules
//! - [`manifest`]: the local replica
//! - [`config`]: `~/.featcat/config.yaml`
//! - [`paths`]: repository-root discovery and on-disk layout
//! - [`error`]: [`CodecError`], [`StoreError`]

pub mod codec;
pub mod config;
pub mod error;
pub mod manifest;
pub mod paths;
pub mod types;

pub use config::Config;
pub use error::{CodecError, StoreError};
pub use manifest::{LocalFeature, Manifest};
pub use types::{BackendMode, Feature, FeatureId, FeaturePatch, Operation};
