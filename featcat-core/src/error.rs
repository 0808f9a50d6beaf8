//! Error types for featcat-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from encoding or decoding a catalog file.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A required field was absent or empty.
    #[error("catalog file is missing required field `{0}`")]
    MissingField(&'static str),

    /// A timestamp field was present but not RFC 3339.
    #[error("field `{field}` is not an RFC 3339 timestamp: {value:?}")]
    InvalidTimestamp { field: &'static str, value: String },

    /// The identifier matches neither the synced nor the local form.
    #[error("invalid feature id {0:?}")]
    InvalidId(String),

    /// Every synced identifier up to `FT-999999` is taken.
    #[error("feature id space exhausted (highest id is FT-{0:06})")]
    IdSpaceExhausted(u32),

    /// YAML (de)serialization failure.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors from on-disk local state: the manifest and the config file.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the offending file.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// A manifest operation referenced a feature that is not present.
    #[error("feature {0} is not in the local manifest")]
    UnknownFeature(String),
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
