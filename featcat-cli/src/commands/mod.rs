//! Subcommands, plus the loading helpers they share.

pub mod catalog;
pub mod local;
pub mod pending;
pub mod sync;
pub mod whoami;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use featcat_core::{config, paths, Config, Feature, FeaturePatch};
use featcat_sync::GitBackend;

/// `~/.featcat/config.yaml` with environment overrides applied.
pub fn load_config() -> Result<Config> {
    let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;
    let mut config = config::load_at(&home).context("failed to read ~/.featcat/config.yaml")?;
    config.apply_env_with(|k| std::env::var(k).ok());
    Ok(config)
}

pub fn repo_root() -> Result<PathBuf> {
    paths::discover_root().context("could not determine repository root")
}

pub fn connect() -> Result<GitBackend> {
    let config = load_config()?;
    let root = repo_root()?;
    GitBackend::connect(&config, &root).context("failed to open the feature catalog")
}

// ---------------------------------------------------------------------------
// Shared feature fields
// ---------------------------------------------------------------------------

#[derive(Args, Debug, Default)]
pub struct FeatureFields {
    /// Feature name.
    #[arg(long)]
    pub name: Option<String>,

    /// One-line summary.
    #[arg(long)]
    pub summary: Option<String>,

    /// Owning team or person.
    #[arg(long)]
    pub owner: Option<String>,

    /// Tag; repeat for several.
    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,
}

impl FeatureFields {
    /// A new feature from the given fields; `--name` is required.
    pub fn to_feature(&self) -> Result<Feature> {
        let name = self
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .context("--name is required")?;
        Ok(Feature {
            summary: self.summary.clone().unwrap_or_default(),
            owner: self.owner.clone().filter(|o| !o.is_empty()),
            tags: self.tags.clone(),
            ..Feature::new("", name)
        })
    }

    pub fn to_patch(&self) -> FeaturePatch {
        FeaturePatch {
            name: self.name.clone(),
            summary: self.summary.clone(),
            owner: self.owner.clone(),
            tags: (!self.tags.is_empty()).then(|| self.tags.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Tabled)]
struct FeatureRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "owner")]
    owner: String,
    #[tabled(rename = "tags")]
    tags: String,
}

pub fn print_feature_table(features: &[Feature]) {
    let rows: Vec<FeatureRow> = features
        .iter()
        .map(|f| FeatureRow {
            id: f.id.to_string(),
            name: f.name.clone(),
            owner: f.owner.clone().unwrap_or_default(),
            tags: f.tags.join(", "),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize JSON")?
    );
    Ok(())
}
